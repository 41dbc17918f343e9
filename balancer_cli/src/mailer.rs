//! Alert mail over plain SMTP, with optional credentials.

use balancer_traits::{BoxError, Notifier};
use eyre::WrapErr;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn from_config(email: &balancer_config::Email) -> eyre::Result<Self> {
        let from: Mailbox = email
            .sender_email
            .parse()
            .wrap_err_with(|| format!("email.sender_email {:?}", email.sender_email))?;
        let to: Mailbox = email
            .recipient_email
            .parse()
            .wrap_err_with(|| format!("email.recipient_email {:?}", email.recipient_email))?;
        let mut builder = SmtpTransport::builder_dangerous(email.smtp_server.as_str())
            .port(email.smtp_port)
            .timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (&email.username, &email.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        tracing::info!(
            server = %email.smtp_server,
            port = email.smtp_port,
            to = %to,
            "email alerts enabled"
        );
        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn message(&self, subject: &str, body: &str) -> Result<Message, lettre::error::Error> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
    }
}

impl Notifier for SmtpNotifier {
    fn send_alert(&mut self, subject: &str, body: &str) -> Result<(), BoxError> {
        let msg = self.message(subject, body)?;
        self.transport.send(&msg)?;
        Ok(())
    }
}
