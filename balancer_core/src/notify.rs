//! Off-thread alert delivery.
//!
//! `NotificationDispatcher` owns the real transport on a worker thread and is
//! itself a `Notifier`: `send_alert` only enqueues. A full queue drops the
//! alert so the control loop never waits on SMTP.
//!
//! Safety: the worker exits once the dispatcher is dropped and the queue is
//! drained; `Drop` joins it.
use crossbeam_channel as xch;
use balancer_traits::{BoxError, Notifier};

use crate::error::BalancerError;

struct Alert {
    subject: String,
    body: String,
}

pub struct NotificationDispatcher {
    tx: Option<xch::Sender<Alert>>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn spawn<N: Notifier + Send + 'static>(mut transport: N, capacity: usize) -> Self {
        let (tx, rx) = xch::bounded::<Alert>(capacity.max(1));
        let join_handle = std::thread::spawn(move || {
            for alert in rx.iter() {
                match transport.send_alert(&alert.subject, &alert.body) {
                    Ok(()) => tracing::info!(subject = %alert.subject, "alert delivered"),
                    Err(e) => tracing::warn!(error = %e, "alert delivery failed"),
                }
            }
            tracing::trace!("notification thread exiting cleanly");
        });
        Self {
            tx: Some(tx),
            join_handle: Some(join_handle),
        }
    }
}

impl Notifier for NotificationDispatcher {
    fn send_alert(&mut self, subject: &str, body: &str) -> Result<(), BoxError> {
        let Some(tx) = &self.tx else {
            return Err(Box::new(BalancerError::Notification(
                "dispatcher stopped".into(),
            )));
        };
        let alert = Alert {
            subject: subject.to_string(),
            body: body.to_string(),
        };
        match tx.try_send(alert) {
            Ok(()) => Ok(()),
            Err(xch::TrySendError::Full(_)) => {
                tracing::warn!("notification queue full; alert dropped");
                Err(Box::new(BalancerError::Notification("queue full".into())))
            }
            Err(xch::TrySendError::Disconnected(_)) => Err(Box::new(
                BalancerError::Notification("notification thread gone".into()),
            )),
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker's receive loop.
        self.tx.take();
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("notification thread joined successfully"),
                Err(e) => tracing::warn!(?e, "notification thread panicked during shutdown"),
            }
        }
    }
}

/// Stand-in transport when email is disabled: alerts go to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_alert(&mut self, subject: &str, body: &str) -> Result<(), BoxError> {
        tracing::warn!(subject, body, "alert (email disabled)");
        Ok(())
    }
}
