//! Human-readable error descriptions, exit codes and JSON error formatting.

use balancer_core::BalancerError;

pub const EXIT_ERROR: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_SELF_CHECK: i32 = 3;
/// Control loop stalled; a supervisor should restart the service.
pub const EXIT_WATCHDOG: i32 = 70;

/// CLI-level failures that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),
    #[error("self-check failed: {}", .0.join("; "))]
    SelfCheck(Vec<String>),
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::Config(msg) => format!(
                "What happened: {msg}.\nLikely causes: Missing or out-of-range values in the TOML, or an incomplete [relays] table.\nHow to fix: Edit the config file named by --config, then rerun."
            ),
            CliError::SelfCheck(failures) => format!(
                "What happened: Self-check failed ({}).\nLikely causes: A cell lead is disconnected, a bus device does not answer, or the DC-DC converter path is not moving charge.\nHow to fix: Check wiring and relay module power, then rerun `balancer self-check`. The alarm line was left asserted.",
                failures.join("; ")
            ),
        };
    }

    if let Some(be) = err.downcast_ref::<BalancerError>() {
        return match be {
            BalancerError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: The relay table does not match the cell count.\nHow to fix: Edit the config file, then rerun."
            ),
            BalancerError::Hardware { addr, op, message } => format!(
                "What happened: Bus device {addr:#04x} failed during {op} ({message}).\nLikely causes: Wiring, power, or a wrong address in [bus]/[adc].\nHow to fix: Verify the I2C wiring and addresses (i2cdetect), then rerun."
            ),
            BalancerError::Sensor { cell, attempts } => format!(
                "What happened: Cell {} could not be read after {attempts} attempts.\nLikely causes: Loose sense lead or wrong multiplexer channel in [cells].\nHow to fix: Check the lead and cells.channels, then rerun.",
                cell + 1
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("i2c") || lower.contains("gpio") {
        return format!(
            "What happened: Failed to open the hardware bus ({msg}).\nLikely causes: I2C not enabled, wrong bus number, or insufficient permissions.\nHow to fix: Enable I2C, check bus.i2c_bus_number, and run as a user in the i2c/gpio groups."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Config(_)) => return EXIT_CONFIG,
        Some(CliError::SelfCheck(_)) => return EXIT_SELF_CHECK,
        None => {}
    }
    if let Some(BalancerError::Config(_)) = err.downcast_ref::<BalancerError>() {
        return EXIT_CONFIG;
    }
    EXIT_ERROR
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::Config(_) => "Config",
            CliError::SelfCheck(_) => "SelfCheck",
        };
    }
    match err.downcast_ref::<BalancerError>() {
        Some(BalancerError::Config(_)) => "Config",
        Some(BalancerError::Hardware { .. }) => "Hardware",
        Some(BalancerError::Sensor { .. }) => "Sensor",
        Some(BalancerError::Notification(_)) => "Notification",
        Some(BalancerError::SequencingViolation(_)) => "SequencingViolation",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let mut obj = json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    });
    if let Some(CliError::SelfCheck(failures)) = err.downcast_ref::<CliError>() {
        obj["details"] = json!({ "failures": failures });
    }
    obj.to_string()
}
