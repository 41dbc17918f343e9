use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalancerError {
    /// Every attempt for this cell in this cycle came back empty.
    #[error("no valid reading for cell {cell} after {attempts} attempts")]
    Sensor { cell: usize, attempts: u32 },
    /// A bus or pin operation failed. `addr` is the device address, or the
    /// pin number for digital outputs.
    #[error("hardware error ({op} @ 0x{addr:02x}): {message}")]
    Hardware {
        addr: u8,
        op: &'static str,
        message: String,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("notification failed: {0}")]
    Notification(String),
    #[error("relay sequencing violation: {0}")]
    SequencingViolation(String),
}

pub type Result<T> = std::result::Result<T, BalancerError>;
