use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("i2c error at 0x{addr:02x} during {op}: {message}")]
    I2c {
        addr: u8,
        op: &'static str,
        message: String,
    },
    #[error("gpio error on pin {pin}: {message}")]
    Gpio { pin: u8, message: String },
    #[error("bus timeout at 0x{addr:02x}")]
    Timeout { addr: u8 },
    #[error("no device at 0x{addr:02x}")]
    NoDevice { addr: u8 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
