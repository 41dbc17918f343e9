//! Capability traits shared across the balancer workspace.
//!
//! The control engine only ever talks to hardware and mail transports through
//! these traits. Errors are boxed at this boundary; `balancer_core` maps them
//! to typed errors carrying the device address and operation.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Boxed error used at trait boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Serial multiplex bus plus digital outputs.
///
/// One implementation owns the whole bus (multiplexer, ADC, relay module) and
/// the GPIO lines. Callers serialize access; implementations need no locking.
pub trait HardwareChannel {
    /// Route the multiplexer at `mux_addr` to downstream `channel`.
    fn select_channel(&mut self, mux_addr: u8, channel: u8) -> Result<(), BoxError>;

    /// Read a 16-bit register as two bytes, most significant first.
    fn read_register(&mut self, device_addr: u8, reg: u8) -> Result<[u8; 2], BoxError>;

    /// Write `data` to register `reg` of the device at `device_addr`.
    fn write_register(&mut self, device_addr: u8, reg: u8, data: &[u8]) -> Result<(), BoxError>;

    /// Drive a digital output line high (`true`) or low.
    fn set_digital_output(&mut self, pin: u8, high: bool) -> Result<(), BoxError>;
}

impl<T: HardwareChannel + ?Sized> HardwareChannel for Box<T> {
    fn select_channel(&mut self, mux_addr: u8, channel: u8) -> Result<(), BoxError> {
        (**self).select_channel(mux_addr, channel)
    }
    fn read_register(&mut self, device_addr: u8, reg: u8) -> Result<[u8; 2], BoxError> {
        (**self).read_register(device_addr, reg)
    }
    fn write_register(&mut self, device_addr: u8, reg: u8, data: &[u8]) -> Result<(), BoxError> {
        (**self).write_register(device_addr, reg, data)
    }
    fn set_digital_output(&mut self, pin: u8, high: bool) -> Result<(), BoxError> {
        (**self).set_digital_output(pin, high)
    }
}

/// Outbound alert transport (email in production).
pub trait Notifier {
    fn send_alert(&mut self, subject: &str, body: &str) -> Result<(), BoxError>;
}

impl<T: Notifier + ?Sized> Notifier for Box<T> {
    fn send_alert(&mut self, subject: &str, body: &str) -> Result<(), BoxError> {
        (**self).send_alert(subject, body)
    }
}
