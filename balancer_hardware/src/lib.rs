//! Bus drivers for the balancer: a simulated pack for development and tests,
//! and the Raspberry Pi I2C/GPIO bus behind the `hardware` feature.
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod pi;

pub use sim::{SimHandle, SimLayout, SimulatedPack};

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub use pi::PiBus;
