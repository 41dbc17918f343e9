//! Raspberry Pi bus: I2C via `/dev/i2c-N` and BCM GPIO outputs.
use std::collections::HashMap;

use balancer_traits::{BoxError, HardwareChannel};
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use tracing::{debug, trace};

use crate::error::{HwError, Result};

pub struct PiBus {
    i2c: I2c,
    gpio: Gpio,
    outputs: HashMap<u8, OutputPin>,
    current_addr: Option<u8>,
}

impl PiBus {
    /// Open I2C bus `bus_number` and claim `output_pins` as outputs driven low.
    pub fn open(bus_number: u8, output_pins: &[u8]) -> Result<Self> {
        let i2c = I2c::with_bus(bus_number).map_err(|e| HwError::I2c {
            addr: 0,
            op: "open",
            message: e.to_string(),
        })?;
        let gpio = Gpio::new().map_err(|e| HwError::Gpio {
            pin: 0,
            message: e.to_string(),
        })?;
        let mut bus = Self {
            i2c,
            gpio,
            outputs: HashMap::new(),
            current_addr: None,
        };
        for &pin in output_pins {
            bus.output(pin)?.set_low();
        }
        debug!(bus_number, ?output_pins, "pi bus opened");
        Ok(bus)
    }

    fn output(&mut self, pin: u8) -> Result<&mut OutputPin> {
        if !self.outputs.contains_key(&pin) {
            let out = self
                .gpio
                .get(pin)
                .map_err(|e| HwError::Gpio {
                    pin,
                    message: e.to_string(),
                })?
                .into_output();
            self.outputs.insert(pin, out);
        }
        self.outputs.get_mut(&pin).ok_or(HwError::Gpio {
            pin,
            message: "pin not claimed".into(),
        })
    }

    fn address(&mut self, addr: u8, op: &'static str) -> Result<()> {
        if self.current_addr != Some(addr) {
            self.i2c
                .set_slave_address(u16::from(addr))
                .map_err(|e| HwError::I2c {
                    addr,
                    op,
                    message: e.to_string(),
                })?;
            self.current_addr = Some(addr);
        }
        Ok(())
    }
}

impl HardwareChannel for PiBus {
    fn select_channel(&mut self, mux_addr: u8, channel: u8) -> std::result::Result<(), BoxError> {
        if channel > 7 {
            return Err(Box::new(HwError::I2c {
                addr: mux_addr,
                op: "select_channel",
                message: format!("channel {channel} out of range"),
            }));
        }
        self.address(mux_addr, "select_channel")?;
        self.i2c
            .smbus_send_byte(1 << channel)
            .map_err(|e| HwError::I2c {
                addr: mux_addr,
                op: "select_channel",
                message: e.to_string(),
            })?;
        trace!(mux = mux_addr, channel, "mux channel selected");
        Ok(())
    }

    fn read_register(&mut self, device_addr: u8, reg: u8) -> std::result::Result<[u8; 2], BoxError> {
        self.address(device_addr, "read_register")?;
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[reg], &mut buf)
            .map_err(|e| HwError::I2c {
                addr: device_addr,
                op: "read_register",
                message: e.to_string(),
            })?;
        trace!(addr = device_addr, reg, ?buf, "register read");
        Ok(buf)
    }

    fn write_register(
        &mut self,
        device_addr: u8,
        reg: u8,
        data: &[u8],
    ) -> std::result::Result<(), BoxError> {
        self.address(device_addr, "write_register")?;
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        let written = self.i2c.write(&frame).map_err(|e| HwError::I2c {
            addr: device_addr,
            op: "write_register",
            message: e.to_string(),
        })?;
        if written != frame.len() {
            return Err(Box::new(HwError::I2c {
                addr: device_addr,
                op: "write_register",
                message: format!("short write ({written}/{} bytes)", frame.len()),
            }));
        }
        Ok(())
    }

    fn set_digital_output(&mut self, pin: u8, high: bool) -> std::result::Result<(), BoxError> {
        let out = self.output(pin)?;
        if high {
            out.set_high();
        } else {
            out.set_low();
        }
        trace!(pin, high, "gpio output");
        Ok(())
    }
}
