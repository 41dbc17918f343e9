//! Maps `Box<dyn Error>` from trait boundaries to typed `BalancerError`.
//!
//! The traits in `balancer_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to `BalancerError::Hardware`, with an optional
//! feature-gated path that keeps the address reported by
//! `balancer_hardware::HwError`.

use balancer_traits::BoxError;

use crate::error::BalancerError;

/// Map a trait-boundary error raised while performing `op` on `addr`.
pub fn map_hw_error(
    addr: u8,
    op: &'static str,
    e: &(dyn std::error::Error + 'static),
) -> BalancerError {
    #[cfg(feature = "hardware-errors")]
    {
        use balancer_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            let (addr, message) = match hw {
                HwError::I2c { addr, message, .. } => (*addr, message.clone()),
                HwError::Timeout { addr } => (*addr, "bus timeout".to_string()),
                HwError::NoDevice { addr } => (*addr, "no device responded".to_string()),
                HwError::Gpio { pin, message } => (*pin, message.clone()),
                other @ HwError::Io(_) => (addr, other.to_string()),
            };
            return BalancerError::Hardware { addr, op, message };
        }
    }

    BalancerError::Hardware {
        addr,
        op,
        message: e.to_string(),
    }
}

/// `map_err` adapter: `bus.read_register(a, r).map_err(hw(a, "read_register"))`.
pub(crate) fn hw(addr: u8, op: &'static str) -> impl FnOnce(BoxError) -> BalancerError {
    move |e| map_hw_error(addr, op, &*e)
}
