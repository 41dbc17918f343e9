#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Cell balancing engine (hardware-agnostic).
//!
//! All hardware goes through `balancer_traits::HardwareChannel` and alerts
//! through `balancer_traits::Notifier`; time comes from a `Clock`.
//!
//! ## Architecture
//!
//! - **Sampling**: retried, averaged, calibrated cell voltages (`sampler`)
//! - **Relays**: break-before-make routing and converter enable (`relay`)
//! - **Control**: Idle/Balancing/Resting state machine (`controller`)
//! - **Alarms**: hysteresis, shared alarm line, throttled alerts (`alarm`)
//! - **Supervision**: heartbeat watchdog thread (`watchdog`)
//! - **Cycle**: sampling → alarms → control → status (`orchestrator`)

pub mod alarm;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod notify;
pub mod orchestrator;
pub mod relay;
pub mod sampler;
pub mod selfcheck;
pub mod status;
pub mod util;
pub mod watchdog;

pub use alarm::{AlarmManager, AlarmState, Direction};
pub use config::{AdcCfg, AlarmCfg, BalanceCfg, RelayCfg, SamplerCfg, SelfCheckCfg, WatchdogCfg};
pub use controller::{BalanceController, BalanceSession, ControllerState};
pub use error::{BalancerError, Result};
pub use notify::{LogNotifier, NotificationDispatcher};
pub use orchestrator::Orchestrator;
pub use relay::{RelayMap, RelaySequencer, RelayState};
pub use sampler::{Cell, VoltageSampler};
pub use selfcheck::{BalanceTestOutcome, SelfCheckReport};
pub use status::{CellStatus, ControllerPhase, SessionStatus, StatusBoard, StatusSnapshot};
pub use watchdog::{Heartbeat, HeartbeatMonitor, Watchdog};
