//! dlcsrv - demand-limiting control for a fleet of zone thermostats
//!
//! Polls Tstat units over RS-485/Modbus, resolves per-zone setpoints from
//! schedules and overrides, and drives relay staging under a site power
//! budget.

pub mod backend;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod poller;
pub mod registers;
pub mod relay;
pub mod state;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{DlcSrvError, Result};

pub const SERVICE_NAME: &str = "dlcsrv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
