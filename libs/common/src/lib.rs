//! Basic library shared by DLC services
//!
//! Provides the functions every service needs regardless of its job:
//! - logging setup (console + daily rolling files)
//! - the base error type

pub mod error;
pub mod logging;

pub use error::{Error, Result};

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;
