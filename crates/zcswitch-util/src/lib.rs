//! Shared utilities for zcswitch.
//!
//! - Logging setup with tracing
//! - RAII-based timing for scan windows and discovery campaigns

pub mod log;
pub mod timing;

pub use log::{LogConfig, LogLevel};
pub use timing::TimingGuard;
