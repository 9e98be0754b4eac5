//! Logging setup using tracing.
//!
//! The CLI logs to stderr by default. When a log file is configured the
//! output goes there instead, without ANSI colours.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Crates whose log output is enabled by the default filter.
const LOG_TARGETS: &[&str] = &["zcswitch", "zcswitch_core", "zcswitch_discover", "zcswitch_util"];

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parse a log level from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Log level for the zcswitch crates.
    pub level: LogLevel,
    /// Also enable debug output from the mDNS backends (`mdns_sd`, `zeroconf`).
    pub backend_debug: bool,
    /// Log file path. Logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Build the `EnvFilter` directive string for this configuration.
    pub fn filter_directive(&self) -> String {
        let level = self.level.as_str();
        let mut directives: Vec<String> = LOG_TARGETS
            .iter()
            .map(|target| format!("{target}={level}"))
            .collect();

        if self.backend_debug {
            directives.push("mdns_sd=debug".to_string());
            directives.push("zeroconf=debug".to_string());
        }

        directives.join(",")
    }
}

/// Initialize logging with the given configuration.
///
/// `RUST_LOG` overrides the computed filter. Returns the log file path when
/// logging to a file. Calling this twice is harmless; the second call keeps
/// the already-installed subscriber.
pub fn init(config: LogConfig) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    if let Some(path) = config.file {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Warning: Could not create log directory: {}", e);
                return None;
            }
        }

        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file: {}", e);
                return None;
            }
        };

        let layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
        return Some(path);
    }

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
    None
}

/// Get the default log file path.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("zcswitch").join("logs").join("zcswitch.log"))
}
