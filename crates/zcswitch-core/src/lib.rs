//! Configuration for zcswitch.
//!
//! Settings are read from JSONC files and an environment variable and merged
//! into a single [`Config`], which derives the discovery options used by the
//! command line front end.

pub mod config;
pub mod error;

pub use config::{BackendPreference, Config, ListenerConfig, DEFAULT_BROWSE_PROTOCOLS};
pub use error::{ConfigError, CoreError, CoreResult};
