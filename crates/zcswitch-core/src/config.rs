//! Configuration management for zcswitch.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/zcswitch/config.json`
//! 2. Environment variable: `ZCSWITCH_CONFIG_CONTENT`
//! 3. Project config: `zcswitch.jsonc` or `zcswitch.json` in the working directory
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::error::{ConfigError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use zcswitch_discover::{
    BrowseDomainsOptions, InterfaceSelector, ListenerOptions, ResolveOptions, ScanQueryType,
};
use zcswitch_util::LogLevel;

/// Environment variable holding inline JSONC configuration.
pub const CONFIG_CONTENT_ENV: &str = "ZCSWITCH_CONFIG_CONTENT";

/// Protocols browsed when no list is configured.
pub const DEFAULT_BROWSE_PROTOCOLS: &[&str] = &[
    "_audioplayer-discovery._tcp.local.",
    "_http._tcp.local.",
    "_printer._tcp.local.",
    "_apple-mobdev2._tcp.local.",
];

static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Which discovery backend to use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendPreference>,

    /// Scan window per protocol, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_time_ms: Option<u64>,

    /// Attempts when the mDNS socket is busy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Delay between attempts, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<ScanQueryType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_overlapped_queries: Option<bool>,

    /// Protocols browsed by `browse` and by `resolve` without arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browse_domain_protocols: Option<Vec<String>>,

    /// Interface names or addresses to query on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<Vec<String>>,

    /// Periodic listener settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerConfig>,
}

/// Backend selection override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Decide from the running platform.
    #[default]
    Auto,
    /// Always prefer the native service browser.
    Native,
    /// Always use the generic resolver.
    Generic,
}

/// Periodic listener settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pings_until_remove: Option<u32>,
}

impl ListenerConfig {
    /// Merge another listener config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.query_interval_ms.is_some() {
            self.query_interval_ms = other.query_interval_ms;
        }
        if other.pings_until_remove.is_some() {
            self.pings_until_remove = other.pings_until_remove;
        }
        self
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/zcswitch/`
    /// 2. `ZCSWITCH_CONFIG_CONTENT` environment variable
    /// 3. Project config from `project_dir`
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let global_dir = Self::global_config_dir();
        Self::load_from(global_dir.as_deref(), project_dir).await
    }

    /// Load configuration with an explicit global directory.
    pub async fn load_from(
        global_dir: Option<&Path>,
        project_dir: Option<&Path>,
    ) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        // 1. Load global config
        if let Some(global_dir) = global_dir {
            for name in &["config.json", "zcswitch.json", "zcswitch.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        // 2. Load from environment variable
        if let Ok(content) = std::env::var(CONFIG_CONTENT_ENV) {
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            config = config.merge(loaded);
        }

        // 3. Load project config
        if let Some(dir) = project_dir {
            for name in &["zcswitch.jsonc", "zcswitch.json"] {
                let path = dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        config.validate()?;
        tracing::debug!(sources = sources.len(), "Configuration loaded");
        Ok((config, sources))
    }

    /// Get the global config directory.
    ///
    /// On Unix systems, prefers `~/.config/zcswitch` over the
    /// platform-specific directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("zcswitch");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("zcswitch"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Remove `//` and `/* */` comments outside string literals.
    ///
    /// Newlines inside comments are kept so parse errors report the
    /// original line numbers.
    fn strip_comments(input: &str) -> String {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Scan {
            Code,
            Str,
            StrEscape,
            Line,
            Block,
            BlockStar,
        }

        let mut out = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut state = Scan::Code;

        while let Some(c) = chars.next() {
            state = match (state, c) {
                (Scan::Code, '/') if chars.peek() == Some(&'/') => {
                    chars.next();
                    Scan::Line
                }
                (Scan::Code, '/') if chars.peek() == Some(&'*') => {
                    chars.next();
                    Scan::Block
                }
                (Scan::Code, '"') => {
                    out.push(c);
                    Scan::Str
                }
                (Scan::Code, _) => {
                    out.push(c);
                    Scan::Code
                }
                (Scan::Str, '\\') => {
                    out.push(c);
                    Scan::StrEscape
                }
                (Scan::Str, '"') => {
                    out.push(c);
                    Scan::Code
                }
                (Scan::Str | Scan::StrEscape, _) => {
                    out.push(c);
                    Scan::Str
                }
                (Scan::Line, '\n') => {
                    out.push(c);
                    Scan::Code
                }
                (Scan::Line, _) => Scan::Line,
                (Scan::Block | Scan::BlockStar, '*') => Scan::BlockStar,
                (Scan::BlockStar, '/') => Scan::Code,
                (Scan::Block | Scan::BlockStar, _) => {
                    if c == '\n' {
                        out.push(c);
                    }
                    Scan::Block
                }
            };
        }

        out
    }

    /// Substitute `{env:VAR}` and `{file:path}` references.
    ///
    /// File paths are relative to the config file.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let base_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut failure = None;

        let substituted = var_regex().replace_all(content, |caps: &regex::Captures<'_>| {
            let reference = &caps[2];
            let resolved = match &caps[1] {
                "env" => std::env::var(reference).map_err(|_| ConfigError::EnvVarNotFound {
                    name: reference.to_string(),
                }),
                _ => {
                    let path = base_dir.join(reference);
                    std::fs::read_to_string(&path)
                        .map(|text| text.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: path.display().to_string(),
                        })
                }
            };
            resolved.unwrap_or_else(|e| {
                if failure.is_none() {
                    failure = Some(e);
                }
                String::new()
            })
        });

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(substituted.into_owned()),
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.backend.is_some() {
            self.backend = other.backend;
        }
        if other.scan_time_ms.is_some() {
            self.scan_time_ms = other.scan_time_ms;
        }
        if other.retries.is_some() {
            self.retries = other.retries;
        }
        if other.retry_delay_ms.is_some() {
            self.retry_delay_ms = other.retry_delay_ms;
        }
        if other.query_type.is_some() {
            self.query_type = other.query_type;
        }
        if other.allow_overlapped_queries.is_some() {
            self.allow_overlapped_queries = other.allow_overlapped_queries;
        }
        // Lists replace wholesale
        if other.browse_domain_protocols.is_some() {
            self.browse_domain_protocols = other.browse_domain_protocols;
        }
        if other.interfaces.is_some() {
            self.interfaces = other.interfaces;
        }

        self.listener = match (self.listener, other.listener) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };

        self
    }

    /// Reject settings the discovery layer would refuse.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retries == Some(0) {
            return Err(ConfigError::validation("retries must be greater than zero"));
        }
        if self.retry_delay_ms == Some(0) {
            return Err(ConfigError::validation(
                "retry_delay_ms must be greater than zero",
            ));
        }
        if let Some(listener) = &self.listener {
            if listener.query_interval_ms == Some(0) {
                return Err(ConfigError::validation(
                    "listener.query_interval_ms must be greater than zero",
                ));
            }
            if listener.pings_until_remove == Some(0) {
                return Err(ConfigError::validation(
                    "listener.pings_until_remove must be greater than zero",
                ));
            }
        }
        self.interface_selectors()?;
        Ok(())
    }

    /// Effective backend preference.
    pub fn backend(&self) -> BackendPreference {
        self.backend.unwrap_or_default()
    }

    /// Resolve options over `protocols` with the configured timings.
    pub fn resolve_options<I, S>(&self, protocols: I) -> ResolveOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let defaults = ResolveOptions::new(protocols);
        ResolveOptions {
            scan_time: self
                .scan_time_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_time),
            retries: self.retries.unwrap_or(defaults.retries),
            retry_delay: self
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            query_type: self.query_type.unwrap_or(defaults.query_type),
            allow_overlapped_queries: self
                .allow_overlapped_queries
                .unwrap_or(defaults.allow_overlapped_queries),
            ..defaults
        }
    }

    /// Domain browse options with the configured timings.
    pub fn browse_options(&self) -> BrowseDomainsOptions {
        let defaults = BrowseDomainsOptions::default();
        BrowseDomainsOptions {
            scan_time: self
                .scan_time_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.scan_time),
            retries: self.retries.unwrap_or(defaults.retries),
            retry_delay: self
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        }
    }

    /// Listener options over `protocols` with the configured settings.
    pub fn listener_options<I, S>(&self, protocols: I) -> ListenerOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let resolve = self.resolve_options(protocols);
        let listener = self.listener.clone().unwrap_or_default();
        let defaults = ListenerOptions::new(resolve.protocols.iter().cloned());
        ListenerOptions {
            query_interval: listener
                .query_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_interval),
            pings_until_remove: listener
                .pings_until_remove
                .unwrap_or(defaults.pings_until_remove),
            scan_time: resolve.scan_time,
            retries: resolve.retries,
            retry_delay: resolve.retry_delay,
            ..defaults
        }
    }

    /// Configured browse-domain protocols, or the built-in list.
    pub fn browse_domain_protocols(&self) -> Vec<String> {
        match &self.browse_domain_protocols {
            Some(protocols) => protocols.clone(),
            None => DEFAULT_BROWSE_PROTOCOLS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Parsed interface filter, if any is configured.
    pub fn interface_selectors(&self) -> Result<Option<Vec<InterfaceSelector>>, ConfigError> {
        let Some(interfaces) = &self.interfaces else {
            return Ok(None);
        };
        interfaces
            .iter()
            .map(|i| {
                i.parse::<InterfaceSelector>()
                    .map_err(|e| ConfigError::validation(format!("interfaces: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // Line comment
            "retries": 3, // trailing comment
            /* block comment */
            "browse_domain_protocols": ["_http._tcp.local./*not a comment*/"]
        }"#;

        let result = Config::strip_comments(input);
        assert!(!result.contains("Line comment"));
        assert!(!result.contains("trailing comment"));
        assert!(!result.contains("block comment"));
        assert!(result.contains("_http._tcp.local./*not a comment*/"));
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // This is a comment
            "backend": "generic",
            "log_level": "debug",
            "query_type": "any",
            "listener": { "pings_until_remove": 3 }
        }"#;

        let config = Config::parse_jsonc(input, "test").unwrap();
        assert_eq!(config.backend(), BackendPreference::Generic);
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.query_type, Some(ScanQueryType::Any));
        assert_eq!(
            config.listener.unwrap().pings_until_remove,
            Some(3)
        );
    }

    #[test]
    fn test_log_level_names() {
        let config = Config::parse_jsonc(r#"{ "log_level": "trace" }"#, "test").unwrap();
        assert_eq!(config.log_level, Some(LogLevel::Trace));

        let err = Config::parse_jsonc(r#"{ "log_level": "loud" }"#, "test").unwrap_err();
        assert!(err.to_string().contains("loud"));

        let json = serde_json::to_string(&Config {
            log_level: Some(LogLevel::Warn),
            ..Config::default()
        })
        .unwrap();
        assert!(json.contains(r#""log_level":"warn""#));
    }

    #[test]
    fn test_parse_jsonc_reports_source() {
        let err = Config::parse_jsonc("{ \"retries\": }", "zcswitch.jsonc").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Config(ConfigError::InvalidJson { ref path, .. }) if path == "zcswitch.jsonc"
        ));
    }

    #[test]
    fn test_merge_config() {
        let base = Config {
            scan_time_ms: Some(1000),
            retries: Some(2),
            browse_domain_protocols: Some(vec!["_a._tcp.local.".to_string()]),
            listener: Some(ListenerConfig {
                query_interval_ms: Some(5000),
                pings_until_remove: Some(2),
            }),
            ..Default::default()
        };
        let other = Config {
            retries: Some(5),
            browse_domain_protocols: Some(vec!["_b._tcp.local.".to_string()]),
            listener: Some(ListenerConfig {
                pings_until_remove: Some(4),
                ..Default::default()
            }),
            ..Default::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.scan_time_ms, Some(1000));
        assert_eq!(merged.retries, Some(5));
        assert_eq!(
            merged.browse_domain_protocols,
            Some(vec!["_b._tcp.local.".to_string()])
        );
        let listener = merged.listener.unwrap();
        assert_eq!(listener.query_interval_ms, Some(5000));
        assert_eq!(listener.pings_until_remove, Some(4));
    }

    #[test]
    fn test_option_derivation() {
        let config = Config {
            scan_time_ms: Some(750),
            retry_delay_ms: Some(300),
            allow_overlapped_queries: Some(true),
            listener: Some(ListenerConfig {
                query_interval_ms: Some(10_000),
                pings_until_remove: None,
            }),
            ..Default::default()
        };

        let resolve = config.resolve_options(["_http._tcp.local."]);
        assert_eq!(resolve.scan_time, Duration::from_millis(750));
        assert_eq!(resolve.retries, 2);
        assert_eq!(resolve.retry_delay, Duration::from_millis(300));
        assert!(resolve.allow_overlapped_queries);

        let browse = config.browse_options();
        assert_eq!(browse.scan_time, Duration::from_millis(750));

        let listener = config.listener_options(["_http._tcp.local."]);
        assert_eq!(listener.query_interval, Duration::from_secs(10));
        assert_eq!(listener.pings_until_remove, 2);
        assert_eq!(listener.scan_time, Duration::from_millis(750));
    }

    #[test]
    fn test_default_browse_protocols() {
        let config = Config::default();
        assert_eq!(config.browse_domain_protocols().len(), 4);

        let config = Config {
            browse_domain_protocols: Some(Vec::new()),
            ..Default::default()
        };
        assert!(config.browse_domain_protocols().is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = Config {
            retries: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation { .. })));

        let config = Config {
            listener: Some(ListenerConfig {
                query_interval_ms: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            interfaces: Some(vec![" ".to_string()]),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interface_selectors() {
        let config = Config {
            interfaces: Some(vec!["en0".to_string(), "10.0.0.4".to_string()]),
            ..Default::default()
        };
        assert_eq!(
            config.interface_selectors().unwrap(),
            Some(vec![
                InterfaceSelector::Name("en0".to_string()),
                InterfaceSelector::Addr("10.0.0.4".parse().unwrap()),
            ])
        );
        assert_eq!(Config::default().interface_selectors().unwrap(), None);
    }
}
