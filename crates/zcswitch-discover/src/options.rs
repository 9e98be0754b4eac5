//! Scan, retry and listener options shared by every backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DiscoverError;

/// Scan window used when none (or zero) is given.
pub const DEFAULT_SCAN_TIME: Duration = Duration::from_secs(2);

/// Number of attempts when the mDNS socket is busy.
pub const DEFAULT_RETRIES: u32 = 2;

/// Delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Interval between listener re-queries.
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_millis(4000);

/// Consecutive missed re-queries before a listener reports a host as gone.
pub const DEFAULT_PINGS_UNTIL_REMOVE: u32 = 2;

/// DNS query type used for scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanQueryType {
    /// PTR query for the service type.
    #[default]
    Ptr,
    /// ANY query for the service type.
    Any,
}

/// Options for a resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Service types to resolve, e.g. "_http._tcp.local.".
    pub protocols: Vec<String>,
    /// How long to collect responses per protocol. Zero means the default.
    pub scan_time: Duration,
    /// Number of attempts when the mDNS socket is busy.
    pub retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// DNS query type.
    pub query_type: ScanQueryType,
    /// Allow this query to run while another one is in flight.
    pub allow_overlapped_queries: bool,
}

impl ResolveOptions {
    /// Create options for the given protocols with default timings.
    pub fn new<I, S>(protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protocols: protocols.into_iter().map(Into::into).collect(),
            scan_time: DEFAULT_SCAN_TIME,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            query_type: ScanQueryType::default(),
            allow_overlapped_queries: false,
        }
    }

    /// Check the protocol set and the retry policy.
    pub fn validate(&self) -> Result<(), DiscoverError> {
        if self.protocols.is_empty() {
            return Err(DiscoverError::invalid_argument(
                "protocols",
                "at least one protocol is required",
            ));
        }
        if self.protocols.iter().any(|p| p.trim().is_empty()) {
            return Err(DiscoverError::invalid_argument(
                "protocols",
                "protocol must not be blank",
            ));
        }
        validate_retry_policy(self.retries, self.retry_delay)
    }

    /// Validate and replace a zero scan time with the default.
    pub fn validated(mut self) -> Result<Self, DiscoverError> {
        self.validate()?;
        self.scan_time = effective_scan_time(self.scan_time);
        Ok(self)
    }

    /// Copy of these options narrowed to a single protocol.
    pub fn for_protocol(&self, protocol: &str) -> Self {
        Self {
            protocols: vec![protocol.to_string()],
            ..self.clone()
        }
    }
}

/// Options for a domain browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseDomainsOptions {
    /// How long to collect responses. Zero means the default.
    pub scan_time: Duration,
    /// Number of attempts when the mDNS socket is busy.
    pub retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for BrowseDomainsOptions {
    fn default() -> Self {
        Self {
            scan_time: DEFAULT_SCAN_TIME,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl BrowseDomainsOptions {
    /// Check the retry policy.
    pub fn validate(&self) -> Result<(), DiscoverError> {
        validate_retry_policy(self.retries, self.retry_delay)
    }

    /// Validate and replace a zero scan time with the default.
    pub fn validated(mut self) -> Result<Self, DiscoverError> {
        self.validate()?;
        self.scan_time = effective_scan_time(self.scan_time);
        Ok(self)
    }

    /// Resolve options over `protocols` carrying these timings.
    pub fn to_resolve_options<I, S>(&self, protocols: I) -> ResolveOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ResolveOptions {
            scan_time: self.scan_time,
            retries: self.retries,
            retry_delay: self.retry_delay,
            ..ResolveOptions::new(protocols)
        }
    }
}

/// Options for a periodic listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Service types to watch.
    pub protocols: Vec<String>,
    /// Interval between re-queries.
    pub query_interval: Duration,
    /// Consecutive missed re-queries before a host is reported as gone.
    pub pings_until_remove: u32,
    /// Scan window of each re-query. Zero means the default.
    pub scan_time: Duration,
    /// Number of attempts when the mDNS socket is busy.
    pub retries: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl ListenerOptions {
    /// Create listener options for the given protocols with default timings.
    pub fn new<I, S>(protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protocols: protocols.into_iter().map(Into::into).collect(),
            query_interval: DEFAULT_QUERY_INTERVAL,
            pings_until_remove: DEFAULT_PINGS_UNTIL_REMOVE,
            scan_time: DEFAULT_SCAN_TIME,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Check the re-query policy and the per-cycle resolve options.
    pub fn validate(&self) -> Result<(), DiscoverError> {
        if self.query_interval.is_zero() {
            return Err(DiscoverError::invalid_argument(
                "query_interval",
                "must be greater than zero",
            ));
        }
        if self.pings_until_remove == 0 {
            return Err(DiscoverError::invalid_argument(
                "pings_until_remove",
                "must be greater than zero",
            ));
        }
        self.resolve_options().validate()
    }

    /// Resolve options used for every re-query cycle.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            scan_time: effective_scan_time(self.scan_time),
            retries: self.retries,
            retry_delay: self.retry_delay,
            ..ResolveOptions::new(self.protocols.iter().cloned())
        }
    }
}

/// Selects a network interface to send queries on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InterfaceSelector {
    /// Interface by name, e.g. "en0".
    Name(String),
    /// Interface owning the given address.
    Addr(IpAddr),
}

impl FromStr for InterfaceSelector {
    type Err = DiscoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DiscoverError::invalid_argument(
                "interface",
                "interface must not be blank",
            ));
        }
        Ok(match s.parse::<IpAddr>() {
            Ok(ip) => InterfaceSelector::Addr(ip),
            Err(_) => InterfaceSelector::Name(s.to_string()),
        })
    }
}

impl fmt::Display for InterfaceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceSelector::Name(name) => write!(f, "{name}"),
            InterfaceSelector::Addr(ip) => write!(f, "{ip}"),
        }
    }
}

fn validate_retry_policy(retries: u32, retry_delay: Duration) -> Result<(), DiscoverError> {
    if retries == 0 {
        return Err(DiscoverError::invalid_argument(
            "retries",
            "must be greater than zero",
        ));
    }
    if retry_delay.is_zero() {
        return Err(DiscoverError::invalid_argument(
            "retry_delay",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn effective_scan_time(scan_time: Duration) -> Duration {
    if scan_time.is_zero() {
        DEFAULT_SCAN_TIME
    } else {
        scan_time
    }
}
