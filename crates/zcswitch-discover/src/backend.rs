//! Discovery backend interfaces.
//!
//! Two kinds of backend sit behind the dispatcher:
//!
//! - [`Resolver`]: a full multicast-DNS resolver that owns its own
//!   per-protocol iteration and supports interface targeting, domain
//!   browsing, announcement listening and periodic listeners.
//! - [`ServiceBrowser`]: a platform-native browser that can only search one
//!   service type at a time through explicit start/stop calls.

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domains::DomainLookup;
use crate::error::DiscoverError;
use crate::host::{ServiceAnnouncement, ZeroconfHost};
use crate::listener::ResolverListener;
use crate::options::{BrowseDomainsOptions, InterfaceSelector, ListenerOptions, ResolveOptions};

/// Called once per resolved host.
pub type HostCallback = Arc<dyn Fn(&ZeroconfHost) + Send + Sync>;

/// Called once per domain row with the service key and the host address.
pub type DomainCallback = Arc<dyn Fn(&str, &IpAddr) + Send + Sync>;

/// Called once per received announcement.
pub type AnnouncementCallback = Arc<dyn Fn(ServiceAnnouncement) + Send + Sync>;

/// A generic multicast-DNS resolver.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve every protocol in `options` and return the discovered hosts.
    ///
    /// `interfaces` restricts the network interfaces queries are sent on;
    /// `None` uses all of them.
    async fn resolve(
        &self,
        options: &ResolveOptions,
        callback: Option<HostCallback>,
        cancel: &CancellationToken,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<Vec<ZeroconfHost>, DiscoverError>;

    /// Enumerate the service types advertised on the network and group the
    /// hosts offering them.
    async fn browse_domains(
        &self,
        options: &BrowseDomainsOptions,
        callback: Option<DomainCallback>,
        cancel: &CancellationToken,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<DomainLookup, DiscoverError>;

    /// Deliver announcements to `callback` until `cancel` fires.
    async fn listen_for_announcements(
        &self,
        callback: AnnouncementCallback,
        cancel: CancellationToken,
    ) -> Result<(), DiscoverError>;

    /// Start a background listener that periodically re-queries
    /// `options.protocols`.
    fn create_listener(
        self: Arc<Self>,
        options: ListenerOptions,
    ) -> Result<ResolverListener, DiscoverError>;
}

/// A platform-native service browser.
///
/// A browser searches for one service type at a time and must not be driven
/// from two campaigns at once; the dispatcher holds it exclusively for the
/// duration of each resolve. Calls may block the calling thread, so the
/// dispatcher makes them from the blocking pool.
pub trait ServiceBrowser: Send {
    /// Replace the options for the next search. Clears previous results.
    fn set_resolve_options(&mut self, options: ResolveOptions) -> Result<(), DiscoverError>;

    /// Start searching for the configured service type.
    fn start_service_search(&mut self) -> Result<(), DiscoverError>;

    /// Stop the active search, if any.
    fn stop_service_search(&mut self) -> Result<(), DiscoverError>;

    /// Take the hosts collected by the last search.
    fn return_results(&mut self) -> Vec<ZeroconfHost>;
}

/// Which backend a dispatcher routes requests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The platform-native service browser.
    Native,
    /// The generic multicast-DNS resolver.
    Generic,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Generic => write!(f, "generic"),
        }
    }
}

/// Runtime capability deciding whether the native browser is preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    native_preferred: bool,
}

impl Capability {
    /// Detect the capability of the running platform.
    ///
    /// The native browser is preferred on Apple platforms when it is
    /// compiled in, since raw multicast sockets are restricted there.
    pub fn detect() -> Self {
        Self {
            native_preferred: cfg!(all(
                feature = "native",
                any(target_os = "macos", target_os = "ios")
            )),
        }
    }

    /// Prefer the native browser.
    pub fn native() -> Self {
        Self {
            native_preferred: true,
        }
    }

    /// Prefer the generic resolver.
    pub fn generic() -> Self {
        Self {
            native_preferred: false,
        }
    }

    pub fn prefers_native(&self) -> bool {
        self.native_preferred
    }
}

impl Default for Capability {
    fn default() -> Self {
        Self::detect()
    }
}
