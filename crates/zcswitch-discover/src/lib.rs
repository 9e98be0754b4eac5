//! mDNS/DNS-SD service discovery behind a single dispatcher.
//!
//! [`ZeroconfSwitch`] routes discovery requests to one of two backends,
//! chosen once when it is built:
//!
//! - the generic resolver ([`MdnsSdResolver`], pure Rust, all features), or
//! - the platform-native service browser (`NativeBrowser`, behind the
//!   `native` feature), preferred on Apple platforms.
//!
//! # Example: Resolving Services
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zcswitch_discover::{MdnsSdResolver, ResolveRequest, ZeroconfSwitch};
//!
//! # async fn run() -> Result<(), zcswitch_discover::DiscoverError> {
//! let switch = ZeroconfSwitch::builder(Arc::new(MdnsSdResolver::new()?)).build();
//!
//! let hosts = switch
//!     .resolve(ResolveRequest::protocol("_http._tcp.local.").with_scan_time(Duration::from_secs(3)))
//!     .await?;
//!
//! for host in hosts {
//!     println!("{host}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Browsing Domains
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use zcswitch_discover::{BrowseDomainsRequest, MdnsSdResolver, ZeroconfSwitch};
//! # async fn run() -> Result<(), zcswitch_discover::DiscoverError> {
//! let switch = ZeroconfSwitch::builder(Arc::new(MdnsSdResolver::new()?)).build();
//! switch.set_browse_domain_protocols(Some(["_http._tcp.local.", "_ipp._tcp.local."]))?;
//!
//! let lookup = switch.browse_domains(BrowseDomainsRequest::new()).await?;
//! for (domain, rows) in lookup.iter() {
//!     println!("{domain}: {}", rows.join(", "));
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod domains;
mod error;
mod host;
mod listener;
mod mdns;
#[cfg(feature = "native")]
mod native;
mod options;
mod switch;

pub use backend::{
    AnnouncementCallback, BackendKind, Capability, DomainCallback, HostCallback, Resolver,
    ServiceBrowser,
};
pub use domains::{domain_row, expand_hosts, DomainLookup};
pub use error::DiscoverError;
pub use host::{
    service_type, Service, ServiceAnnouncement, ZeroconfHost, ZeroconfHostBuilder,
    DEFAULT_SERVICE_TTL,
};
pub use listener::{ListenerEvent, ResolverListener};
pub use mdns::{MdnsSdResolver, META_QUERY};
#[cfg(feature = "native")]
pub use native::NativeBrowser;
pub use options::{
    BrowseDomainsOptions, InterfaceSelector, ListenerOptions, ResolveOptions, ScanQueryType,
    DEFAULT_PINGS_UNTIL_REMOVE, DEFAULT_QUERY_INTERVAL, DEFAULT_RETRIES, DEFAULT_RETRY_DELAY,
    DEFAULT_SCAN_TIME,
};
pub use switch::{BrowseDomainsRequest, ResolveRequest, ZeroconfSwitch, ZeroconfSwitchBuilder};
