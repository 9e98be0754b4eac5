//! The discovery dispatcher.
//!
//! [`ZeroconfSwitch`] picks one backend when it is built and routes every
//! request to it for the rest of its lifetime.

use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zcswitch_util::TimingGuard;

use crate::backend::{
    AnnouncementCallback, BackendKind, Capability, DomainCallback, HostCallback, Resolver,
    ServiceBrowser,
};
use crate::domains::{expand_hosts, DomainLookup};
use crate::error::DiscoverError;
use crate::host::{ServiceAnnouncement, ZeroconfHost};
use crate::listener::ResolverListener;
use crate::options::{
    BrowseDomainsOptions, InterfaceSelector, ListenerOptions, ResolveOptions, ScanQueryType,
};

const NATIVE_INTERFACES_UNSUPPORTED: &str =
    "native service browser does not support per-network interface requests";

/// A resolve call.
///
/// Start from [`ResolveRequest::protocol`], [`ResolveRequest::protocols`] or
/// [`ResolveRequest::from_options`]; every other setting has the default
/// documented on [`ResolveOptions`].
#[derive(Clone)]
pub struct ResolveRequest {
    pub options: ResolveOptions,
    pub callback: Option<HostCallback>,
    pub cancel: CancellationToken,
    pub interfaces: Option<Vec<InterfaceSelector>>,
}

impl ResolveRequest {
    /// Resolve a single protocol.
    pub fn protocol(protocol: impl Into<String>) -> Self {
        Self::protocols([protocol.into()])
    }

    /// Resolve several protocols, one after another.
    pub fn protocols<I, S>(protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_options(ResolveOptions::new(protocols))
    }

    pub fn from_options(options: ResolveOptions) -> Self {
        Self {
            options,
            callback: None,
            cancel: CancellationToken::new(),
            interfaces: None,
        }
    }

    pub fn with_scan_time(mut self, scan_time: Duration) -> Self {
        self.options.scan_time = scan_time;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.options.retry_delay = retry_delay;
        self
    }

    pub fn with_query_type(mut self, query_type: ScanQueryType) -> Self {
        self.options.query_type = query_type;
        self
    }

    pub fn with_overlapped_queries(mut self, allow: bool) -> Self {
        self.options.allow_overlapped_queries = allow;
        self
    }

    /// Invoke `callback` once per resolved host.
    pub fn on_host(mut self, callback: impl Fn(&ZeroconfHost) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Restrict queries to the given network interfaces.
    pub fn on_interfaces(mut self, interfaces: impl IntoIterator<Item = InterfaceSelector>) -> Self {
        self.interfaces = Some(interfaces.into_iter().collect());
        self
    }
}

/// A domain browse call.
///
/// `protocols` overrides the dispatcher's configured browse-domain list for
/// this call only.
#[derive(Clone, Default)]
pub struct BrowseDomainsRequest {
    pub protocols: Option<Vec<String>>,
    pub options: BrowseDomainsOptions,
    pub callback: Option<DomainCallback>,
    pub cancel: CancellationToken,
    pub interfaces: Option<Vec<InterfaceSelector>>,
}

impl BrowseDomainsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Browse exactly these protocols instead of the configured list.
    pub fn protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_options(mut self, options: BrowseDomainsOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_scan_time(mut self, scan_time: Duration) -> Self {
        self.options.scan_time = scan_time;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.options.retry_delay = retry_delay;
        self
    }

    /// Invoke `callback` once per (service key, address) row.
    pub fn on_domain(mut self, callback: impl Fn(&str, &IpAddr) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_interfaces(mut self, interfaces: impl IntoIterator<Item = InterfaceSelector>) -> Self {
        self.interfaces = Some(interfaces.into_iter().collect());
        self
    }
}

/// Builder for [`ZeroconfSwitch`].
pub struct ZeroconfSwitchBuilder {
    resolver: Arc<dyn Resolver>,
    native: Option<Box<dyn ServiceBrowser>>,
    capability: Capability,
}

impl ZeroconfSwitchBuilder {
    /// Supply the platform-native browser.
    pub fn native_browser(mut self, browser: impl ServiceBrowser + 'static) -> Self {
        self.native = Some(Box::new(browser));
        self
    }

    /// Override the detected platform capability.
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    pub fn build(self) -> ZeroconfSwitch {
        let native = if self.capability.prefers_native() {
            self.native.map(|browser| Arc::new(Mutex::new(browser)))
        } else {
            None
        };
        let backend = if native.is_some() {
            BackendKind::Native
        } else {
            BackendKind::Generic
        };

        info!(backend = %backend, "Discovery backend selected");

        ZeroconfSwitch {
            resolver: self.resolver,
            native,
            backend,
            browse_domain_protocols: RwLock::new(Arc::from(Vec::<String>::new())),
        }
    }
}

/// Routes discovery requests to the generic resolver or the native browser.
pub struct ZeroconfSwitch {
    resolver: Arc<dyn Resolver>,
    /// Present only when the native backend was selected.
    native: Option<NativeSlot>,
    backend: BackendKind,
    browse_domain_protocols: RwLock<Arc<[String]>>,
}

impl ZeroconfSwitch {
    /// Start building a dispatcher around the generic resolver.
    pub fn builder(resolver: Arc<dyn Resolver>) -> ZeroconfSwitchBuilder {
        ZeroconfSwitchBuilder {
            resolver,
            native: None,
            capability: Capability::detect(),
        }
    }

    /// The backend requests are routed to.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Resolve the request's protocols and return the hosts found, in
    /// protocol order.
    pub async fn resolve(&self, request: ResolveRequest) -> Result<Vec<ZeroconfHost>, DiscoverError> {
        let ResolveRequest {
            options,
            callback,
            cancel,
            interfaces,
        } = request;
        let options = options.validated()?;

        match &self.native {
            Some(browser) => {
                if interfaces.is_some() {
                    return Err(DiscoverError::Unsupported(
                        NATIVE_INTERFACES_UNSUPPORTED.to_string(),
                    ));
                }
                resolve_native(browser, &options, callback.as_ref(), &cancel).await
            }
            None => {
                self.resolver
                    .resolve(&options, callback, &cancel, interfaces.as_deref())
                    .await
            }
        }
    }

    /// Group the hosts offering each service domain.
    pub async fn browse_domains(
        &self,
        request: BrowseDomainsRequest,
    ) -> Result<DomainLookup, DiscoverError> {
        let BrowseDomainsRequest {
            protocols,
            options,
            callback,
            cancel,
            interfaces,
        } = request;
        let options = options.validated()?;

        let Some(browser) = &self.native else {
            return self
                .resolver
                .browse_domains(&options, callback, &cancel, interfaces.as_deref())
                .await;
        };

        if interfaces.is_some() {
            return Err(DiscoverError::Unsupported(
                NATIVE_INTERFACES_UNSUPPORTED.to_string(),
            ));
        }

        let protocols: Vec<String> = match protocols {
            Some(protocols) => protocols,
            None => self.browse_domain_protocols().to_vec(),
        };
        if protocols.is_empty() {
            debug!("No browse-domain protocols configured");
            return Ok(DomainLookup::new());
        }

        let resolve_options = options.to_resolve_options(protocols).validated()?;
        let hosts = resolve_native(browser, &resolve_options, None, &cancel).await?;
        let lookup = expand_hosts(&hosts, callback.as_ref());

        debug!(
            hosts = hosts.len(),
            domains = lookup.len(),
            rows = lookup.row_count(),
            "Browse domains complete"
        );
        Ok(lookup)
    }

    /// Replace the protocol list browsed when a request names none.
    ///
    /// Blank entries are skipped. `None` is rejected.
    pub fn set_browse_domain_protocols<I, S>(&self, protocols: Option<I>) -> Result<(), DiscoverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(protocols) = protocols else {
            return Err(DiscoverError::invalid_argument(
                "protocols",
                "browse-domain protocol list must be provided",
            ));
        };
        let protocols: Vec<String> = protocols
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.trim().is_empty())
            .collect();

        debug!(count = protocols.len(), "Browse-domain protocols replaced");
        *self
            .browse_domain_protocols
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Arc::from(protocols);
        Ok(())
    }

    /// Snapshot of the configured browse-domain protocols.
    pub fn browse_domain_protocols(&self) -> Arc<[String]> {
        self.browse_domain_protocols
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Deliver announcements until `cancel` fires. Always uses the generic
    /// resolver.
    pub async fn listen_for_announcements(
        &self,
        callback: impl Fn(ServiceAnnouncement) + Send + Sync + 'static,
        cancel: CancellationToken,
    ) -> Result<(), DiscoverError> {
        let callback: AnnouncementCallback = Arc::new(callback);
        self.resolver.listen_for_announcements(callback, cancel).await
    }

    /// Start a periodic re-query listener on the generic resolver.
    pub fn create_listener(&self, options: ListenerOptions) -> Result<ResolverListener, DiscoverError> {
        Arc::clone(&self.resolver).create_listener(options)
    }
}

type NativeSlot = Arc<Mutex<Box<dyn ServiceBrowser>>>;
type NativeGuard = OwnedMutexGuard<Box<dyn ServiceBrowser>>;

/// Run a browser call on the blocking pool. Stopping a native search joins
/// its browse thread, which must not happen on a runtime worker.
async fn on_blocking_pool<T, F>(mut guard: NativeGuard, call: F) -> Result<(NativeGuard, T), DiscoverError>
where
    F: FnOnce(&mut dyn ServiceBrowser) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let value = call(&mut **guard);
        (guard, value)
    })
    .await
    .map_err(|e| DiscoverError::ServiceInfo(format!("native browser call failed: {e}")))
}

/// Run one scan per protocol on the native browser, holding it for the whole
/// campaign.
async fn resolve_native(
    browser: &NativeSlot,
    options: &ResolveOptions,
    callback: Option<&HostCallback>,
    cancel: &CancellationToken,
) -> Result<Vec<ZeroconfHost>, DiscoverError> {
    let mut guard = Arc::clone(browser).lock_owned().await;
    let _campaign = TimingGuard::campaign(BackendKind::Native.to_string());
    let mut hosts = Vec::new();

    for protocol in &options.protocols {
        let per_protocol = options.for_protocol(protocol);
        let (held, started) = on_blocking_pool(guard, move |browser| {
            browser.set_resolve_options(per_protocol)?;
            browser.start_service_search()
        })
        .await?;
        guard = held;
        started?;

        let scan = TimingGuard::scan(protocol.as_str(), options.scan_time);
        let cancelled = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(options.scan_time) => false,
        };
        drop(scan);

        if cancelled {
            let (_, stopped) = on_blocking_pool(guard, |browser| browser.stop_service_search()).await?;
            if let Err(e) = stopped {
                warn!(protocol = %protocol, error = %e, "Failed to stop cancelled search");
            }
            info!(protocol = %protocol, "Native resolve cancelled");
            return Err(DiscoverError::Cancelled);
        }

        let (held, found) = on_blocking_pool(guard, |browser| {
            browser.stop_service_search()?;
            Ok::<_, DiscoverError>(browser.return_results())
        })
        .await?;
        guard = held;
        let found = found?;
        debug!(protocol = %protocol, hosts = found.len(), "Native scan complete");

        if let Some(callback) = callback {
            for host in &found {
                callback(host);
            }
        }
        hosts.extend(found);
    }

    Ok(hosts)
}
