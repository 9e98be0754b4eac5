//! Generic resolver backed by the pure-Rust `mdns-sd` daemon.

use async_trait::async_trait;
use mdns_sd::{IfKind, ResolvedService, ServiceDaemon, ServiceEvent as MdnsEvent};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use zcswitch_util::TimingGuard;

use crate::backend::{
    AnnouncementCallback, BackendKind, DomainCallback, HostCallback, Resolver,
};
use crate::domains::{expand_hosts, DomainLookup};
use crate::error::DiscoverError;
use crate::host::{group_into_hosts, DiscoveredService, ServiceAnnouncement, ZeroconfHost};
use crate::listener::ResolverListener;
use crate::options::{
    BrowseDomainsOptions, InterfaceSelector, ListenerOptions, ResolveOptions, ScanQueryType,
    DEFAULT_RETRIES, DEFAULT_RETRY_DELAY,
};

/// DNS-SD meta-query enumerating the service types advertised on the link.
pub const META_QUERY: &str = "_services._dns-sd._udp.local.";

/// [`Resolver`] implementation on top of an `mdns-sd` [`ServiceDaemon`].
pub struct MdnsSdResolver {
    daemon: ServiceDaemon,
    /// Serialises queries that do not allow overlap.
    query_lock: Mutex<()>,
    /// One browse per service type at a time, overlapped or not.
    type_locks: TypeLocks,
}

impl MdnsSdResolver {
    /// Start an mDNS daemon listening on all interfaces.
    pub fn new() -> Result<Self, DiscoverError> {
        let daemon = ServiceDaemon::new()?;
        info!("mDNS daemon started");
        Ok(Self {
            daemon,
            query_lock: Mutex::new(()),
            type_locks: TypeLocks::default(),
        })
    }

    /// The daemon to query on: the shared one, or a dedicated one restricted
    /// to `interfaces`.
    fn scoped_daemon(
        &self,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<ScopedDaemon, DiscoverError> {
        let Some(interfaces) = interfaces else {
            return Ok(ScopedDaemon {
                daemon: self.daemon.clone(),
                owned: false,
            });
        };

        let daemon = ServiceDaemon::new()?;
        let scoped = ScopedDaemon {
            daemon,
            owned: true,
        };
        scoped.daemon.disable_interface(IfKind::All)?;
        for interface in interfaces {
            let kind = match interface {
                InterfaceSelector::Name(name) => IfKind::Name(name.clone()),
                InterfaceSelector::Addr(ip) => IfKind::Addr(*ip),
            };
            scoped.daemon.enable_interface(kind)?;
        }
        debug!(interfaces = ?interfaces, "Using interface-scoped mDNS daemon");
        Ok(scoped)
    }
}

#[async_trait]
impl Resolver for MdnsSdResolver {
    async fn resolve(
        &self,
        options: &ResolveOptions,
        callback: Option<HostCallback>,
        cancel: &CancellationToken,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<Vec<ZeroconfHost>, DiscoverError> {
        let options = options.clone().validated()?;
        let _exclusive = if options.allow_overlapped_queries {
            None
        } else {
            Some(self.query_lock.lock().await)
        };

        let scoped = self.scoped_daemon(interfaces)?;
        resolve_on(
            &scoped.daemon,
            &self.type_locks,
            &options,
            callback.as_ref(),
            cancel,
        )
        .await
    }

    async fn browse_domains(
        &self,
        options: &BrowseDomainsOptions,
        callback: Option<DomainCallback>,
        cancel: &CancellationToken,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<DomainLookup, DiscoverError> {
        let options = options.validated()?;
        let _exclusive = self.query_lock.lock().await;
        let scoped = self.scoped_daemon(interfaces)?;

        let types =
            discover_service_types(&scoped.daemon, &self.type_locks, &options, cancel).await?;
        if types.is_empty() {
            debug!("No service types answered the meta-query");
            return Ok(DomainLookup::new());
        }

        let resolve_options = options.to_resolve_options(types);
        let hosts = resolve_on(
            &scoped.daemon,
            &self.type_locks,
            &resolve_options,
            None,
            cancel,
        )
        .await?;
        Ok(expand_hosts(&hosts, callback.as_ref()))
    }

    async fn listen_for_announcements(
        &self,
        callback: AnnouncementCallback,
        cancel: CancellationToken,
    ) -> Result<(), DiscoverError> {
        // Queries on the shared daemon stop their browses when they finish,
        // which would end the streams followed here.
        let listening = ScopedDaemon {
            daemon: ServiceDaemon::new()?,
            owned: true,
        };
        let meta = browse_with_retry(
            &listening.daemon,
            META_QUERY,
            DEFAULT_RETRIES,
            DEFAULT_RETRY_DELAY,
            &cancel,
        )
        .await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<ServiceAnnouncement>();
        let forwarders = cancel.child_token();
        let mut browsed: Vec<String> = Vec::new();
        info!("Listening for service announcements");

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                Some(announcement) = rx.recv() => callback(announcement),
                event = meta.recv_async() => match event {
                    Ok(MdnsEvent::ServiceFound(_, service_type)) => {
                        if browsed.contains(&service_type) {
                            continue;
                        }
                        match listening.daemon.browse(&service_type) {
                            Ok(receiver) => {
                                debug!(service_type = %service_type, "Following service type");
                                tokio::spawn(forward_announcements(
                                    receiver,
                                    service_type.clone(),
                                    tx.clone(),
                                    forwarders.clone(),
                                ));
                                browsed.push(service_type);
                            }
                            Err(e) => {
                                warn!(service_type = %service_type, error = %e, "Failed to browse service type");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {
                        break Err(DiscoverError::Daemon(
                            "announcement stream closed".to_string(),
                        ))
                    }
                },
            }
        };

        forwarders.cancel();
        for service_type in browsed.iter().map(String::as_str).chain([META_QUERY]) {
            if let Err(e) = listening.daemon.stop_browse(service_type) {
                trace!(service_type, error = %e, "stop_browse failed");
            }
        }
        info!("Stopped listening for service announcements");
        result
    }

    fn create_listener(
        self: Arc<Self>,
        options: ListenerOptions,
    ) -> Result<ResolverListener, DiscoverError> {
        ResolverListener::spawn(self, options)
    }
}

impl Drop for MdnsSdResolver {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

/// A daemon handle that shuts down on drop when it was created for one call.
struct ScopedDaemon {
    daemon: ServiceDaemon,
    owned: bool,
}

impl Drop for ScopedDaemon {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.daemon.shutdown() {
                debug!(error = %e, "Scoped mDNS daemon shutdown failed");
            }
        }
    }
}

/// Scan each protocol in turn and group the answers into hosts.
async fn resolve_on(
    daemon: &ServiceDaemon,
    type_locks: &TypeLocks,
    options: &ResolveOptions,
    callback: Option<&HostCallback>,
    cancel: &CancellationToken,
) -> Result<Vec<ZeroconfHost>, DiscoverError> {
    let _campaign = TimingGuard::campaign(BackendKind::Generic.to_string());
    if options.query_type == ScanQueryType::Any {
        debug!("ANY scans are sent as PTR queries by the mDNS daemon");
    }

    let mut hosts = Vec::new();
    for protocol in &options.protocols {
        let _scan = TimingGuard::scan(protocol.as_str(), options.scan_time);
        let records = scan_protocol(daemon, type_locks, protocol, options, cancel).await?;
        let found = group_into_hosts(records);
        debug!(protocol = %protocol, hosts = found.len(), "Scan complete");

        if let Some(callback) = callback {
            for host in &found {
                callback(host);
            }
        }
        hosts.extend(found);
    }
    Ok(hosts)
}

/// Collect resolved instances of one service type for the scan window.
async fn scan_protocol(
    daemon: &ServiceDaemon,
    type_locks: &TypeLocks,
    protocol: &str,
    options: &ResolveOptions,
    cancel: &CancellationToken,
) -> Result<Vec<DiscoveredService>, DiscoverError> {
    let _browsing = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DiscoverError::Cancelled),
        guard = type_locks.acquire(protocol) => guard,
    };
    let receiver =
        browse_with_retry(daemon, protocol, options.retries, options.retry_delay, cancel).await?;
    let deadline = Instant::now() + options.scan_time;
    let mut found: Vec<DiscoveredService> = Vec::new();

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(DiscoverError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => break Ok(()),
            event = receiver.recv_async() => match event {
                Ok(MdnsEvent::ServiceResolved(resolved)) => {
                    trace!(fullname = resolved.get_fullname(), "Service resolved");
                    merge_record(&mut found, to_discovered(&resolved));
                }
                Ok(MdnsEvent::ServiceRemoved(_, fullname)) => {
                    found.retain(|r| r.fullname != fullname);
                }
                Ok(MdnsEvent::SearchStopped(_)) | Err(_) => break Err(stream_ended(protocol)),
                Ok(_) => {}
            },
        }
    };

    if let Err(e) = daemon.stop_browse(protocol) {
        trace!(protocol, error = %e, "stop_browse failed");
    }
    outcome.map(|_| found)
}

/// Enumerate advertised service types with the meta-query.
async fn discover_service_types(
    daemon: &ServiceDaemon,
    type_locks: &TypeLocks,
    options: &BrowseDomainsOptions,
    cancel: &CancellationToken,
) -> Result<Vec<String>, DiscoverError> {
    let _browsing = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DiscoverError::Cancelled),
        guard = type_locks.acquire(META_QUERY) => guard,
    };
    let _scan = TimingGuard::scan(META_QUERY, options.scan_time);
    let receiver =
        browse_with_retry(daemon, META_QUERY, options.retries, options.retry_delay, cancel).await?;
    let deadline = Instant::now() + options.scan_time;
    let mut types: Vec<String> = Vec::new();

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Err(DiscoverError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => break Ok(()),
            event = receiver.recv_async() => match event {
                Ok(MdnsEvent::ServiceFound(_, service_type)) => {
                    if !types.contains(&service_type) {
                        types.push(service_type);
                    }
                }
                Ok(MdnsEvent::SearchStopped(_)) | Err(_) => break Err(stream_ended(META_QUERY)),
                Ok(_) => {}
            },
        }
    };

    if let Err(e) = daemon.stop_browse(META_QUERY) {
        trace!(error = %e, "stop_browse failed");
    }
    debug!(types = types.len(), "Meta-query complete");
    outcome.map(|_| types)
}

fn stream_ended(service_type: &str) -> DiscoverError {
    DiscoverError::Daemon(format!(
        "browse of `{service_type}` ended before the scan window closed"
    ))
}

/// Per-service-type locks shared by every scan on a resolver.
///
/// The daemon keeps a single querier per service type, so a second browse
/// of a type replaces the first and stopping either one stops both.
#[derive(Debug, Default)]
struct TypeLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TypeLocks {
    async fn acquire(&self, service_type: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(service_type.to_ascii_lowercase())
                    .or_default(),
            )
        };
        lock.lock_owned().await
    }
}

/// Start a browse, retrying while the daemon refuses the request.
async fn browse_with_retry(
    daemon: &ServiceDaemon,
    service_type: &str,
    retries: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> Result<mdns_sd::Receiver<MdnsEvent>, DiscoverError> {
    let mut attempt = 1;
    loop {
        match daemon.browse(service_type) {
            Ok(receiver) => return Ok(receiver),
            Err(e) if attempt < retries => {
                warn!(
                    service_type,
                    attempt,
                    retries,
                    error = %e,
                    "Browse failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DiscoverError::Cancelled),
                    _ = tokio::time::sleep(retry_delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Forward resolved services of one type as announcements.
async fn forward_announcements(
    receiver: mdns_sd::Receiver<MdnsEvent>,
    service_type: String,
    tx: mpsc::UnboundedSender<ServiceAnnouncement>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = receiver.recv_async() => match event {
                Ok(MdnsEvent::ServiceResolved(resolved)) => {
                    for host in group_into_hosts(vec![to_discovered(&resolved)]) {
                        let announcement = ServiceAnnouncement {
                            service_type: service_type.clone(),
                            host,
                        };
                        if tx.send(announcement).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
}

/// Replace an earlier answer for the same instance, or append.
fn merge_record(found: &mut Vec<DiscoveredService>, record: DiscoveredService) {
    match found.iter_mut().find(|r| r.fullname == record.fullname) {
        Some(existing) => *existing = record,
        None => found.push(record),
    }
}

fn to_discovered(resolved: &ResolvedService) -> DiscoveredService {
    // IPv4 first, then IPv6
    let mut addresses: Vec<IpAddr> = resolved
        .get_addresses()
        .iter()
        .map(|a| a.to_ip_addr())
        .collect();
    addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
    addresses.dedup();

    let properties: BTreeMap<String, String> = resolved
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    DiscoveredService {
        fullname: resolved.get_fullname().to_string(),
        ty_domain: resolved.ty_domain.clone(),
        hostname: resolved.get_hostname().to_string(),
        addresses,
        port: resolved.get_port(),
        properties,
    }
}
