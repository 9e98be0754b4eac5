//! Platform-native service browser using Bonjour/Avahi through `zeroconf`.
//!
//! The native handles are not `Send`, so every search owns a dedicated
//! thread that creates the browser and polls its event loop until the
//! search is stopped.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use zeroconf::prelude::*;
use zeroconf::{BrowserEvent, MdnsBrowser, ServiceType};

use crate::backend::ServiceBrowser;
use crate::error::DiscoverError;
use crate::host::{group_into_hosts, DiscoveredService, ZeroconfHost};
use crate::options::ResolveOptions;

/// How long each event-loop poll blocks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Collected = Arc<Mutex<Vec<DiscoveredService>>>;

/// [`ServiceBrowser`] over the operating system's DNS-SD service.
#[derive(Default)]
pub struct NativeBrowser {
    options: Option<ResolveOptions>,
    search: Option<ActiveSearch>,
    results: Vec<DiscoveredService>,
}

struct ActiveSearch {
    stop: Arc<AtomicBool>,
    collected: Collected,
    thread: JoinHandle<Result<(), String>>,
}

impl NativeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn protocol(&self) -> Result<&str, DiscoverError> {
        self.options
            .as_ref()
            .and_then(|o| o.protocols.first())
            .map(String::as_str)
            .ok_or_else(|| {
                DiscoverError::invalid_argument("protocols", "no service type configured")
            })
    }
}

impl ServiceBrowser for NativeBrowser {
    fn set_resolve_options(&mut self, options: ResolveOptions) -> Result<(), DiscoverError> {
        let protocol = options.protocols.first().ok_or_else(|| {
            DiscoverError::invalid_argument("protocols", "at least one protocol is required")
        })?;
        let (name, transport) = split_service_type(protocol)?;
        ServiceType::new(&name, &transport)?;

        self.stop_service_search()?;
        self.results.clear();
        self.options = Some(options);
        Ok(())
    }

    fn start_service_search(&mut self) -> Result<(), DiscoverError> {
        self.stop_service_search()?;

        let protocol = self.protocol()?.to_string();
        let (name, transport) = split_service_type(&protocol)?;
        let stop = Arc::new(AtomicBool::new(false));
        let collected: Collected = Arc::new(Mutex::new(Vec::new()));

        info!(protocol = %protocol, "Starting native service search");

        let thread = std::thread::Builder::new()
            .name("zcswitch-native-browse".to_string())
            .spawn({
                let stop = stop.clone();
                let collected = collected.clone();
                move || run_search(&name, &transport, &protocol, stop, collected)
            })
            .map_err(|e| DiscoverError::ServiceInfo(format!("failed to spawn browse thread: {e}")))?;

        self.search = Some(ActiveSearch {
            stop,
            collected,
            thread,
        });
        Ok(())
    }

    fn stop_service_search(&mut self) -> Result<(), DiscoverError> {
        let Some(search) = self.search.take() else {
            return Ok(());
        };

        search.stop.store(true, Ordering::SeqCst);
        let outcome = search
            .thread
            .join()
            .map_err(|_| DiscoverError::ServiceInfo("browse thread panicked".to_string()))?;

        let collected = std::mem::take(
            &mut *search
                .collected
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        debug!(services = collected.len(), "Native service search stopped");
        self.results = collected;
        outcome.map_err(DiscoverError::ServiceInfo)
    }

    fn return_results(&mut self) -> Vec<ZeroconfHost> {
        group_into_hosts(std::mem::take(&mut self.results))
    }
}

impl Drop for NativeBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.stop_service_search() {
            warn!(error = %e, "Failed to stop native search on drop");
        }
    }
}

fn run_search(
    name: &str,
    transport: &str,
    protocol: &str,
    stop: Arc<AtomicBool>,
    collected: Collected,
) -> Result<(), String> {
    let service_type = ServiceType::new(name, transport).map_err(|e| e.to_string())?;
    let mut browser = MdnsBrowser::new(service_type);

    let ty_domain = protocol.to_string();
    browser.set_service_callback(Box::new(move |result, _context| {
        on_service_event(result, &ty_domain, &collected);
    }));

    let event_loop = browser.browse_services().map_err(|e| e.to_string())?;

    while !stop.load(Ordering::SeqCst) {
        event_loop.poll(POLL_INTERVAL).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn on_service_event(
    result: zeroconf::Result<BrowserEvent>,
    ty_domain: &str,
    collected: &Collected,
) {
    match result {
        Ok(BrowserEvent::Add(discovery)) => {
            trace!(
                name = %discovery.name(),
                domain = %discovery.domain(),
                "Service discovered"
            );
            let Some(record) = parse_discovery(&discovery, ty_domain) else {
                debug!(name = %discovery.name(), address = %discovery.address(), "Skipping unparseable discovery");
                return;
            };

            let mut collected = collected.lock().unwrap_or_else(|e| e.into_inner());
            match collected.iter_mut().find(|r| r.fullname == record.fullname) {
                Some(existing) => {
                    for ip in &record.addresses {
                        if !existing.addresses.contains(ip) {
                            existing.addresses.push(*ip);
                        }
                    }
                }
                None => collected.push(record),
            }
        }
        Ok(BrowserEvent::Remove(removal)) => {
            debug!(name = %removal.name(), "Service removed");
            let prefix = format!("{}.", removal.name());
            collected
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|r| !r.fullname.starts_with(&prefix));
        }
        Err(e) => {
            warn!(error = %e, "Native service discovery error");
        }
    }
}

fn parse_discovery(
    discovery: &zeroconf::ServiceDiscovery,
    ty_domain: &str,
) -> Option<DiscoveredService> {
    let ip: IpAddr = discovery.address().parse().ok()?;

    let properties: BTreeMap<String, String> = discovery
        .txt()
        .as_ref()
        .map(|txt| txt.to_map().into_iter().collect())
        .unwrap_or_default();

    Some(DiscoveredService {
        fullname: format!("{}.{}", discovery.name(), ty_domain),
        ty_domain: ty_domain.to_string(),
        hostname: discovery.host_name().to_string(),
        addresses: vec![ip],
        port: *discovery.port(),
        properties,
    })
}

/// Split "_http._tcp.local." into ("http", "tcp").
fn split_service_type(protocol: &str) -> Result<(String, String), DiscoverError> {
    let labels: Vec<&str> = protocol.split('.').filter(|l| !l.is_empty()).collect();
    let transport = labels
        .iter()
        .position(|l| l.eq_ignore_ascii_case("_tcp") || l.eq_ignore_ascii_case("_udp"));

    match transport {
        Some(t) if t > 0 => {
            let name = labels[t - 1].trim_start_matches('_');
            let transport = labels[t].trim_start_matches('_').to_ascii_lowercase();
            if name.is_empty() {
                return Err(DiscoverError::invalid_argument(
                    "protocols",
                    format!("missing service name in `{protocol}`"),
                ));
            }
            Ok((name.to_string(), transport))
        }
        _ => Err(DiscoverError::invalid_argument(
            "protocols",
            format!("`{protocol}` is not a `_service._proto.domain.` service type"),
        )),
    }
}
