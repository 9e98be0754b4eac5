//! Scripted discovery backends.
//!
//! Both mocks keep their state behind `Arc<Mutex<..>>` so a test can hand a
//! clone to the dispatcher and keep another to script answers and inspect
//! the recorded calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use zcswitch_discover::{
    expand_hosts, AnnouncementCallback, BrowseDomainsOptions, DiscoverError, DomainCallback,
    DomainLookup, HostCallback, InterfaceSelector, ListenerOptions, ResolveOptions, Resolver,
    ResolverListener, ServiceAnnouncement, ServiceBrowser, ZeroconfHost,
};

/// A call received by [`MockResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverCall {
    Resolve {
        protocols: Vec<String>,
        scan_time: Duration,
        interfaces: Option<Vec<InterfaceSelector>>,
    },
    BrowseDomains {
        scan_time: Duration,
        interfaces: Option<Vec<InterfaceSelector>>,
    },
    ListenForAnnouncements,
    CreateListener {
        protocols: Vec<String>,
    },
}

#[derive(Default)]
struct ResolverState {
    hosts: HashMap<String, Vec<ZeroconfHost>>,
    announcements: Vec<ServiceAnnouncement>,
    failure: Option<String>,
    calls: Vec<ResolverCall>,
}

/// A [`Resolver`] answering from scripted hosts.
///
/// `resolve` waits `scan_time` per protocol (honouring cancellation) and
/// returns the hosts scripted for each protocol. `browse_domains` expands
/// every scripted host.
///
/// # Example
///
/// ```rust
/// use zcswitch_test_utils::fixtures::printer_host;
/// use zcswitch_test_utils::mocks::MockResolver;
///
/// let resolver = MockResolver::new().with_hosts("_ipp._tcp.local.", vec![printer_host()]);
/// assert_eq!(resolver.calls().len(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockResolver {
    state: Arc<Mutex<ResolverState>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the hosts returned for `protocol`.
    pub fn with_hosts(self, protocol: &str, hosts: Vec<ZeroconfHost>) -> Self {
        self.set_hosts(protocol, hosts);
        self
    }

    /// Script an announcement delivered by `listen_for_announcements`.
    pub fn with_announcement(self, announcement: ServiceAnnouncement) -> Self {
        self.state.lock().unwrap().announcements.push(announcement);
        self
    }

    /// Replace the hosts returned for `protocol` from now on.
    pub fn set_hosts(&self, protocol: &str, hosts: Vec<ZeroconfHost>) {
        self.state
            .lock()
            .unwrap()
            .hosts
            .insert(protocol.to_string(), hosts);
    }

    /// Make every following resolve fail with a daemon error.
    pub fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    /// Let resolves succeed again.
    pub fn clear_failure(&self) {
        self.state.lock().unwrap().failure = None;
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<ResolverCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: ResolverCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn all_hosts(&self) -> Vec<ZeroconfHost> {
        let state = self.state.lock().unwrap();
        let mut protocols: Vec<&String> = state.hosts.keys().collect();
        protocols.sort();
        protocols
            .into_iter()
            .flat_map(|p| state.hosts[p].iter().cloned())
            .collect()
    }
}

async fn wait(scan_time: Duration, cancel: &CancellationToken) -> Result<(), DiscoverError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiscoverError::Cancelled),
        _ = tokio::time::sleep(scan_time) => Ok(()),
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn resolve(
        &self,
        options: &ResolveOptions,
        callback: Option<HostCallback>,
        cancel: &CancellationToken,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<Vec<ZeroconfHost>, DiscoverError> {
        self.record(ResolverCall::Resolve {
            protocols: options.protocols.clone(),
            scan_time: options.scan_time,
            interfaces: interfaces.map(<[_]>::to_vec),
        });

        let mut hosts = Vec::new();
        for protocol in &options.protocols {
            wait(options.scan_time, cancel).await?;

            let (failure, found) = {
                let state = self.state.lock().unwrap();
                (
                    state.failure.clone(),
                    state.hosts.get(protocol).cloned().unwrap_or_default(),
                )
            };
            if let Some(message) = failure {
                return Err(DiscoverError::Daemon(message));
            }
            if let Some(callback) = &callback {
                found.iter().for_each(|h| callback(h));
            }
            hosts.extend(found);
        }
        Ok(hosts)
    }

    async fn browse_domains(
        &self,
        options: &BrowseDomainsOptions,
        callback: Option<DomainCallback>,
        cancel: &CancellationToken,
        interfaces: Option<&[InterfaceSelector]>,
    ) -> Result<DomainLookup, DiscoverError> {
        self.record(ResolverCall::BrowseDomains {
            scan_time: options.scan_time,
            interfaces: interfaces.map(<[_]>::to_vec),
        });
        wait(options.scan_time, cancel).await?;
        Ok(expand_hosts(&self.all_hosts(), callback.as_ref()))
    }

    async fn listen_for_announcements(
        &self,
        callback: AnnouncementCallback,
        cancel: CancellationToken,
    ) -> Result<(), DiscoverError> {
        self.record(ResolverCall::ListenForAnnouncements);
        let announcements = self.state.lock().unwrap().announcements.clone();
        for announcement in announcements {
            callback(announcement);
        }
        cancel.cancelled().await;
        Ok(())
    }

    fn create_listener(
        self: Arc<Self>,
        options: ListenerOptions,
    ) -> Result<ResolverListener, DiscoverError> {
        self.record(ResolverCall::CreateListener {
            protocols: options.protocols.clone(),
        });
        ResolverListener::spawn(self, options)
    }
}

/// A call received by [`MockServiceBrowser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCall {
    SetOptions(ResolveOptions),
    Start { protocol: String, at: Instant },
    Stop { protocol: String, at: Instant },
    ReturnResults { protocol: String },
}

#[derive(Default)]
struct BrowserState {
    hosts: HashMap<String, Vec<ZeroconfHost>>,
    options: Option<ResolveOptions>,
    searching: bool,
    stop_delay: Duration,
    calls: Vec<BrowserCall>,
}

impl BrowserState {
    fn protocol(&self) -> String {
        self.options
            .as_ref()
            .and_then(|o| o.protocols.first().cloned())
            .unwrap_or_default()
    }
}

/// A [`ServiceBrowser`] answering from scripted hosts and recording every
/// call with its virtual timestamp.
///
/// Starting a search while one is active fails, as the platform browser
/// would.
#[derive(Clone, Default)]
pub struct MockServiceBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockServiceBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the hosts found when searching for `protocol`.
    pub fn with_hosts(self, protocol: &str, hosts: Vec<ZeroconfHost>) -> Self {
        self.state
            .lock()
            .unwrap()
            .hosts
            .insert(protocol.to_string(), hosts);
        self
    }

    /// Block the calling thread for `delay` on every stop, like a platform
    /// browser joining its browse thread.
    pub fn with_stop_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().stop_delay = delay;
        self
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<BrowserCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Whether a search is currently running.
    pub fn is_searching(&self) -> bool {
        self.state.lock().unwrap().searching
    }

    /// Protocols searched, in the order searches were started.
    pub fn started_protocols(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BrowserCall::Start { protocol, .. } => Some(protocol),
                _ => None,
            })
            .collect()
    }

    /// Time between each start and the stop that followed it.
    pub fn search_windows(&self) -> Vec<Duration> {
        let mut windows = Vec::new();
        let mut started: Option<Instant> = None;
        for call in self.calls() {
            match call {
                BrowserCall::Start { at, .. } => started = Some(at),
                BrowserCall::Stop { at, .. } => {
                    if let Some(start) = started.take() {
                        windows.push(at - start);
                    }
                }
                _ => {}
            }
        }
        windows
    }
}

impl ServiceBrowser for MockServiceBrowser {
    fn set_resolve_options(&mut self, options: ResolveOptions) -> Result<(), DiscoverError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BrowserCall::SetOptions(options.clone()));
        state.options = Some(options);
        Ok(())
    }

    fn start_service_search(&mut self) -> Result<(), DiscoverError> {
        let mut state = self.state.lock().unwrap();
        if state.searching {
            return Err(DiscoverError::ServiceInfo(
                "search already in progress".to_string(),
            ));
        }
        let protocol = state.protocol();
        state.searching = true;
        state.calls.push(BrowserCall::Start {
            protocol,
            at: Instant::now(),
        });
        Ok(())
    }

    fn stop_service_search(&mut self) -> Result<(), DiscoverError> {
        let delay = self.state.lock().unwrap().stop_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock().unwrap();
        let protocol = state.protocol();
        state.searching = false;
        state.calls.push(BrowserCall::Stop {
            protocol,
            at: Instant::now(),
        });
        Ok(())
    }

    fn return_results(&mut self) -> Vec<ZeroconfHost> {
        let mut state = self.state.lock().unwrap();
        let protocol = state.protocol();
        let hosts = state.hosts.get(&protocol).cloned().unwrap_or_default();
        state.calls.push(BrowserCall::ReturnResults { protocol });
        hosts
    }
}
