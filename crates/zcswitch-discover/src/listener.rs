//! Periodic re-query listener.
//!
//! A [`ResolverListener`] re-resolves its protocols every query interval and
//! reports hosts that appear, and hosts that have not answered for
//! `pings_until_remove` consecutive cycles.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Resolver;
use crate::error::DiscoverError;
use crate::host::ZeroconfHost;
use crate::options::{ListenerOptions, ResolveOptions};

/// Channel capacity for listener events.
const EVENT_CAPACITY: usize = 64;

/// A change observed by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// A host answered for the first time, or again after being lost.
    Found(ZeroconfHost),
    /// A host missed `pings_until_remove` consecutive re-queries.
    Lost(ZeroconfHost),
}

/// Handle to a running listener. Dropping it stops the listener.
pub struct ResolverListener {
    events: broadcast::Sender<ListenerEvent>,
    cancel: CancellationToken,
    options: ListenerOptions,
}

impl ResolverListener {
    /// Validate `options` and start re-querying through `resolver`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        resolver: Arc<dyn Resolver>,
        options: ListenerOptions,
    ) -> Result<Self, DiscoverError> {
        options.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DiscoverError::Listener(format!("no tokio runtime: {e}")))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        info!(
            protocols = ?options.protocols,
            query_interval_ms = options.query_interval.as_millis() as u64,
            pings_until_remove = options.pings_until_remove,
            "Starting resolver listener"
        );

        runtime.spawn(run(
            resolver,
            options.resolve_options(),
            options.query_interval,
            options.pings_until_remove,
            events.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            events,
            cancel,
            options,
        })
    }

    /// Subscribe to listener events.
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// The options this listener was started with.
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Stop re-querying.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ResolverListener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    resolver: Arc<dyn Resolver>,
    options: ResolveOptions,
    query_interval: Duration,
    pings_until_remove: u32,
    events: broadcast::Sender<ListenerEvent>,
    cancel: CancellationToken,
) {
    let mut tracker = PresenceTracker::new(pings_until_remove);

    loop {
        match resolver.resolve(&options, None, &cancel, None).await {
            Ok(hosts) => {
                for event in tracker.observe(hosts) {
                    // No subscribers is fine; events are dropped.
                    let _ = events.send(event);
                }
            }
            Err(DiscoverError::Cancelled) => break,
            Err(e) => warn!(error = %e, "Listener re-query failed"),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(query_interval) => {}
        }
    }

    debug!("Resolver listener stopped");
}

/// Tracks which hosts answered recent re-queries.
#[derive(Debug)]
pub(crate) struct PresenceTracker {
    pings_until_remove: u32,
    known: Vec<TrackedHost>,
}

#[derive(Debug)]
struct TrackedHost {
    host: ZeroconfHost,
    missed: u32,
}

impl PresenceTracker {
    pub(crate) fn new(pings_until_remove: u32) -> Self {
        Self {
            pings_until_remove,
            known: Vec::new(),
        }
    }

    /// Record one re-query cycle and return the resulting events.
    pub(crate) fn observe(&mut self, hosts: Vec<ZeroconfHost>) -> Vec<ListenerEvent> {
        let mut events = Vec::new();

        for tracked in &mut self.known {
            tracked.missed += 1;
        }

        for host in hosts {
            match self.known.iter_mut().find(|t| t.host.id() == host.id()) {
                Some(tracked) => {
                    tracked.missed = 0;
                    tracked.host = host;
                }
                None => {
                    debug!(host = %host.id(), "Listener found host");
                    events.push(ListenerEvent::Found(host.clone()));
                    self.known.push(TrackedHost { host, missed: 0 });
                }
            }
        }

        let pings_until_remove = self.pings_until_remove;
        let (lost, kept): (Vec<_>, Vec<_>) = self
            .known
            .drain(..)
            .partition(|t| t.missed >= pings_until_remove);
        self.known = kept;

        for tracked in lost {
            debug!(host = %tracked.host.id(), "Listener lost host");
            events.push(ListenerEvent::Lost(tracked.host));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> ZeroconfHost {
        ZeroconfHost::builder(id).build()
    }

    #[test]
    fn test_new_host_is_found_once() {
        let mut tracker = PresenceTracker::new(2);
        assert_eq!(
            tracker.observe(vec![host("a")]),
            vec![ListenerEvent::Found(host("a"))]
        );
        assert!(tracker.observe(vec![host("a")]).is_empty());
    }

    #[test]
    fn test_host_lost_after_missed_pings() {
        let mut tracker = PresenceTracker::new(2);
        tracker.observe(vec![host("a"), host("b")]);

        assert!(tracker.observe(vec![host("b")]).is_empty());
        assert_eq!(
            tracker.observe(vec![host("b")]),
            vec![ListenerEvent::Lost(host("a"))]
        );
        assert!(tracker.observe(vec![host("b")]).is_empty());
    }

    #[test]
    fn test_answer_resets_missed_count() {
        let mut tracker = PresenceTracker::new(2);
        tracker.observe(vec![host("a")]);
        assert!(tracker.observe(vec![]).is_empty());
        assert!(tracker.observe(vec![host("a")]).is_empty());
        assert!(tracker.observe(vec![]).is_empty());
        assert_eq!(tracker.observe(vec![]), vec![ListenerEvent::Lost(host("a"))]);
    }

    #[test]
    fn test_lost_host_can_be_found_again() {
        let mut tracker = PresenceTracker::new(1);
        tracker.observe(vec![host("a")]);
        assert_eq!(tracker.observe(vec![]), vec![ListenerEvent::Lost(host("a"))]);
        assert_eq!(
            tracker.observe(vec![host("a")]),
            vec![ListenerEvent::Found(host("a"))]
        );
    }
}
