//! Dispatcher behaviour against scripted backends.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zcswitch_discover::{
    BackendKind, BrowseDomainsRequest, Capability, DiscoverError, InterfaceSelector,
    ResolveRequest, ZeroconfHost, ZeroconfSwitch,
};
use zcswitch_test_utils::fixtures::{announcement, nas_host, printer_host, speaker_host};
use zcswitch_test_utils::{BrowserCall, MockResolver, MockServiceBrowser, ResolverCall};

const HTTP: &str = "_http._tcp.local.";
const PRINTER: &str = "printer._tcp.local.";
const SPEAKER: &str = "_audioplayer-discovery._tcp.local.";

fn native_switch(browser: &MockServiceBrowser, resolver: &MockResolver) -> ZeroconfSwitch {
    ZeroconfSwitch::builder(Arc::new(resolver.clone()))
        .native_browser(browser.clone())
        .capability(Capability::native())
        .build()
}

fn generic_switch(resolver: &MockResolver) -> ZeroconfSwitch {
    ZeroconfSwitch::builder(Arc::new(resolver.clone()))
        .capability(Capability::generic())
        .build()
}

fn scripted_browser() -> MockServiceBrowser {
    MockServiceBrowser::new()
        .with_hosts(HTTP, vec![nas_host()])
        .with_hosts(PRINTER, vec![printer_host()])
        .with_hosts(SPEAKER, vec![speaker_host()])
}

#[test]
fn test_backend_selection() {
    let resolver = MockResolver::new();
    let browser = MockServiceBrowser::new();

    assert_eq!(native_switch(&browser, &resolver).backend(), BackendKind::Native);
    assert_eq!(generic_switch(&resolver).backend(), BackendKind::Generic);

    let without_browser = ZeroconfSwitch::builder(Arc::new(resolver.clone()))
        .capability(Capability::native())
        .build();
    assert_eq!(without_browser.backend(), BackendKind::Generic);

    let browser_not_preferred = ZeroconfSwitch::builder(Arc::new(resolver))
        .native_browser(browser)
        .capability(Capability::generic())
        .build();
    assert_eq!(browser_not_preferred.backend(), BackendKind::Generic);
}

#[tokio::test(start_paused = true)]
async fn test_native_resolve_runs_one_cycle_per_protocol() {
    let browser = scripted_browser();
    let resolver = MockResolver::new();
    let switch = native_switch(&browser, &resolver);

    let hosts = switch
        .resolve(
            ResolveRequest::protocols([HTTP, PRINTER, SPEAKER])
                .with_scan_time(Duration::from_millis(500)),
        )
        .await
        .unwrap();

    assert_eq!(hosts, vec![nas_host(), printer_host(), speaker_host()]);
    assert_eq!(browser.started_protocols(), vec![HTTP, PRINTER, SPEAKER]);
    assert_eq!(
        browser.search_windows(),
        vec![Duration::from_millis(500); 3]
    );
    assert!(!browser.is_searching());
    assert!(resolver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_native_resolve_copies_options_per_protocol() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());

    switch
        .resolve(
            ResolveRequest::protocols([HTTP, PRINTER])
                .with_scan_time(Duration::from_millis(250))
                .with_retries(4)
                .with_retry_delay(Duration::from_millis(100))
                .with_overlapped_queries(true),
        )
        .await
        .unwrap();

    let set: Vec<_> = browser
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            BrowserCall::SetOptions(options) => Some(options),
            _ => None,
        })
        .collect();
    assert_eq!(set.len(), 2);
    for (options, protocol) in set.iter().zip([HTTP, PRINTER]) {
        assert_eq!(options.protocols, vec![protocol.to_string()]);
        assert_eq!(options.scan_time, Duration::from_millis(250));
        assert_eq!(options.retries, 4);
        assert_eq!(options.retry_delay, Duration::from_millis(100));
        assert!(options.allow_overlapped_queries);
    }
}

#[tokio::test(start_paused = true)]
async fn test_native_resolve_zero_scan_time_uses_default() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());

    switch
        .resolve(ResolveRequest::protocol(HTTP).with_scan_time(Duration::ZERO))
        .await
        .unwrap();

    assert_eq!(browser.search_windows(), vec![Duration::from_secs(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_native_resolve_does_not_deduplicate() {
    let browser = MockServiceBrowser::new()
        .with_hosts(HTTP, vec![nas_host()])
        .with_hosts("_smb._tcp.local.", vec![nas_host()]);
    let switch = native_switch(&browser, &MockResolver::new());

    let hosts = switch
        .resolve(ResolveRequest::protocols([HTTP, "_smb._tcp.local."]))
        .await
        .unwrap();
    assert_eq!(hosts, vec![nas_host(), nas_host()]);
}

#[tokio::test(start_paused = true)]
async fn test_callback_invoked_once_per_host() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let hosts = switch
        .resolve(
            ResolveRequest::protocols([PRINTER, HTTP])
                .on_host(move |host: &ZeroconfHost| sink.lock().unwrap().push(host.id().to_string())),
        )
        .await
        .unwrap();

    assert_eq!(hosts.len(), 2);
    assert_eq!(*seen.lock().unwrap(), vec!["printer.local", "nas.local"]);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_options_fail_before_any_backend_call() {
    let browser = scripted_browser();
    let resolver = MockResolver::new();

    for switch in [native_switch(&browser, &resolver), generic_switch(&resolver)] {
        let err = switch
            .resolve(ResolveRequest::protocol(HTTP).with_retries(0))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoverError::InvalidArgument { name: "retries", .. }));

        let err = switch
            .resolve(ResolveRequest::protocol(HTTP).with_retry_delay(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoverError::InvalidArgument { name: "retry_delay", .. }));

        let err = switch
            .resolve(ResolveRequest::protocols(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoverError::InvalidArgument { name: "protocols", .. }));

        let err = switch
            .resolve(ResolveRequest::protocols([HTTP, " "]))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = switch
            .browse_domains(BrowseDomainsRequest::new().protocols([HTTP]).with_retries(0))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    assert!(browser.calls().is_empty());
    assert!(resolver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_native_rejects_interface_filter() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());
    let en0: InterfaceSelector = "en0".parse().unwrap();

    let err = switch
        .resolve(ResolveRequest::protocol(HTTP).on_interfaces([en0.clone()]))
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoverError::Unsupported(_)));

    let err = switch
        .browse_domains(BrowseDomainsRequest::new().protocols([HTTP]).on_interfaces([en0]))
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoverError::Unsupported(_)));

    assert!(browser.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_campaign_returns_no_partial_results() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1200)).await;
        trigger.cancel();
    });

    let err = switch
        .resolve(
            ResolveRequest::protocols([HTTP, PRINTER, SPEAKER])
                .with_scan_time(Duration::from_millis(500))
                .with_cancellation(cancel),
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(browser.started_protocols(), vec![HTTP, PRINTER, SPEAKER]);
    assert!(!browser.is_searching());
    assert_eq!(
        browser.search_windows(),
        vec![
            Duration::from_millis(500),
            Duration::from_millis(500),
            Duration::from_millis(200),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_native_resolves_are_serialised() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());

    let (first, second) = tokio::join!(
        switch.resolve(ResolveRequest::protocols([HTTP, PRINTER])),
        switch.resolve(ResolveRequest::protocol(SPEAKER)),
    );

    assert_eq!(first.unwrap().len(), 2);
    assert_eq!(second.unwrap().len(), 1);
    assert_eq!(browser.started_protocols(), vec![HTTP, PRINTER, SPEAKER]);
}

// Real time on a single-threaded runtime: a stop that blocks its thread must
// not hold up other tasks.
#[tokio::test]
async fn test_slow_native_stop_does_not_block_the_runtime() {
    let browser = MockServiceBrowser::new()
        .with_hosts(HTTP, vec![nas_host()])
        .with_stop_delay(Duration::from_millis(400));
    let switch = native_switch(&browser, &MockResolver::new());
    let started = std::time::Instant::now();

    let ticker = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        started.elapsed()
    };
    let resolve = switch.resolve(
        ResolveRequest::protocol(HTTP).with_scan_time(Duration::from_millis(100)),
    );

    let (woke, hosts) = tokio::join!(ticker, resolve);

    assert_eq!(hosts.unwrap().len(), 1);
    // The stop runs from 100ms to 500ms.
    assert!(woke < Duration::from_millis(400), "ticker woke after {woke:?}");
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(!browser.is_searching());
}

#[tokio::test(start_paused = true)]
async fn test_generic_resolve_is_forwarded() {
    let resolver = MockResolver::new().with_hosts(HTTP, vec![nas_host()]);
    let switch = generic_switch(&resolver);
    let wlan: InterfaceSelector = "192.168.1.4".parse().unwrap();

    let hosts = switch
        .resolve(
            ResolveRequest::protocol(HTTP)
                .with_scan_time(Duration::ZERO)
                .on_interfaces([wlan.clone()]),
        )
        .await
        .unwrap();

    assert_eq!(hosts, vec![nas_host()]);
    assert_eq!(
        resolver.calls(),
        vec![ResolverCall::Resolve {
            protocols: vec![HTTP.to_string()],
            scan_time: Duration::from_secs(2),
            interfaces: Some(vec![wlan]),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_generic_resolve_propagates_backend_errors() {
    let resolver = MockResolver::new();
    resolver.fail_with("socket busy");
    let switch = generic_switch(&resolver);

    let err = switch.resolve(ResolveRequest::protocol(HTTP)).await.unwrap_err();
    assert!(matches!(err, DiscoverError::Daemon(m) if m == "socket busy"));
}

#[tokio::test(start_paused = true)]
async fn test_native_browse_domains_single_host_example() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());
    switch.set_browse_domain_protocols(Some([PRINTER])).unwrap();

    let lookup = switch.browse_domains(BrowseDomainsRequest::new()).await.unwrap();

    assert_eq!(lookup.len(), 1);
    assert_eq!(
        lookup.get(PRINTER).unwrap(),
        &["10.0.0.5: _tcp".to_string(), "10.0.0.6: _tcp".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_native_browse_domains_is_a_cross_product() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());
    let rows: Arc<Mutex<Vec<(String, IpAddr)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = rows.clone();

    let lookup = switch
        .browse_domains(
            BrowseDomainsRequest::new()
                .protocols([HTTP, PRINTER])
                .on_domain(move |key: &str, ip: &IpAddr| {
                    sink.lock().unwrap().push((key.to_string(), *ip))
                }),
        )
        .await
        .unwrap();

    // nas: 2 services x 1 address, printer: 1 service x 2 addresses
    assert_eq!(lookup.row_count(), 4);
    assert_eq!(rows.lock().unwrap().len(), 4);
    assert_eq!(
        lookup.keys().collect::<Vec<_>>(),
        vec!["_http._tcp.local.", "_smb._tcp.local.", PRINTER]
    );
    assert_eq!(
        lookup.get("_smb._tcp.local.").unwrap(),
        &["10.0.0.2: _smb._tcp".to_string()]
    );
    assert_eq!(browser.started_protocols(), vec![HTTP, PRINTER]);
}

#[tokio::test(start_paused = true)]
async fn test_browse_without_configured_protocols_is_empty() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());

    assert!(switch.browse_domain_protocols().is_empty());
    let lookup = switch.browse_domains(BrowseDomainsRequest::new()).await.unwrap();
    assert!(lookup.is_empty());
    assert!(browser.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_set_browse_domain_protocols() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());

    let err = switch
        .set_browse_domain_protocols(None::<Vec<String>>)
        .unwrap_err();
    assert!(err.is_invalid_argument());

    switch
        .set_browse_domain_protocols(Some(["", HTTP, "  "]))
        .unwrap();
    assert_eq!(&*switch.browse_domain_protocols(), &[HTTP.to_string()]);

    switch
        .set_browse_domain_protocols(Some(Vec::<String>::new()))
        .unwrap();
    let lookup = switch.browse_domains(BrowseDomainsRequest::new()).await.unwrap();
    assert!(lookup.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_protocols_override_configured_list() {
    let browser = scripted_browser();
    let switch = native_switch(&browser, &MockResolver::new());
    switch.set_browse_domain_protocols(Some([HTTP])).unwrap();

    let lookup = switch
        .browse_domains(BrowseDomainsRequest::new().protocols([PRINTER]))
        .await
        .unwrap();

    assert_eq!(lookup.keys().collect::<Vec<_>>(), vec![PRINTER]);
    assert_eq!(browser.started_protocols(), vec![PRINTER]);
}

#[tokio::test(start_paused = true)]
async fn test_generic_browse_domains_is_forwarded() {
    let resolver = MockResolver::new().with_hosts(PRINTER, vec![printer_host()]);
    let switch = generic_switch(&resolver);

    let lookup = switch.browse_domains(BrowseDomainsRequest::new()).await.unwrap();

    assert_eq!(lookup.row_count(), 2);
    assert!(matches!(
        resolver.calls().as_slice(),
        [ResolverCall::BrowseDomains { interfaces: None, .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_announcements_always_use_generic_resolver() {
    let browser = scripted_browser();
    let resolver = MockResolver::new()
        .with_announcement(announcement(HTTP, nas_host()))
        .with_announcement(announcement(PRINTER, printer_host()));
    let switch = native_switch(&browser, &resolver);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    switch
        .listen_for_announcements(
            move |a| {
                sink.lock().unwrap().push(a.service_type);
                trigger.cancel();
            },
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![HTTP, PRINTER]);
    assert_eq!(resolver.calls(), vec![ResolverCall::ListenForAnnouncements]);
    assert!(browser.calls().is_empty());
}
