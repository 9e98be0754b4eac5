//! Testing utilities, fixtures, and mock backends for zcswitch.
//!
//! - **Mocks**: scripted [`Resolver`](zcswitch_discover::Resolver) and
//!   [`ServiceBrowser`](zcswitch_discover::ServiceBrowser) implementations
//!   that record every call
//! - **Fixtures**: ready-made hosts and temporary project directories
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zcswitch_discover::{Capability, ResolveRequest, ZeroconfSwitch};
//! use zcswitch_test_utils::{fixtures::printer_host, MockResolver, MockServiceBrowser};
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_native_resolve() {
//!     let browser = MockServiceBrowser::new().with_hosts("_ipp._tcp.local.", vec![printer_host()]);
//!     let switch = ZeroconfSwitch::builder(Arc::new(MockResolver::new()))
//!         .native_browser(browser.clone())
//!         .capability(Capability::native())
//!         .build();
//!
//!     let hosts = switch.resolve(ResolveRequest::protocol("_ipp._tcp.local.")).await.unwrap();
//!     assert_eq!(hosts.len(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::TestProject;
pub use mocks::{BrowserCall, MockResolver, MockServiceBrowser, ResolverCall};
