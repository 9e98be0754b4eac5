//! RAII-based timing for scan windows and discovery campaigns.
//!
//! # Example
//!
//! ```rust,ignore
//! use zcswitch_util::timing::TimingGuard;
//!
//! async fn scan(protocol: &str, window: Duration) {
//!     let _timing = TimingGuard::scan(protocol, window);
//!     tokio::time::sleep(window).await;
//!     // Duration is logged when _timing is dropped
//! }
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How far past its expected duration an operation may run before it is
/// reported as an overrun.
const OVERRUN_TOLERANCE: Duration = Duration::from_millis(500);

/// RAII guard that measures and logs the duration of an operation.
///
/// When dropped, logs the elapsed time since creation. If an expected
/// duration was given and the operation overran it, the log is emitted at
/// warn level.
pub struct TimingGuard {
    /// Type of operation (e.g., "scan", "campaign", "browse")
    operation_type: &'static str,
    /// Name of the specific operation (e.g., the protocol being scanned)
    operation_name: String,
    /// When the operation started
    start: Instant,
    /// Expected duration of the operation, if known
    expected: Option<Duration>,
}

impl TimingGuard {
    /// Create a new timing guard.
    pub fn new(operation_type: &'static str, operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        debug!(
            operation_type = operation_type,
            operation_name = %operation_name,
            "Starting operation"
        );
        Self {
            operation_type,
            operation_name,
            start: Instant::now(),
            expected: None,
        }
    }

    /// Create a timing guard for a single-protocol scan window.
    pub fn scan(protocol: impl Into<String>, window: Duration) -> Self {
        Self::new("scan", protocol).with_expected(window)
    }

    /// Create a timing guard for a multi-protocol discovery campaign.
    pub fn campaign(backend: impl Into<String>) -> Self {
        Self::new("campaign", backend)
    }

    /// Set the expected duration of the operation.
    pub fn with_expected(mut self, expected: Duration) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Get the elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the operation has run past its expected duration plus tolerance.
    pub fn is_overrun(&self) -> bool {
        match self.expected {
            Some(expected) => self.elapsed() > expected + OVERRUN_TOLERANCE,
            None => false,
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let duration_ms = duration.as_millis();
    if duration_ms < 1000 {
        format!("{duration_ms}ms")
    } else if duration_ms < 60_000 {
        format!("{:.2}s", duration_ms as f64 / 1000.0)
    } else {
        let mins = duration_ms / 60_000;
        let secs = (duration_ms % 60_000) as f64 / 1000.0;
        format!("{mins}m {secs:.1}s")
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let duration_str = format_duration(duration);

        if self.is_overrun() {
            warn!(
                operation_type = self.operation_type,
                operation_name = %self.operation_name,
                duration_ms = duration.as_millis() as u64,
                expected_ms = self.expected.map(|d| d.as_millis() as u64),
                duration = %duration_str,
                "Operation overran its window"
            );
        } else {
            debug!(
                operation_type = self.operation_type,
                operation_name = %self.operation_name,
                duration_ms = duration.as_millis() as u64,
                duration = %duration_str,
                "Operation completed"
            );
        }
    }
}
