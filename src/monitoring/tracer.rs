/*!
 * Tracing
 * Subscriber setup and timed spans using the tracing crate
 */

use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - FUTEX_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("FUTEX_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if result.is_ok() {
        info!(json = use_json, "tracing initialized");
    }
}

/// Span around one stress run; logs its duration when dropped
pub struct RunSpan {
    span: tracing::Span,
    start: Instant,
    slow_after: Duration,
}

impl RunSpan {
    pub fn new(scenario: &'static str, width: usize, backend: &'static str, slow_after: Duration) -> Self {
        let span = span!(
            Level::INFO,
            "stress_run",
            scenario = scenario,
            width = width,
            backend = backend,
            duration_ms = tracing::field::Empty,
        );
        debug!(parent: &span, "run started");
        Self {
            span,
            start: Instant::now(),
            slow_after,
        }
    }

    /// Enter the span on the current thread
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for RunSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_millis() as u64);
        let _entered = self.span.enter();
        if duration > self.slow_after {
            warn!(duration_ms = duration.as_millis() as u64, slow = true, "slow stress run");
        } else {
            debug!(duration_us = duration.as_micros() as u64, "run completed");
        }
    }
}
