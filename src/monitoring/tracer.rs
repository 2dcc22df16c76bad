/*!
 * Structured Tracing
 * Subscriber setup and per-request spans for the nexus daemon
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Requests slower than this are reported unless the operation may block
const SLOW_REQUEST_MS: u128 = 50;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - NEXUS_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("NEXUS_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_list(true)
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
                    .with_line_number(true)
                    .with_file(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Span covering one nexus request, correlated by its cookie
pub struct RequestSpan {
    span: tracing::Span,
    start: Instant,
    cookie: u64,
    may_block: bool,
}

impl RequestSpan {
    pub fn new(operation: u32, cookie: u64, team: i32, may_block: bool) -> Self {
        let span = span!(
            Level::DEBUG,
            "nexus_request",
            cookie,
            operation,
            team,
            return_code = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            cookie,
            may_block,
        }
    }

    pub fn record_return(&self, code: i32) {
        self.span.record("return_code", code);
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        let _entered = self.span.enter();
        if !self.may_block && duration.as_millis() > SLOW_REQUEST_MS {
            warn!(
                cookie = self.cookie,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow nexus request"
            );
        } else {
            debug!(cookie = self.cookie, "nexus request completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn test_request_span_records_without_subscriber() {
        let span = RequestSpan::new(0x12, 4, 1, true);
        span.record_return(0);
        drop(span);
    }
}
