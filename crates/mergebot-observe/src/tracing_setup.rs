//! Tracing initialization for engine embedders.
//!
//! The engine only emits through the `tracing` facade; the binary that
//! embeds it (a chat-platform adapter, a test harness) decides how events
//! are collected. `init_tracing` wires the shared setup: an env-filtered
//! fmt layer, and optionally an OpenTelemetry bridge with a stdout span
//! exporter for local runs. Embedders that ship spans to a collector
//! should install their own exporter instead of enabling the stdout one.
//!
//! ```no_run
//! use mergebot_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! init_tracing(&TracingOptions::default()).unwrap();
//!
//! // Local runs that want spans printed as OTel JSON:
//! init_tracing(&TracingOptions {
//!     otel_stdout: true,
//!     ..TracingOptions::default()
//! })
//! .unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How the embedding binary wants engine telemetry collected.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Tracer name attached to exported spans.
    pub service_name: String,
    /// Filter directive applied when `RUST_LOG` is unset. The default
    /// keeps dispatch and invocation lifecycle events visible without
    /// drowning the adapter in dependency noise.
    pub default_directive: String,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel_stdout: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            service_name: "mergebot".to_string(),
            default_directive: "info,mergebot_core=debug".to_string(),
            otel_stdout: false,
        }
    }
}

/// Keeps the provider reachable for a clean flush on shutdown.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `options.default_directive`
/// applies. Invocations run on spawned tasks, so the fmt layer records
/// span close events to make their wall time visible per dispatch.
///
/// # Errors
///
/// Fails when a global subscriber is already installed or the default
/// directive does not parse.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&options.default_directive)?,
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);
    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if options.otel_stdout {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer(options.service_name.clone());
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        registry.init();
    }
    Ok(())
}

/// Flush pending spans and shut down the OTel provider, if one was
/// installed. No-op otherwise; call before process exit.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        eprintln!("tracer provider shutdown error: {e}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_parses() {
        let options = TracingOptions::default();
        assert!(EnvFilter::try_new(&options.default_directive).is_ok());
        assert_eq!(options.service_name, "mergebot");
        assert!(!options.otel_stdout);
    }
}
