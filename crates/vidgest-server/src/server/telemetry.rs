//! # Telemetry Features
//!
//! Console logging through `tracing_subscriber` is always on. OpenTelemetry
//! export is optional and writes to stdout.
//!
//! ## Feature matrix
//!
//! - `otel-tracing`: exports spans (the `upload` span per call, the `preview`
//!   span per job) through `tracing-opentelemetry`.
//! - `otel-metrics`: exports counters, up/down counters and histograms for
//!   intake and preview processing.
//!
//! ## Span behavior
//!
//! - Spans created via `tracing::info_span!` or `#[tracing::instrument]` are
//!   exported when `otel-tracing` is enabled
//! - Events inside a span become span events in the exported trace
//! - Events outside of a span only reach the console (`fmt::layer()`)
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --bin vidgest-server --features otel-tracing,otel-metrics
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otel-metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "otel-metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "otel-metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "otel-tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "otel-tracing")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
const SERVICE_NAME: &str = "vidgest-server";

pub struct TelemetryProviders {
    #[cfg(feature = "otel-tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "otel-metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down the exporters. Errors go to stderr since the
    /// subscriber may already be unusable.
    pub fn shutdown(&self) {
        #[cfg(feature = "otel-tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "otel-metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "otel-tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "otel-tracing")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "otel-metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "otel-tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "otel-metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(&meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otel-tracing")]
        tracer_provider,
        #[cfg(feature = "otel-metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "otel-metrics", feature = "otel-tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otel-metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let exporter = opentelemetry_stdout::MetricExporter::default();
    let reader = sdkmetrics::PeriodicReader::builder(exporter)
        .with_interval(std::time::Duration::from_secs(5))
        .build();

    sdkmetrics::SdkMeterProvider::builder()
        .with_resource(resource())
        .with_reader(reader)
        .build()
}

#[cfg(feature = "otel-tracing")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let exporter = opentelemetry_stdout::SpanExporter::default();
    let batch = sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build();

    sdktrace::SdkTracerProvider::builder()
        .with_resource(resource())
        .with_span_processor(batch)
        .build()
}

// Metric handles - only compiled when the otel-metrics feature is enabled
#[cfg(feature = "otel-metrics")]
static UPLOADS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static UPLOADS_REJECTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static UPLOADS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static UPLOAD_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static UPLOAD_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static BYTES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static PREVIEWS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "otel-metrics")]
static PREVIEW_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "otel-metrics")]
fn init_metric_handles(meter: &Meter) {
    let _ = UPLOADS.set(
        meter
            .u64_counter("uploads")
            .with_description("Upload calls admitted")
            .build(),
    );

    let _ = UPLOADS_REJECTED.set(
        meter
            .u64_counter("uploads_rejected")
            .with_description("Upload calls turned away by admission control")
            .build(),
    );

    let _ = UPLOADS_INFLIGHT.set(
        meter
            .i64_up_down_counter("uploads_inflight")
            .with_description("Concurrent admitted upload streams")
            .build(),
    );

    let _ = UPLOAD_ERRORS.set(
        meter
            .u64_counter("upload_errors")
            .with_description("Partial or invalid upload streams")
            .build(),
    );

    let _ = UPLOAD_DURATION_MS.set(
        meter
            .f64_histogram("upload_duration")
            .with_unit("ms")
            .with_description("End-to-end upload stream duration")
            .build(),
    );

    let _ = BYTES_RECEIVED.set(
        meter
            .u64_counter("bytes_received")
            .with_unit("By")
            .with_description("File bytes written to storage")
            .build(),
    );

    let _ = PREVIEWS.set(
        meter
            .u64_counter("previews")
            .with_description("Preview jobs finished, by outcome")
            .build(),
    );

    let _ = PREVIEW_DURATION_MS.set(
        meter
            .f64_histogram("preview_duration")
            .with_unit("ms")
            .with_description("Transcoder wall time per preview")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "otel-metrics")]
pub fn increment_uploads() {
    if let Some(counter) = UPLOADS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_uploads() {}

#[cfg(feature = "otel-metrics")]
pub fn increment_uploads_rejected() {
    if let Some(counter) = UPLOADS_REJECTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_uploads_rejected() {}

#[cfg(feature = "otel-metrics")]
pub fn increment_uploads_inflight() {
    if let Some(counter) = UPLOADS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_uploads_inflight() {}

#[cfg(feature = "otel-metrics")]
pub fn decrement_uploads_inflight() {
    if let Some(counter) = UPLOADS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn decrement_uploads_inflight() {}

#[cfg(feature = "otel-metrics")]
pub fn increment_upload_errors() {
    if let Some(counter) = UPLOAD_ERRORS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_upload_errors() {}

#[cfg(feature = "otel-metrics")]
pub fn record_upload_duration(duration_ms: f64) {
    if let Some(histogram) = UPLOAD_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn record_upload_duration(_duration_ms: f64) {}

#[cfg(feature = "otel-metrics")]
pub fn increment_bytes_received(count: u64) {
    if let Some(counter) = BYTES_RECEIVED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn increment_bytes_received(_count: u64) {}

#[cfg(feature = "otel-metrics")]
pub fn record_preview(success: bool, duration_ms: f64) {
    let outcome = [KeyValue::new(
        "outcome",
        if success { "generated" } else { "failed" },
    )];
    if let Some(counter) = PREVIEWS.get() {
        counter.add(1, &outcome);
    }
    if let Some(histogram) = PREVIEW_DURATION_MS.get() {
        histogram.record(duration_ms, &outcome);
    }
}

#[cfg(not(feature = "otel-metrics"))]
pub fn record_preview(_success: bool, _duration_ms: f64) {}
