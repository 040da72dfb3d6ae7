//! Tracing subscriber setup, with optional OTLP export of traces and logs.

use std::time::Duration;

use anyhow::{Context, Result};
use jamconf::TelemetryConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps exporters alive; flushes them on [`TelemetryGuard::shutdown`].
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// Flush and stop the OTLP exporters, if any were started.
    pub fn shutdown(self) {
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Failed to shut down tracer provider: {}", e);
            }
        }
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Failed to shut down logger provider: {}", e);
            }
        }
    }
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info,jamboree=debug"))
}

/// Install the global subscriber.
///
/// Always logs to stdout through the fmt layer; adds OTLP traces and logs
/// when `otlp_endpoint` is set.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let Some(otlp_endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter(config))
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(TelemetryGuard::default());
    };

    let resource = Resource::builder_empty()
        .with_service_name("jamboree")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = if otlp_endpoint.contains("://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{}", otlp_endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("jamboree");
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(
            opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
        )
        .with_resource(resource)
        .build();

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!("OpenTelemetry exporting traces and logs to {}", otlp_endpoint);

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        logger_provider: Some(logger_provider),
    })
}
