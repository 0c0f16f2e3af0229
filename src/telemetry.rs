//! Telemetry setup for crossdns.
//!
//! Supports:
//! - Tracing with configurable log levels (`RUST_LOG` wins over the config)
//! - Prometheus metrics endpoint (with `prometheus` feature)
//! - OpenTelemetry tracing export (with `otel` feature)

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log level directive could not be parsed.
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// A global subscriber was already installed.
    #[error("tracing subscriber already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),

    /// The Prometheus exporter could not be started.
    #[cfg(feature = "prometheus")]
    #[error("prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),

    /// The OTLP exporter could not be built.
    #[cfg(feature = "otel")]
    #[error("otlp exporter: {0}")]
    Otlp(Box<dyn std::error::Error + Send + Sync>),
}

/// Keeps exporters alive; flushes pending spans when dropped.
#[must_use = "dropping the guard shuts telemetry down"]
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Error shutting down tracer provider: {}", e);
            }
        }
    }
}

/// Initialize tracing and the optional exporters.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => log_filter(&config.log_level)?,
    };

    #[allow(unused_mut)]
    let mut guard = TelemetryGuard::default();

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otel")]
    let registry = {
        use opentelemetry::trace::TracerProvider;

        let otel_layer = match config.opentelemetry.as_ref() {
            Some(otel_config) => {
                let provider = tracer_provider(otel_config)?;
                let tracer = provider.tracer("crossdns");
                guard.provider = Some(provider);
                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };
        registry.with(otel_layer)
    };

    registry.try_init()?;

    #[cfg(feature = "otel")]
    if let Some(otel_config) = config.opentelemetry.as_ref() {
        tracing::info!(endpoint = %otel_config.endpoint, "OpenTelemetry tracing enabled");
    }

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "Prometheus metrics exporter started");
    }

    Ok(guard)
}

/// Parse a log level or directive list such as `crossdns=debug,warn`.
pub fn log_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    Ok(EnvFilter::try_new(directives)?)
}

#[cfg(feature = "otel")]
fn tracer_provider(
    otel_config: &crate::config::OpenTelemetryConfig,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk as otlp_sdk;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otel_config.endpoint)
        .build()
        .map_err(|e| TelemetryError::Otlp(Box::new(e)))?;

    let resource = otlp_sdk::Resource::builder()
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                otel_config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ])
        .build();

    Ok(otlp_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}
