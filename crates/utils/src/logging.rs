use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use tracing::subscriber::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Whether spans are exported to an OpenTelemetry collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenTelemetry {
    Enabled,
    Disabled,
}

impl OpenTelemetry {
    fn is_enabled(self) -> bool {
        matches!(self, OpenTelemetry::Enabled)
    }
}

impl From<bool> for OpenTelemetry {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// Configures tracing and optionally enables an open-telemetry OTLP exporter.
///
/// The open-telemetry configuration is controlled via environment variables as defined in the
/// [specification](https://github.com/open-telemetry/opentelemetry-specification/blob/main/specification/protocol/exporter.md#opentelemetry-protocol-exporter)
pub fn setup_tracing(otel: OpenTelemetry) -> Result<()> {
    let otel_layer = if otel.is_enabled() {
        Some(open_telemetry_layer()?)
    } else {
        None
    };

    let subscriber = Registry::default().with(stdout_layer()).with(otel_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(Into::into)
}

/// Installs the stdout subscriber for a test run.
///
/// Several tests of the same binary may call this, only the first one installs the subscriber.
pub fn setup_test_tracing() {
    let subscriber = Registry::default().with(stdout_layer());
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn open_telemetry_layer<S>() -> Result<Box<dyn Layer<S> + Send + Sync + 'static>>
where
    S: Subscriber + Sync + Send,
    for<'a> S: tracing_subscriber::registry::LookupSpan<'a>,
{
    let exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic().build()?;

    let tracer = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .build();

    let tracer = tracer.tracer("tracing-otel-subscriber");
    Ok(OpenTelemetryLayer::new(tracer).boxed())
}

fn stdout_layer<S>() -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber,
    for<'a> S: tracing_subscriber::registry::LookupSpan<'a>,
{
    use tracing_subscriber::fmt::format::FmtSpan;

    tracing_subscriber::fmt::layer()
        .compact()
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .boxed()
}
