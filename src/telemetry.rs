use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use opentelemetry::trace::{Span, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "contracts-interop";
const TRACES_PATH: &str = "/v1/traces";

/// OpenTelemetry tracer exporting spans over OTLP/HTTP.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Export to `endpoint`; a bare collector URL gets the traces path appended.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let endpoint = traces_endpoint(&endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        // Document spans end on rayon workers; the batch processor exports from its own thread.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(65_536)
            .with_max_export_batch_size(4096)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config)
                    .build(),
            )
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }

    /// Run `f` inside a new span, child of `parent` or of the current context.
    fn span<T, F>(
        &self,
        name: &str,
        attributes: &[KeyValue],
        parent: Option<&OtelContext>,
        f: F,
    ) -> T
    where
        F: FnOnce() -> T,
    {
        let current;
        let parent = match parent {
            Some(parent) => parent,
            None => {
                current = OtelContext::current();
                &current
            }
        };
        let mut span = self.tracer.start_with_context(name.to_string(), parent);
        span.set_attributes(attributes.iter().cloned());
        let _guard = parent.with_span(span).attach();
        f()
    }

    /// Flush pending spans and stop the exporter.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to shutdown tracer provider: {err}"))
    }
}

/// OTLP/HTTP traces URL for a collector endpoint.
///
/// `http://host:4318/` and `.../v1/logs` both map to `.../v1/traces`.
fn traces_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("invalid OTLP endpoint: {endpoint}"))?;
    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        url.set_path(TRACES_PATH);
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}{TRACES_PATH}"));
    }
    Ok(url.to_string())
}

/// Install the stderr log subscriber; `RUST_LOG` overrides the default filter.
///
/// `quiet` keeps only warnings and errors.
pub(crate) fn init_logging(quiet: bool) {
    let default_filter = if quiet {
        "warn"
    } else {
        "contracts_interop=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A subscriber may already be installed when running under tests.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

pub(crate) fn uri_attribute(uri: &str) -> KeyValue {
    KeyValue::new("contracts_interop.uri", uri.to_string())
}

pub(crate) fn rule_attribute(rule_id: &'static str) -> KeyValue {
    KeyValue::new("contracts_interop.rule_id", rule_id)
}

/// Record an applied fix as an event on the active span.
pub(crate) fn record_fix(rule_id: &'static str, element: &str) {
    let cx = OtelContext::current();
    let span = cx.span();
    if span.span_context().is_valid() {
        span.add_event(
            "fix_applied",
            vec![
                rule_attribute(rule_id),
                KeyValue::new("contracts_interop.element", element.to_string()),
            ],
        );
    }
}

/// Trace ID of the active span, as 32 hex digits.
pub(crate) fn current_trace_id() -> Option<String> {
    let cx = OtelContext::current();
    let span_context = cx.span().span_context().clone();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// Run `f` in a span when telemetry is enabled.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.span(name, attributes, None, f),
        None => f(),
    }
}

/// Like [`with_span`], parented on `parent` instead of the current context.
///
/// Rayon workers do not inherit the caller's context.
pub(crate) fn with_span_in<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    parent: &OtelContext,
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.span(name, attributes, Some(parent), f),
        None => f(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::SpanData;

    #[derive(Debug)]
    struct NoopExporter;

    impl SpanExporter for NoopExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Ok(())
        }
    }

    #[test]
    fn traces_endpoint_appends_path_to_collector_root() {
        assert_eq!(
            traces_endpoint("http://localhost:4318/").expect("endpoint"),
            "http://localhost:4318/v1/traces"
        );
        assert_eq!(
            traces_endpoint("http://localhost:4318").expect("endpoint"),
            "http://localhost:4318/v1/traces"
        );
    }

    #[test]
    fn traces_endpoint_rewrites_logs_path() {
        assert_eq!(
            traces_endpoint("http://collector:4318/otlp/v1/logs").expect("endpoint"),
            "http://collector:4318/otlp/v1/traces"
        );
        assert!(traces_endpoint("not a url").is_err());
    }

    #[test]
    fn spans_expose_trace_id_and_accept_fix_events() {
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        let trace_id = with_span(Some(&telemetry), "scan", &[uri_attribute("Sample.cs")], || {
            record_fix("NotNullForContract", "varOne");
            current_trace_id()
        });
        assert_eq!(trace_id.expect("trace id").len(), 32);
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn with_span_in_runs_closure_with_and_without_telemetry() {
        let parent = OtelContext::current();
        assert_eq!(with_span_in(None, "document:Sample.cs", &[], &parent, || 7), 7);
        assert!(current_trace_id().is_none());

        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        let trace_id = with_span_in(
            Some(&telemetry),
            "rule:ContractForNotNull",
            &[rule_attribute("ContractForNotNull")],
            &parent,
            current_trace_id,
        );
        assert!(trace_id.is_some());
        telemetry.shutdown().expect("shutdown");
    }
}
