//! Tracing, metrics and log export
//!
//! The client crates log through `tracing` and record metrics through the
//! global `opentelemetry` meter. Nothing is exported until an application
//! calls [`init_observability`], which installs:
//!
//! - a `tracing-subscriber` registry with an `EnvFilter` and a JSON fmt layer,
//! - an OTLP span exporter bridged through `tracing-opentelemetry`,
//! - an OTLP metric exporter behind a periodic reader.
//!
//! ```rust,no_run
//! use taskwire_core::ObservabilityConfig;
//!
//! let config = ObservabilityConfig::new("explorer-frontend")
//!     .with_endpoint("http://localhost:4317")
//!     .with_log_level("taskwire_client=debug,info");
//!
//! taskwire_core::init_observability(config).expect("observability setup");
//! ```
//!
//! Defaults come from `OTEL_EXPORTER_OTLP_ENDPOINT` and `RUST_LOG` when set.

use opentelemetry::{global, KeyValue};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the periodic reader pushes metrics to the collector
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Observability settings
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Reported as `service.name` on every span and metric
    pub service_name: String,
    /// Reported as `service.version`
    pub service_version: String,
    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,
    pub enable_traces: bool,
    pub enable_metrics: bool,
    pub enable_logs: bool,
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "taskwire".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    /// Default settings under a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint
    ///
    /// # Arguments
    ///
    /// * `endpoint` - gRPC URL of the collector, e.g. `http://localhost:4317`
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the log filter used when `RUST_LOG` is unset
    ///
    /// Accepts any `EnvFilter` directive, from a bare level such as `"debug"`
    /// to per-target rules.
    ///
    /// # Arguments
    ///
    /// * `level` - Filter directive
    ///
    /// # Examples
    ///
    /// ```rust
    /// use taskwire_core::ObservabilityConfig;
    ///
    /// let config = ObservabilityConfig::new("explorer")
    ///     .with_log_level("taskwire_client=trace,warn");
    /// assert_eq!(config.log_level, "taskwire_client=trace,warn");
    /// ```
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Override the reported `service.version`
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Toggle OTLP span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Toggle OTLP metric export
    ///
    /// With metrics off the global meter stays a no-op, so client
    /// instruments record nothing.
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Toggle the JSON log output
    ///
    /// # Examples
    ///
    /// ```rust
    /// use taskwire_core::ObservabilityConfig;
    ///
    /// // Traces only
    /// let config = ObservabilityConfig::new("explorer")
    ///     .with_metrics(false)
    ///     .with_logs(false);
    /// assert!(config.enable_traces);
    /// assert!(!config.enable_logs);
    /// ```
    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the global tracing subscriber and OpenTelemetry providers
///
/// Call once per process. The global subscriber can only be set once, so a
/// second call returns an error.
pub fn init_observability(
    config: ObservabilityConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "Observability initialized"
    );

    Ok(())
}

fn init_tracer(
    config: &ObservabilityConfig,
) -> Result<opentelemetry_sdk::trace::Tracer, Box<dyn std::error::Error + Send + Sync>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // The subscriber layer needs a tracer from the provider before the
    // provider moves into the global slot.
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn init_metrics(
    config: &ObservabilityConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = config.enable_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });

    // An Option<Layer> is itself a layer, so traces and logs can be switched
    // off without a second subscriber type.
    let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Flush and release telemetry before exit
///
/// SDK providers flush on drop; this only marks the shutdown in the logs.
pub fn shutdown_observability() {
    tracing::info!("Shutting down observability");
}
