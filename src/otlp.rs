use crate::config::Config;
use crate::console::HandlerOptions;
use crate::handler::SharedHandler;
use crate::modes::{BuildError, TelemetryFactory};
use crate::otel::{service_resource, shutdown_on_exit, OtelLogHandler};
use opentelemetry_otlp::{LogExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Overrides for the OTLP/HTTP log exporter.
///
/// Unset fields are resolved by the exporter from the standard
/// `OTEL_EXPORTER_OTLP_*` variables, then from its built-in defaults
/// (`http://localhost:4318/v1/logs`, 10 s timeout).
#[derive(Clone, Debug, Default)]
pub struct OtlpConfig {
    /// Full logs endpoint, e.g. "http://127.0.0.1:4318/v1/logs"
    pub endpoint: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout: Option<Duration>,
}

impl OtlpConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn exporter(&self) -> Result<LogExporter, BuildError> {
        let mut builder = LogExporter::builder().with_http();
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_timeout(timeout);
        }
        if !self.headers.is_empty() {
            builder = builder.with_headers(self.headers.clone());
        }
        Ok(builder.build()?)
    }
}

/// Default [`TelemetryFactory`]: OTLP/HTTP log export behind a batch
/// processor.
///
/// Export runs on the processor's own thread, so logging never blocks on
/// the collector and works the same from inside an async runtime.
#[derive(Debug, Clone, Default)]
pub struct OtlpFactory {
    config: OtlpConfig,
}

impl OtlpFactory {
    pub fn new(config: OtlpConfig) -> Self {
        Self { config }
    }
}

impl TelemetryFactory for OtlpFactory {
    /// Build an [`OtelLogHandler`] exporting to the configured collector.
    ///
    /// **Parameters**
    /// - `config`: supplies `otel_service_name` (the `service.name`
    ///   resource attribute) and `otel_logger_name` (the instrumentation
    ///   scope).
    /// - `opts`: its level is the shared threshold the handler filters on.
    ///
    /// **Returns**
    /// - The handler, with its provider registered for flushing on
    ///   [`crate::store::shutdown`].
    /// - `Err(BuildError::Exporter)` when the exporter rejects its
    ///   configuration.
    fn build(&self, config: &Config, opts: &HandlerOptions) -> Result<SharedHandler, BuildError> {
        let provider = SdkLoggerProvider::builder()
            .with_resource(service_resource(&config.otel_service_name))
            .with_batch_exporter(self.config.exporter()?)
            .build();
        shutdown_on_exit(&provider);
        Ok(Arc::new(OtelLogHandler::new(
            &provider,
            &config.otel_logger_name,
            Arc::clone(&opts.level),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::store;
    use serial_test::serial;
    use tracing::Level;

    fn unreachable_collector() -> OtlpFactory {
        OtlpFactory::new(
            OtlpConfig::default()
                .with_endpoint("http://127.0.0.1:9/v1/logs")
                .with_header("api-key", "secret")
                .with_timeout(Duration::from_millis(200)),
        )
    }

    #[test]
    fn config_builders_set_overrides() {
        let config = OtlpConfig::default()
            .with_endpoint("http://collector:4318/v1/logs")
            .with_header("x-tenant", "acme");
        assert_eq!(config.endpoint.as_deref(), Some("http://collector:4318/v1/logs"));
        assert_eq!(config.headers["x-tenant"], "acme");
        assert_eq!(config.timeout, None);
    }

    #[test]
    #[serial]
    fn handle_does_not_wait_for_the_collector() {
        let handler = unreachable_collector()
            .build(&Config::default(), &HandlerOptions::default())
            .unwrap();
        handler.handle(None, Record::new(Level::ERROR, "queued")).unwrap();
        let _ = store::shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn handle_works_inside_an_async_runtime() {
        let handler = unreachable_collector()
            .build(&Config::default(), &HandlerOptions::default())
            .unwrap();
        for i in 0..3 {
            handler
                .handle(None, Record::new(Level::WARN, format!("from a task {i}")))
                .unwrap();
        }
        tokio::task::spawn_blocking(store::shutdown).await.unwrap().ok();
    }
}
