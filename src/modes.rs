use crate::config::{Config, LogFormat};
use crate::console::{HandlerOptions, JsonHandler, TextHandler};
use crate::dev::DevHandler;
use crate::handler::SharedHandler;
use crate::otel::stdout_handler;
use crate::trace::TracingHandler;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Builds the handler behind the `otel` and `fanout` outputs.
///
/// The built-in implementation is [`crate::otlp::OtlpFactory`]; set
/// [`Config::telemetry`] to plug in another exporter.
pub trait TelemetryFactory: Send + Sync + fmt::Debug {
    fn build(&self, config: &Config, opts: &HandlerOptions) -> Result<SharedHandler, BuildError>;
}

/// Error type returned when building a handler from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("otel service name is required")]
    MissingServiceName,

    #[error("otlp feature is not enabled")]
    OtlpFeatureDisabled,

    #[cfg(feature = "otlp")]
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error(transparent)]
    Factory(Box<dyn Error + Send + Sync>),
}

/// Create the console handler selected by `config.format` and
/// `config.dev_mode`.
///
/// **Parameters**
/// - `config`: format, dev flavour, output stream and OTEL names.
/// - `opts`: level threshold and source toggle shared by every handler.
///
/// **Returns**
/// - A JSON, text or dev handler writing to `config.output_stream`, or for
///   [`LogFormat::Otel`] an [`crate::otel::OtelLogHandler`] exporting to
///   stdout through `opentelemetry-stdout`.
/// - `Err(BuildError::MissingServiceName)` for the OTEL format without a
///   service name.
///
/// **Behavior**
///
/// With `config.otel_tracing_enabled` the JSON, text and dev handlers are
/// wrapped in a [`TracingHandler`] that adds `trace_id` and `span_id`. The
/// OTEL format always records the span as the native trace context.
pub fn console_mode(config: &Config, opts: HandlerOptions) -> Result<SharedHandler, BuildError> {
    let stream = config.output_stream.clone();
    let handler: SharedHandler = match config.format {
        LogFormat::Otel => {
            if config.otel_service_name.is_empty() {
                return Err(BuildError::MissingServiceName);
            }
            return Ok(Arc::new(stdout_handler(
                &config.otel_service_name,
                &config.otel_logger_name,
                opts.level,
            )));
        }
        LogFormat::Json => Arc::new(JsonHandler::new(stream, opts)),
        LogFormat::Text if config.dev_mode => Arc::new(DevHandler::new(stream, opts, config.dev_flavor)),
        LogFormat::Text => Arc::new(TextHandler::new(stream, opts)),
    };

    if config.otel_tracing_enabled {
        Ok(Arc::new(TracingHandler::new(handler)))
    } else {
        Ok(handler)
    }
}

/// Create the telemetry handler for the `otel` and `fanout` outputs.
///
/// **Parameters**
/// - `config`: `config.telemetry` selects the factory; OTEL names are
///   passed through to it.
/// - `opts`: handed to the factory so the handler shares the global level.
///
/// **Returns**
/// - The handler built by `config.telemetry`, or by
///   [`crate::otlp::OtlpFactory`] when none is set.
/// - `Err(BuildError::OtlpFeatureDisabled)` when no factory is set and the
///   crate was built without the `otlp` feature.
pub fn otel_mode(config: &Config, opts: &HandlerOptions) -> Result<SharedHandler, BuildError> {
    if let Some(factory) = &config.telemetry {
        return factory.build(config, opts);
    }

    #[cfg(feature = "otlp")]
    {
        crate::otlp::OtlpFactory::default().build(config, opts)
    }

    #[cfg(not(feature = "otlp"))]
    {
        Err(BuildError::OtlpFeatureDisabled)
    }
}
