use std::sync::Arc;

use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};
use tracing_ctx_logger::config::{Config, LogFormat, OutputType};
use tracing_ctx_logger::console::{HandlerOptions, OutputStream};
use tracing_ctx_logger::handler::SharedHandler;
use tracing_ctx_logger::modes::{BuildError, TelemetryFactory};
use tracing_ctx_logger::otel::stdout_handler;
use tracing_ctx_logger::{init_with_attrs, shutdown, Attr, Context};

/// Prints the telemetry half of the fan-out with the OpenTelemetry stdout
/// exporter instead of shipping it to a collector.
#[derive(Debug)]
struct StdoutTelemetry;

impl TelemetryFactory for StdoutTelemetry {
    fn build(&self, config: &Config, opts: &HandlerOptions) -> Result<SharedHandler, BuildError> {
        Ok(Arc::new(stdout_handler(
            &config.otel_service_name,
            &config.otel_logger_name,
            Arc::clone(&opts.level),
        )))
    }
}

fn main() {
    let config = Config {
        format: LogFormat::Text,
        output: OutputType::Fanout,
        otel_service_name: "checkout".into(),
        otel_logger_name: "shop/checkout".into(),
        output_stream: OutputStream::stderr(),
        telemetry: Some(Arc::new(StdoutTelemetry)),
        ..Config::default()
    }
    .with_context_keys(["order_id"]);

    let logger = match init_with_attrs(config, vec![Attr::new("version", env!("CARGO_PKG_VERSION"))]) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let span = SpanContext::new(
        TraceId::from_bytes(0x4bf92f3577b34da6a3ce929d0e0e4736u128.to_be_bytes()),
        SpanId::from_bytes(0x00f067aa0ba902b7u64.to_be_bytes()),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    let ctx = Context::background()
        .with_value("order_id", 1017)
        .with_span_context(span);
    logger.info_ctx(&ctx, "order placed");

    // Routed through the same handler chain by the installed subscriber.
    ctx.scope(|| tracing::warn!(retries = 2, "payment provider slow"));

    if let Err(e) = shutdown() {
        eprintln!("{e}");
    }
}
