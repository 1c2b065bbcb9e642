use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use opentelemetry::logs::AnyValue;
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLoggerProvider};
use serde_json::{json, Value};
use serial_test::serial;
use tracing_ctx_logger::config::{Config, OutputType};
use tracing_ctx_logger::console::{HandlerOptions, OutputStream};
use tracing_ctx_logger::handler::SharedHandler;
use tracing_ctx_logger::memory::MemoryHandler;
use tracing_ctx_logger::modes::{BuildError, TelemetryFactory};
use tracing_ctx_logger::otel::{service_resource, OtelLogHandler};
use tracing_ctx_logger::store::{get_config, register_cleanup};
use tracing_ctx_logger::{init, shutdown, Context, InitStage};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn lines(&self) -> Vec<Value> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

#[derive(Debug)]
struct FailingFactory;

impl TelemetryFactory for FailingFactory {
    fn build(&self, _: &Config, _: &HandlerOptions) -> Result<SharedHandler, BuildError> {
        Err(BuildError::Factory("collector unreachable".into()))
    }
}

#[derive(Debug)]
struct PanickingFactory;

impl TelemetryFactory for PanickingFactory {
    fn build(&self, _: &Config, _: &HandlerOptions) -> Result<SharedHandler, BuildError> {
        panic!("exporter misconfigured")
    }
}

#[derive(Debug)]
struct CapturingFactory(MemoryHandler);

impl TelemetryFactory for CapturingFactory {
    fn build(&self, _: &Config, _: &HandlerOptions) -> Result<SharedHandler, BuildError> {
        Ok(Arc::new(self.0.clone()))
    }
}

/// The SDK handler over an in-memory exporter, flushed on shutdown like the
/// built-in factories.
#[derive(Debug, Default)]
struct InMemoryTelemetry(InMemoryLogExporter);

impl TelemetryFactory for InMemoryTelemetry {
    fn build(&self, config: &Config, opts: &HandlerOptions) -> Result<SharedHandler, BuildError> {
        let provider = SdkLoggerProvider::builder()
            .with_resource(service_resource(&config.otel_service_name))
            .with_simple_exporter(self.0.clone())
            .build();
        let handler = OtelLogHandler::new(&provider, &config.otel_logger_name, Arc::clone(&opts.level));
        register_cleanup(move || provider.shutdown().map_err(Into::into));
        Ok(Arc::new(handler))
    }
}

fn config(buf: &SharedBuf, output: OutputType, telemetry: Arc<dyn TelemetryFactory>) -> Config {
    Config {
        output,
        output_stream: OutputStream::new(buf.clone()),
        set_as_default: false,
        otel_tracing_enabled: false,
        telemetry: Some(telemetry),
        ..Config::default()
    }
    .with_context_keys(["request_id"])
}

#[test]
#[serial]
fn otel_failure_falls_back_to_console() {
    let buf = SharedBuf::default();
    let logger = init(config(&buf, OutputType::Otel, Arc::new(FailingFactory))).unwrap();

    let ctx = Context::background().with_value("request_id", "req-1");
    logger.info_ctx(&ctx, "still logging");

    let lines = buf.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["msg"], json!("still logging"));
    assert_eq!(lines[0]["request_id"], json!("req-1"));
}

#[test]
#[serial]
fn fanout_failure_degrades_to_console_only() {
    let buf = SharedBuf::default();
    let logger = init(config(&buf, OutputType::Fanout, Arc::new(FailingFactory))).unwrap();
    logger.warn("console only");
    assert_eq!(buf.lines().len(), 1);
}

#[test]
#[serial]
fn fanout_sends_to_console_and_telemetry() {
    let buf = SharedBuf::default();
    let telemetry = MemoryHandler::new();
    let logger = init(config(&buf, OutputType::Fanout, Arc::new(CapturingFactory(telemetry.clone())))).unwrap();

    let ctx = Context::background().with_value("request_id", "req-9");
    logger.error_ctx(&ctx, "both sides");

    assert_eq!(buf.lines()[0]["request_id"], json!("req-9"));
    let captured = telemetry.records();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].attrs["request_id"], json!("req-9"));
}

#[test]
#[serial]
fn panic_during_setup_is_recovered() {
    let buf = SharedBuf::default();
    let err = init(config(&buf, OutputType::Otel, Arc::new(PanickingFactory))).unwrap_err();
    assert_eq!(err.stage, InitStage::PanicRecovery);
    assert!(err.to_string().contains("exporter misconfigured"), "{err}");
    assert_eq!(err.config.output, OutputType::Otel);
}

#[test]
#[serial]
fn init_records_config_in_store() {
    let buf = SharedBuf::default();
    init(config(&buf, OutputType::Console, Arc::new(FailingFactory))).unwrap();
    let stored = get_config();
    assert_eq!(stored.output, OutputType::Console);
    assert_eq!(stored.context_keys.len(), 1);
}

#[test]
#[serial]
fn otel_output_emits_sdk_log_records() {
    let buf = SharedBuf::default();
    let exporter = InMemoryLogExporter::default();
    let logger = init(config(&buf, OutputType::Otel, Arc::new(InMemoryTelemetry(exporter.clone())))).unwrap();

    let span = SpanContext::new(
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
        SpanId::from_hex("00f067aa0ba902b7").unwrap(),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    let _span = opentelemetry::Context::current()
        .with_remote_span_context(span)
        .attach();
    let ctx = Context::background().with_value("request_id", "req-5");
    logger.warn_ctx(&ctx, "slow checkout");

    let logs = exporter.get_emitted_logs().unwrap();
    assert_eq!(logs.len(), 1);
    let record = &logs[0].record;
    assert_eq!(record.body(), Some(&AnyValue::from("slow checkout")));
    let request_id = record
        .attributes_iter()
        .find(|(key, _)| key.as_str() == "request_id")
        .map(|(_, value)| value.clone());
    assert_eq!(request_id, Some(AnyValue::from("req-5")));
    assert_eq!(
        record.trace_context().unwrap().trace_id.to_string(),
        "4bf92f3577b34da6a3ce929d0e0e4736"
    );
    assert!(buf.lines().is_empty());

    assert!(shutdown().is_ok());
}
