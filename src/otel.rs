//! Handlers that emit records through the OpenTelemetry logs SDK.

use crate::context::Context;
use crate::handler::{Handler, HandlerError, SharedHandler};
use crate::level::LevelVar;
use crate::record::{Attr, AttrTree, Record};
use crate::store::register_cleanup;
use crate::trace::active_span;
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _, Severity};
use opentelemetry::Key;
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::Resource;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::Level;

/// OpenTelemetry severity for a level (the first number of each severity
/// range).
pub fn severity(level: &Level) -> Severity {
    match *level {
        Level::ERROR => Severity::Error,
        Level::WARN => Severity::Warn,
        Level::INFO => Severity::Info,
        Level::DEBUG => Severity::Debug,
        _ => Severity::Trace,
    }
}

/// Resource describing the process, with `service.name` set.
pub fn service_resource(service_name: &str) -> Resource {
    Resource::builder().with_service_name(service_name.to_string()).build()
}

/// Flush and stop `provider` when [`crate::store::shutdown`] runs.
pub(crate) fn shutdown_on_exit(provider: &SdkLoggerProvider) {
    let provider = provider.clone();
    register_cleanup(move || provider.shutdown().map_err(Into::into));
}

/// Writes records to stdout in the OpenTelemetry log data model through
/// `opentelemetry-stdout`, one export per record.
///
/// The provider is shut down by [`crate::store::shutdown`].
pub fn stdout_handler(service_name: &str, scope_name: &str, level: Arc<LevelVar>) -> OtelLogHandler {
    let provider = SdkLoggerProvider::builder()
        .with_resource(service_resource(service_name))
        .with_simple_exporter(opentelemetry_stdout::LogExporter::default())
        .build();
    shutdown_on_exit(&provider);
    OtelLogHandler::new(&provider, scope_name, level)
}

/// Turns each record into an OpenTelemetry `LogRecord` and emits it through
/// a logger of `provider`.
///
/// The instrumentation scope is `scope_name`. Attrs become log attributes
/// with their JSON types mapped onto [`AnyValue`], groups become nested
/// maps, and the span of the call's context becomes the trace context.
/// Records below the level threshold are dropped at `handle` time as well.
#[derive(Clone)]
pub struct OtelLogHandler {
    logger: Arc<SdkLogger>,
    level: Arc<LevelVar>,
    tree: AttrTree,
}

impl OtelLogHandler {
    pub fn new(provider: &SdkLoggerProvider, scope_name: &str, level: Arc<LevelVar>) -> Self {
        let logger = provider.logger(scope_name.to_string());
        Self {
            logger: Arc::new(logger),
            level,
            tree: AttrTree::default(),
        }
    }
}

impl fmt::Debug for OtelLogHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelLogHandler")
            .field("level", &self.level)
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

impl Handler for OtelLogHandler {
    fn enabled(&self, _ctx: Option<&Context>, level: &Level) -> bool {
        self.level.enabled(level)
    }

    fn handle(&self, ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        if !self.level.enabled(&record.level) {
            return Ok(());
        }
        let attrs = self.tree.resolve(record.attrs());

        let mut log = self.logger.create_log_record();
        log.set_timestamp(SystemTime::from(record.timestamp));
        log.set_observed_timestamp(SystemTime::now());
        log.set_severity_number(severity(&record.level));
        log.set_severity_text(record.level.as_str());
        log.set_body(AnyValue::from(record.message));
        if let Some(target) = record.target {
            log.set_target(target);
        }
        log.add_attributes(attrs.into_iter().map(|(key, value)| (Key::from(key), any_value(value))));
        if let Some(span) = active_span(ctx) {
            log.set_trace_context(span.trace_id(), span.span_id(), Some(span.trace_flags()));
        }
        self.logger.emit(log);
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler {
        Arc::new(Self {
            tree: self.tree.with_attrs(&attrs),
            ..self.clone()
        })
    }

    fn with_group(&self, name: &str) -> SharedHandler {
        Arc::new(Self {
            tree: self.tree.with_group(name),
            ..self.clone()
        })
    }
}

/// Integers that do not fit `i64` become strings, like the `tracing`
/// appender does for `u64` and `u128`.
fn any_value(value: Value) -> AnyValue {
    match value {
        Value::Null => AnyValue::from("null"),
        Value::Bool(b) => AnyValue::Boolean(b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => AnyValue::Int(i),
            (None, Some(u)) => AnyValue::from(u.to_string()),
            (None, None) => AnyValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => AnyValue::from(s),
        Value::Array(items) => AnyValue::ListAny(Box::new(items.into_iter().map(any_value).collect())),
        Value::Object(map) => AnyValue::Map(Box::new(
            map.into_iter()
                .map(|(key, value)| (Key::from(key), any_value(value)))
                .collect(),
        )),
    }
}
