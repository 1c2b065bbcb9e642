use crate::context::{Context, ContextKey};
use crate::handler::{Handler, HandlerError, SharedHandler};
use crate::record::{Attr, Record};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpanKey;

impl fmt::Display for SpanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("span_context")
    }
}

#[derive(Debug, Clone)]
struct CarriedSpan(SpanContext);

impl Serialize for CarriedSpan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SpanContext", 2)?;
        state.serialize_field("trace_id", &self.0.trace_id().to_string())?;
        state.serialize_field("span_id", &self.0.span_id().to_string())?;
        state.end()
    }
}

impl Context {
    /// A context carrying `span`. It wins over the span active in the
    /// OpenTelemetry context of the logging thread.
    pub fn with_span_context(&self, span: SpanContext) -> Context {
        self.with_value(ContextKey::new(SpanKey), CarriedSpan(span))
    }

    fn carried_span(&self) -> Option<&SpanContext> {
        self.get::<CarriedSpan>(&ContextKey::new(SpanKey)).map(|carried| &carried.0)
    }
}

/// The span a record belongs to: the one carried by `ctx`, else the span
/// active in [`opentelemetry::Context::current`]. Invalid spans count as none.
pub fn active_span(ctx: Option<&Context>) -> Option<SpanContext> {
    let span = match ctx.and_then(Context::carried_span) {
        Some(span) => span.clone(),
        None => opentelemetry::Context::current().span().span_context().clone(),
    };
    span.is_valid().then_some(span)
}

/// Adds `trace_id` and `span_id` to every record that belongs to a span.
#[derive(Debug, Clone)]
pub struct TracingHandler {
    inner: SharedHandler,
}

impl TracingHandler {
    pub fn new(inner: SharedHandler) -> Self {
        Self { inner }
    }
}

impl Handler for TracingHandler {
    fn enabled(&self, ctx: Option<&Context>, level: &Level) -> bool {
        self.inner.enabled(ctx, level)
    }

    fn handle(&self, ctx: Option<&Context>, mut record: Record) -> Result<(), HandlerError> {
        if let Some(span) = active_span(ctx) {
            record.add(Attr::new("trace_id", span.trace_id().to_string()));
            record.add(Attr::new("span_id", span.span_id().to_string()));
        }
        self.inner.handle(ctx, record)
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler {
        Arc::new(Self::new(self.inner.with_attrs(attrs)))
    }

    fn with_group(&self, name: &str) -> SharedHandler {
        Arc::new(Self::new(self.inner.with_group(name)))
    }
}
