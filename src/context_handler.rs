use crate::context::{Context, ContextKey, ContextValue};
use crate::handler::{panic_message, Handler, HandlerError, SharedHandler};
use crate::record::{Attr, Record};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::Level;

/// Handler decorator that copies values out of the call's [`Context`] onto
/// every record before passing it to the wrapped handler.
///
/// For each configured key, in configured order, the value found in the
/// context is appended as an attr named after the key. A missing key, or one
/// whose value is none (`Option::None`, `()`), gets the default value when
/// one is configured and is omitted otherwise. A value that cannot be
/// represented as JSON becomes the string `"!BADVALUE: <error>"` and the
/// record is still emitted.
///
/// [`Handler::handle`] never unwinds into the caller: a panic anywhere in
/// the augmentation or in the wrapped handler comes back as
/// [`HandlerError::Panicked`], and only that one record is lost.
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use tracing_ctx_logger::context::Context;
/// use tracing_ctx_logger::context_handler::ContextAttributeHandler;
/// use tracing_ctx_logger::logger::Logger;
/// use tracing_ctx_logger::memory::MemoryHandler;
///
/// let sink = MemoryHandler::new();
/// let handler = ContextAttributeHandler::new(
///     Arc::new(sink.clone()),
///     ["request_id".into(), "user_id".into()],
///     Some(json!("unknown")),
/// );
/// let logger = Logger::new(Arc::new(handler));
///
/// let ctx = Context::background().with_value("request_id", "req-1");
/// logger.info_ctx(&ctx, "processing request");
///
/// let record = &sink.records()[0];
/// assert_eq!(record.attrs["request_id"], json!("req-1"));
/// assert_eq!(record.attrs["user_id"], json!("unknown"));
/// ```
#[derive(Debug, Clone)]
pub struct ContextAttributeHandler {
    inner: SharedHandler,
    keys: Arc<[ContextKey]>,
    default: Option<Value>,
}

impl ContextAttributeHandler {
    pub fn new(
        inner: SharedHandler,
        keys: impl IntoIterator<Item = ContextKey>,
        default: Option<Value>,
    ) -> Self {
        Self {
            inner,
            keys: keys.into_iter().collect(),
            default: default.filter(|value| !value.is_null()),
        }
    }

    pub fn keys(&self) -> &[ContextKey] {
        &self.keys
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn inner(&self) -> &SharedHandler {
        &self.inner
    }

    fn rewrap(&self, inner: SharedHandler) -> SharedHandler {
        Arc::new(Self {
            inner,
            keys: Arc::clone(&self.keys),
            default: self.default.clone(),
        })
    }

    fn augment(&self, ctx: &Context, record: &mut Record) {
        for key in self.keys.iter() {
            let value = match ctx.value(key) {
                Some(value) if !value.is_none() => Some(resolve(value)),
                _ => self.default.clone(),
            };
            if let Some(value) = value {
                record.add(Attr::new(key.name(), value));
            }
        }
    }
}

fn resolve(value: &dyn ContextValue) -> Value {
    value
        .to_log_value()
        .unwrap_or_else(|e| Value::String(format!("!BADVALUE: {e}")))
}

impl Handler for ContextAttributeHandler {
    fn enabled(&self, ctx: Option<&Context>, level: &Level) -> bool {
        self.inner.enabled(ctx, level)
    }

    fn handle(&self, ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        let ctx = ctx.cloned().unwrap_or_default();
        panic::catch_unwind(AssertUnwindSafe(|| {
            let mut record = record;
            self.augment(&ctx, &mut record);
            self.inner.handle(Some(&ctx), record)
        }))
        .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload))))
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler {
        self.rewrap(self.inner.with_attrs(attrs))
    }

    fn with_group(&self, name: &str) -> SharedHandler {
        self.rewrap(self.inner.with_group(name))
    }
}
