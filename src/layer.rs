use crate::context::Context;
use crate::logger::{default_logger, Logger};
use crate::record::{Attr, Record, Source};
use serde_json::Value;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::field::{Field, Visit};
use tracing::subscriber::{Interest, SetGlobalDefaultError};
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Registry;

static INSTALLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone)]
enum Target {
    Fixed(Logger),
    ProcessDefault,
}

/// `tracing_subscriber` layer that turns `tracing` events into [`Record`]s
/// and sends them through a [`Logger`].
///
/// The thread's attached [`Context`] is passed along, so context attrs
/// apply to `tracing::info!` and friends as well. Callsite interest is
/// re-evaluated on every event, so changing a [`crate::level::LevelVar`] at
/// runtime takes effect immediately.
#[derive(Debug, Clone)]
pub struct HandlerLayer {
    target: Target,
}

impl HandlerLayer {
    /// Send every event to `logger`.
    pub fn new(logger: Logger) -> Self {
        Self {
            target: Target::Fixed(logger),
        }
    }

    /// Send every event to whatever [`default_logger`] returns at the time.
    pub fn process_default() -> Self {
        Self {
            target: Target::ProcessDefault,
        }
    }

    fn logger(&self) -> Logger {
        match &self.target {
            Target::Fixed(logger) => logger.clone(),
            Target::ProcessDefault => default_logger(),
        }
    }
}

impl<S> Layer<S> for HandlerLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        !IN_HANDLER.with(Cell::get) && self.logger().enabled(Some(&Context::current()), *metadata.level())
    }

    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        // Events raised by a handler's own dependencies while it runs are dropped.
        let Some(_guard) = HandlerGuard::enter() else {
            return;
        };

        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = Record::new(*meta.level(), visitor.message.unwrap_or_default()).with_target(meta.target());
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            record = record.with_source(Source {
                file: file.to_string(),
                line,
                module: meta.module_path().map(str::to_string),
            });
        }
        record.add_attrs(visitor.attrs);

        self.logger().log_record(Some(&Context::current()), record);
    }
}

struct HandlerGuard;

impl HandlerGuard {
    fn enter() -> Option<Self> {
        if IN_HANDLER.with(|flag| flag.replace(true)) {
            None
        } else {
            Some(HandlerGuard)
        }
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        IN_HANDLER.with(|flag| flag.set(false));
    }
}

/// Collects event fields as typed attrs, keeping the `message` field apart.
#[derive(Debug, Default)]
pub struct FieldVisitor {
    pub attrs: Vec<Attr>,
    pub message: Option<String>,
}

impl FieldVisitor {
    fn push(&mut self, field: &Field, value: impl Into<Value>) {
        self.attrs.push(Attr::new(field.name(), value));
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field, value);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.push(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push(field, format!("{value:?}"));
        }
    }
}

/// Install a global `tracing` subscriber that routes events to the process
/// default logger.
///
/// Only the first call in a process does anything; later calls return
/// `Ok(())`. Fails when another global subscriber is already installed.
pub fn install_global() -> Result<(), SetGlobalDefaultError> {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    let subscriber = Registry::default().with(HandlerLayer::process_default());
    tracing::subscriber::set_global_default(subscriber)
}
