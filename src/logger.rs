use crate::console::{HandlerOptions, OutputStream, TextHandler};
use crate::context::Context;
use crate::handler::SharedHandler;
use crate::level::log_level;
use crate::record::{Attr, Record, Source};
use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use std::panic::Location;
use std::sync::Arc;
use tracing::Level;

static DEFAULT_LOGGER: Lazy<ArcSwapOption<Logger>> = Lazy::new(ArcSwapOption::empty);

/// Front end for a [`SharedHandler`].
///
/// Cheap to clone. Errors returned by the handler are reported on stderr
/// and never reach the call site.
#[derive(Debug, Clone)]
pub struct Logger {
    handler: SharedHandler,
}

impl Logger {
    pub fn new(handler: SharedHandler) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &SharedHandler {
        &self.handler
    }

    pub fn enabled(&self, ctx: Option<&Context>, level: Level) -> bool {
        self.handler.enabled(ctx, &level)
    }

    /// Emit a record with the caller's source location.
    #[track_caller]
    pub fn log(&self, ctx: Option<&Context>, level: Level, msg: impl Into<String>, attrs: Vec<Attr>) {
        if !self.enabled(ctx, level) {
            return;
        }
        let mut record = Record::new(level, msg).with_source(Source::from_location(Location::caller()));
        record.add_attrs(attrs);
        self.dispatch(ctx, record);
    }

    /// Send an already-built record, subject to the level check.
    pub fn log_record(&self, ctx: Option<&Context>, record: Record) {
        if self.enabled(ctx, record.level) {
            self.dispatch(ctx, record);
        }
    }

    fn dispatch(&self, ctx: Option<&Context>, record: Record) {
        if let Err(e) = self.handler.handle(ctx, record) {
            eprintln!("log handler error: {e}");
        }
    }

    #[track_caller]
    pub fn debug(&self, msg: impl Into<String>) {
        self.log(Some(&Context::current()), Level::DEBUG, msg, Vec::new());
    }

    #[track_caller]
    pub fn info(&self, msg: impl Into<String>) {
        self.log(Some(&Context::current()), Level::INFO, msg, Vec::new());
    }

    #[track_caller]
    pub fn warn(&self, msg: impl Into<String>) {
        self.log(Some(&Context::current()), Level::WARN, msg, Vec::new());
    }

    #[track_caller]
    pub fn error(&self, msg: impl Into<String>) {
        self.log(Some(&Context::current()), Level::ERROR, msg, Vec::new());
    }

    #[track_caller]
    pub fn debug_ctx(&self, ctx: &Context, msg: impl Into<String>) {
        self.log(Some(ctx), Level::DEBUG, msg, Vec::new());
    }

    #[track_caller]
    pub fn info_ctx(&self, ctx: &Context, msg: impl Into<String>) {
        self.log(Some(ctx), Level::INFO, msg, Vec::new());
    }

    #[track_caller]
    pub fn warn_ctx(&self, ctx: &Context, msg: impl Into<String>) {
        self.log(Some(ctx), Level::WARN, msg, Vec::new());
    }

    #[track_caller]
    pub fn error_ctx(&self, ctx: &Context, msg: impl Into<String>) {
        self.log(Some(ctx), Level::ERROR, msg, Vec::new());
    }

    /// A logger whose records all carry `attrs`.
    pub fn with(&self, attrs: Vec<Attr>) -> Logger {
        if attrs.is_empty() {
            return self.clone();
        }
        Logger::new(self.handler.with_attrs(attrs))
    }

    /// A logger that nests all following attrs under `name`.
    pub fn with_group(&self, name: &str) -> Logger {
        if name.is_empty() {
            return self.clone();
        }
        Logger::new(self.handler.with_group(name))
    }
}

/// Make `logger` the process default returned by [`default_logger`].
pub fn set_default(logger: Logger) {
    DEFAULT_LOGGER.store(Some(Arc::new(logger)));
}

/// The process default logger.
///
/// Before [`set_default`] is called this is a text logger on stderr using
/// the global [`log_level`].
pub fn default_logger() -> Logger {
    match DEFAULT_LOGGER.load_full() {
        Some(logger) => Logger::clone(&logger),
        None => Logger::new(Arc::new(TextHandler::new(
            OutputStream::stderr(),
            HandlerOptions::new(log_level()),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHandler;
    use serde_json::json;
    use serial_test::serial;

    fn capture(level: Level) -> (MemoryHandler, Logger) {
        let sink = MemoryHandler::with_level(level);
        let logger = Logger::new(Arc::new(sink.clone()));
        (sink, logger)
    }

    #[test]
    fn source_points_at_call_site() {
        let (sink, logger) = capture(Level::TRACE);
        logger.info("here");
        let expected_line = line!() - 1;

        let source = sink.records()[0].source.clone().unwrap();
        assert!(source.file.ends_with("logger.rs"), "{}", source.file);
        assert_eq!(source.line, expected_line);
    }

    #[test]
    fn disabled_levels_are_skipped() {
        let (sink, logger) = capture(Level::WARN);
        logger.debug("skipped");
        logger.info("skipped");
        logger.warn("kept");
        logger.error("kept");
        let levels: Vec<_> = sink.records().into_iter().map(|r| r.level).collect();
        assert_eq!(levels, [Level::WARN, Level::ERROR]);
    }

    #[test]
    fn with_and_with_group_compose() {
        let (sink, logger) = capture(Level::TRACE);
        let scoped = logger
            .with(vec![Attr::new("service", "api")])
            .with_group("req");
        scoped.log(None, Level::INFO, "done", vec![Attr::new("status", 200)]);

        let attrs = &sink.records()[0].attrs;
        assert_eq!(attrs["service"], json!("api"));
        assert_eq!(attrs["req"], json!({"status": 200}));
    }

    #[test]
    fn plain_methods_use_attached_context() {
        let sink = MemoryHandler::new();
        let handler = crate::context_handler::ContextAttributeHandler::new(
            Arc::new(sink.clone()),
            ["request_id".into()],
            None,
        );
        let logger = Logger::new(Arc::new(handler));

        Context::background()
            .with_value("request_id", "req-7")
            .scope(|| logger.info("inside"));
        logger.info("outside");

        let records = sink.records();
        assert_eq!(records[0].attrs["request_id"], json!("req-7"));
        assert!(records[1].attrs.get("request_id").is_none());
    }

    #[test]
    #[serial]
    fn default_logger_can_be_replaced() {
        let (sink, logger) = capture(Level::TRACE);
        set_default(logger);
        default_logger().warn("through default");
        assert_eq!(sink.records()[0].message, "through default");
    }
}
