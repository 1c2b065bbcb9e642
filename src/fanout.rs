use crate::context::Context;
use crate::handler::{panic_message, Handler, HandlerError, SharedHandler};
use crate::record::{Attr, Record};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::Level;

/// Duplicates every record to several handlers.
///
/// Each child only receives records at levels it has enabled. A failing or
/// panicking child does not stop the others; all failures are reported
/// together as [`HandlerError::Fanout`].
#[derive(Debug, Clone)]
pub struct FanoutHandler {
    handlers: Vec<SharedHandler>,
}

impl FanoutHandler {
    pub fn new(handlers: impl IntoIterator<Item = SharedHandler>) -> Self {
        Self {
            handlers: handlers.into_iter().collect(),
        }
    }

    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }
}

impl Handler for FanoutHandler {
    fn enabled(&self, ctx: Option<&Context>, level: &Level) -> bool {
        self.handlers.iter().any(|handler| handler.enabled(ctx, level))
    }

    fn handle(&self, ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        let mut errors = Vec::new();
        for handler in &self.handlers {
            if !handler.enabled(ctx, &record.level) {
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(ctx, record.clone())))
                .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload))));
            if let Err(e) = result {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::Fanout(errors))
        }
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler {
        Arc::new(Self::new(
            self.handlers.iter().map(|handler| handler.with_attrs(attrs.clone())),
        ))
    }

    fn with_group(&self, name: &str) -> SharedHandler {
        Arc::new(Self::new(
            self.handlers.iter().map(|handler| handler.with_group(name)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHandler;
    use serde_json::json;

    #[derive(Debug)]
    struct Failing;

    impl Handler for Failing {
        fn enabled(&self, _: Option<&Context>, _: &Level) -> bool {
            true
        }

        fn handle(&self, _: Option<&Context>, _: Record) -> Result<(), HandlerError> {
            panic!("sink down")
        }

        fn with_attrs(&self, _: Vec<Attr>) -> SharedHandler {
            Arc::new(Failing)
        }

        fn with_group(&self, _: &str) -> SharedHandler {
            Arc::new(Failing)
        }
    }

    #[test]
    fn every_enabled_child_gets_a_copy() {
        let verbose = MemoryHandler::new();
        let quiet = MemoryHandler::with_level(Level::ERROR);
        let fanout = FanoutHandler::new([
            Arc::new(verbose.clone()) as SharedHandler,
            Arc::new(quiet.clone()) as SharedHandler,
        ]);

        fanout.handle(None, Record::new(Level::INFO, "info")).unwrap();
        fanout.handle(None, Record::new(Level::ERROR, "error")).unwrap();

        assert_eq!(verbose.len(), 2);
        assert_eq!(quiet.len(), 1);
        assert!(fanout.enabled(None, &Level::DEBUG));
    }

    #[test]
    fn failing_child_does_not_starve_the_rest() {
        let sink = MemoryHandler::new();
        let fanout = FanoutHandler::new([Arc::new(Failing) as SharedHandler, Arc::new(sink.clone()) as SharedHandler]);

        let err = fanout.handle(None, Record::new(Level::INFO, "m")).unwrap_err();
        assert!(matches!(err, HandlerError::Fanout(ref errors) if errors.len() == 1));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn composition_reaches_every_child() {
        let a = MemoryHandler::new();
        let b = MemoryHandler::new();
        let fanout = FanoutHandler::new([Arc::new(a.clone()) as SharedHandler, Arc::new(b.clone()) as SharedHandler])
            .with_group("g")
            .with_attrs(vec![Attr::new("k", 1)]);
        fanout.handle(None, Record::new(Level::INFO, "m")).unwrap();

        for sink in [a, b] {
            assert_eq!(serde_json::Value::Object(sink.records()[0].attrs.clone()), json!({"g": {"k": 1}}));
        }
    }
}
