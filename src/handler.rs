use crate::context::Context;
use crate::record::{Attr, Record};
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// A log handler shared between loggers and decorators.
pub type SharedHandler = Arc<dyn Handler>;

/// Processes [`Record`]s: decides whether a level is enabled, and renders,
/// forwards or ships the records it receives.
///
/// `ctx` is `None` when the call site supplied no context at all.
/// Implementations must be safe to call from many threads at once;
/// `with_attrs` and `with_group` return new handlers and never modify the
/// receiver.
pub trait Handler: Send + Sync + fmt::Debug {
    fn enabled(&self, ctx: Option<&Context>, level: &Level) -> bool;

    fn handle(&self, ctx: Option<&Context>, record: Record) -> Result<(), HandlerError>;

    /// A handler that renders `attrs` on every record it handles.
    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler;

    /// A handler that nests all following attrs under `name`.
    fn with_group(&self, name: &str) -> SharedHandler;
}

/// Error returned by [`Handler::handle`].
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("panic in handle: {0}")]
    Panicked(String),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write record: {0}")]
    Io(#[from] std::io::Error),

    /// For handlers that ship records to another system.
    #[error("export failed: {0}")]
    Export(Box<dyn Error + Send + Sync>),

    #[error("{} of the fan-out handlers failed, first: {}", .0.len(), first_error(.0))]
    Fanout(Vec<HandlerError>),
}

fn first_error(errors: &[HandlerError]) -> String {
    errors
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Best-effort description of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static message");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload), "formatted 42");

        let payload = panic::catch_unwind(|| panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }

    #[test]
    fn fanout_error_reports_count_and_first_cause() {
        let err = HandlerError::Fanout(vec![
            HandlerError::Panicked("boom".into()),
            HandlerError::Export("timeout".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "2 of the fan-out handlers failed, first: panic in handle: boom"
        );
    }
}
