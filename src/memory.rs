use crate::context::Context;
use crate::handler::{Handler, HandlerError, SharedHandler};
use crate::level::LevelVar;
use crate::record::{Attr, AttrTree, Record, Source};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::level_filters::LevelFilter;
use tracing::Level;

/// A record as a [`MemoryHandler`] saw it, with static attrs and groups
/// already resolved into one nested map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub message: String,
    pub source: Option<Source>,
    pub attrs: Map<String, Value>,
}

fn serialize_level<S: serde::Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(level.as_str())
}

/// Handler that keeps every record in memory.
///
/// Clones, and handlers derived through `with_attrs` / `with_group`, share
/// one buffer, so tests can hand a clone to the code under test and inspect
/// what arrived.
#[derive(Debug, Clone)]
pub struct MemoryHandler {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
    level: Arc<LevelVar>,
    tree: AttrTree,
}

impl MemoryHandler {
    /// A handler that accepts every level.
    pub fn new() -> Self {
        Self::with_level(LevelFilter::TRACE)
    }

    pub fn with_level(level: impl Into<LevelFilter>) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            level: Arc::new(LevelVar::with_level(level)),
            tree: AttrTree::default(),
        }
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for MemoryHandler {
    fn enabled(&self, _ctx: Option<&Context>, level: &Level) -> bool {
        self.level.enabled(level)
    }

    fn handle(&self, _ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        let captured = CapturedRecord {
            timestamp: record.timestamp,
            level: record.level,
            attrs: self.tree.resolve(record.attrs()),
            message: record.message,
            source: record.source,
        };
        self.lock().push(captured);
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

/// A handler that drops all records.
///
/// Useful for measuring the overhead of the decorators themselves without
/// any I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardHandler;

impl Handler for DiscardHandler {
    fn enabled(&self, _ctx: Option<&Context>, _level: &Level) -> bool {
        true
    }

    fn handle(&self, _ctx: Option<&Context>, _record: Record) -> Result<(), HandlerError> {
        Ok(())
    }

    fn with_attrs(&self, _attrs: Vec<Attr>) -> SharedHandler {
        Arc::new(*self)
    }

    fn with_group(&self, _name: &str) -> SharedHandler {
        Arc::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_handlers_share_the_buffer() {
        let sink = MemoryHandler::new();
        let grouped = sink.with_attrs(vec![Attr::new("app", "demo")]).with_group("req");

        let mut record = Record::new(Level::INFO, "hello");
        record.add(Attr::new("id", 5));
        grouped.handle(None, record).unwrap();
        sink.handle(None, Record::new(Level::DEBUG, "plain")).unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(Value::Object(records[0].attrs.clone()), json!({"app": "demo", "req": {"id": 5}}));
        assert!(records[1].attrs.is_empty());
    }

    #[test]
    fn level_threshold_only_affects_enabled() {
        let sink = MemoryHandler::with_level(Level::INFO);
        assert!(!sink.enabled(None, &Level::DEBUG));
        assert!(sink.enabled(None, &Level::WARN));

        sink.clear();
        assert!(sink.is_empty());
    }
}
