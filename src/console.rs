use crate::context::Context;
use crate::handler::{Handler, HandlerError, SharedHandler};
use crate::level::LevelVar;
use crate::record::{Attr, AttrTree, FlatAttrs, Record};
use chrono::SecondsFormat;
use serde_json::{Map, Value};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing::Level;

/// Destination shared by the console handlers.
///
/// Each record is written as a single line while holding the stream's lock,
/// so lines from concurrent callers never interleave.
#[derive(Clone)]
pub struct OutputStream {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputStream {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    pub(crate) fn write_line(&self, mut line: Vec<u8>) -> io::Result<()> {
        line.push(b'\n');
        let mut writer = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&line)?;
        writer.flush()
    }
}

impl Default for OutputStream {
    fn default() -> Self {
        Self::stdout()
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream").finish_non_exhaustive()
    }
}

/// Options shared by the built-in formatting handlers.
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    /// Minimum level a record needs to be written.
    pub level: Arc<LevelVar>,
    /// Include the call site's file and line.
    pub add_source: bool,
}

impl HandlerOptions {
    pub fn new(level: Arc<LevelVar>) -> Self {
        Self {
            level,
            add_source: false,
        }
    }

    pub fn with_source(mut self, add_source: bool) -> Self {
        self.add_source = add_source;
        self
    }
}

pub(crate) fn format_time(record: &Record) -> String {
    record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Writes each record as one JSON object per line.
///
/// Layout: `time`, `level`, optional `source`, `msg`, then the attrs in the
/// order they were added, with groups as nested objects.
#[derive(Debug, Clone)]
pub struct JsonHandler {
    stream: OutputStream,
    opts: HandlerOptions,
    tree: AttrTree,
}

impl JsonHandler {
    pub fn new(stream: OutputStream, opts: HandlerOptions) -> Self {
        Self {
            stream,
            opts,
            tree: AttrTree::default(),
        }
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>, HandlerError> {
        let mut object = Map::new();
        object.insert("time".into(), Value::String(format_time(record)));
        object.insert("level".into(), Value::String(record.level.as_str().into()));
        if self.opts.add_source {
            if let Some(source) = &record.source {
                object.insert("source".into(), serde_json::to_value(source)?);
            }
        }
        object.insert("msg".into(), Value::String(record.message.clone()));
        object.extend(self.tree.resolve(record.attrs()));
        Ok(serde_json::to_vec(&Value::Object(object))?)
    }
}

impl Handler for JsonHandler {
    fn enabled(&self, _ctx: Option<&Context>, level: &Level) -> bool {
        self.opts.level.enabled(level)
    }

    fn handle(&self, _ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        let line = self.encode(&record)?;
        self.stream.write_line(line)?;
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

/// Writes records as `key=value` pairs (logfmt).
///
/// Group names prefix keys with a dot: `http.status=200`.
#[derive(Debug, Clone)]
pub struct TextHandler {
    stream: OutputStream,
    opts: HandlerOptions,
    attrs: FlatAttrs,
}

impl TextHandler {
    pub fn new(stream: OutputStream, opts: HandlerOptions) -> Self {
        Self {
            stream,
            opts,
            attrs: FlatAttrs::default(),
        }
    }

    fn encode(&self, record: &Record) -> String {
        let mut line = format!(
            "time={} level={}",
            format_time(record),
            record.level.as_str()
        );
        if self.opts.add_source {
            if let Some(source) = &record.source {
                line.push_str(&format!(" source={}:{}", source.file, source.line));
            }
        }
        line.push_str(" msg=");
        line.push_str(&quote_if_needed(&record.message));
        for (key, value) in self.attrs.resolve(record.attrs()) {
            line.push(' ');
            line.push_str(&quote_if_needed(&key));
            line.push('=');
            line.push_str(&render_value(value));
        }
        line
    }
}

impl Handler for TextHandler {
    fn enabled(&self, _ctx: Option<&Context>, level: &Level) -> bool {
        self.opts.level.enabled(level)
    }

    fn handle(&self, _ctx: Option<&Context>, record: Record) -> Result<(), HandlerError> {
        let line = self.encode(&record);
        self.stream.write_line(line.into_bytes())?;
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> SharedHandler {
        Arc::new(Self {
            attrs: self.attrs.with_attrs(&attrs),
            ..self.clone()
        })
    }

    fn with_group(&self, name: &str) -> SharedHandler {
        Arc::new(Self {
            attrs: self.attrs.with_group(name),
            ..self.clone()
        })
    }
}

/// Strings print bare when they are a single safe token; everything else is
/// compact JSON.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => quote_if_needed(s),
        other => other.to_string(),
    }
}

fn quote_if_needed(s: &str) -> String {
    let needs_quotes = s.is_empty()
        || s
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '=');
    if needs_quotes {
        format!("{s:?}")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// In-memory writer whose contents stay readable after the stream has
    /// been handed to a handler.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        pub(crate) fn stream(&self) -> OutputStream {
            OutputStream::new(self.clone())
        }
    }

    fn record_with(attrs: Vec<Attr>) -> Record {
        let mut record = Record::new(Level::INFO, "test message");
        record.add_attrs(attrs);
        record
    }

    #[test]
    fn json_line_layout() {
        let buf = SharedBuf::default();
        let handler = JsonHandler::new(buf.stream(), HandlerOptions::default());
        handler
            .handle(None, record_with(vec![Attr::new("n", 1), Attr::new("s", "x")]))
            .unwrap();

        let line = buf.contents();
        assert!(line.ends_with('\n'));
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        let keys: Vec<_> = parsed.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["time", "level", "msg", "n", "s"]);
        assert_eq!(parsed["level"], json!("INFO"));
        assert_eq!(parsed["msg"], json!("test message"));
        assert_eq!(parsed["n"], json!(1));
    }

    #[test]
    fn json_groups_nest_attrs() {
        let buf = SharedBuf::default();
        let handler = JsonHandler::new(buf.stream(), HandlerOptions::default())
            .with_attrs(vec![Attr::new("service", "api")])
            .with_group("http");
        handler.handle(None, record_with(vec![Attr::new("status", 200)])).unwrap();

        let parsed: Value = serde_json::from_str(buf.contents().trim_end()).unwrap();
        assert_eq!(parsed["service"], json!("api"));
        assert_eq!(parsed["http"], json!({"status": 200}));
    }

    #[test]
    fn json_source_only_when_requested() {
        let buf = SharedBuf::default();
        let opts = HandlerOptions::default().with_source(true);
        let handler = JsonHandler::new(buf.stream(), opts);
        let record = Record::new(Level::INFO, "m").with_source(crate::record::Source {
            file: "src/main.rs".into(),
            line: 12,
            module: None,
        });
        handler.handle(None, record).unwrap();

        let parsed: Value = serde_json::from_str(buf.contents().trim_end()).unwrap();
        assert_eq!(parsed["source"], json!({"file": "src/main.rs", "line": 12}));
    }

    #[test]
    fn level_threshold_is_read_on_every_check() {
        let level = Arc::new(LevelVar::new());
        let handler = TextHandler::new(OutputStream::new(io::sink()), HandlerOptions::new(Arc::clone(&level)));
        assert!(!handler.enabled(None, &Level::DEBUG));
        level.set(Level::DEBUG);
        assert!(handler.enabled(None, &Level::DEBUG));
    }

    #[test]
    fn text_quotes_and_prefixes() {
        let buf = SharedBuf::default();
        let handler = TextHandler::new(buf.stream(), HandlerOptions::default()).with_group("req");
        handler
            .handle(
                None,
                record_with(vec![
                    Attr::new("path", "/health"),
                    Attr::new("agent", "curl 8.0"),
                    Attr::new("tags", json!(["a", "b"])),
                ]),
            )
            .unwrap();

        let line = buf.contents();
        assert!(line.contains(" level=INFO msg=\"test message\""), "{line}");
        assert!(line.contains(" req.path=/health"), "{line}");
        assert!(line.contains(" req.agent=\"curl 8.0\""), "{line}");
        assert!(line.contains(" req.tags=[\"a\",\"b\"]"), "{line}");
    }
}
