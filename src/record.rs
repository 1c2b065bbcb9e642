use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::panic::Location;
use tracing::Level;

/// A single structured key/value pair attached to a [`Record`].
///
/// The value keeps its dynamic JSON type so that formatters can render
/// numbers as numbers and composite values structurally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Source location of the call that produced a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl Source {
    pub fn from_location(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            module: None,
        }
    }
}

/// One log event travelling through a handler chain.
///
/// Handlers may only append attrs; existing attrs are never removed or
/// reordered.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    pub message: String,
    pub target: Option<String>,
    pub source: Option<Source>,
    attrs: Vec<Attr>,
}

impl Record {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            target: None,
            source: None,
            attrs: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn add(&mut self, attr: Attr) {
        self.attrs.push(attr);
    }

    pub fn add_attrs(&mut self, attrs: impl IntoIterator<Item = Attr>) {
        self.attrs.extend(attrs);
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.attrs
    }
}

fn serialize_level<S: serde::Serializer>(level: &Level, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(level.as_str())
}

/// Static attrs and open groups accumulated through `with_attrs` /
/// `with_group`, shared by the formatters that render nested objects.
#[derive(Debug, Clone, Default)]
pub(crate) struct AttrTree {
    base: Map<String, Value>,
    groups: Vec<String>,
}

impl AttrTree {
    pub(crate) fn with_attrs(&self, attrs: &[Attr]) -> Self {
        let mut next = self.clone();
        if !attrs.is_empty() {
            insert_at(&mut next.base, &next.groups, attrs);
        }
        next
    }

    pub(crate) fn with_group(&self, name: &str) -> Self {
        let mut next = self.clone();
        if !name.is_empty() {
            next.groups.push(name.to_string());
        }
        next
    }

    /// Static attrs merged with the record's own attrs, which land in the
    /// innermost open group.
    pub(crate) fn resolve(&self, attrs: &[Attr]) -> Map<String, Value> {
        let mut map = self.base.clone();
        if !attrs.is_empty() {
            insert_at(&mut map, &self.groups, attrs);
        }
        map
    }
}

fn insert_at(map: &mut Map<String, Value>, path: &[String], attrs: &[Attr]) {
    match path.split_first() {
        None => {
            for attr in attrs {
                map.insert(attr.key.clone(), attr.value.clone());
            }
        }
        Some((head, rest)) => {
            let slot = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                insert_at(inner, rest, attrs);
            }
        }
    }
}

/// Flat view of static attrs for the line-oriented formatters: keys are
/// prefixed with the dotted path of the groups open when they were added.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlatAttrs {
    preformatted: Vec<(String, Value)>,
    prefix: String,
}

impl FlatAttrs {
    pub(crate) fn with_attrs(&self, attrs: &[Attr]) -> Self {
        let mut next = self.clone();
        next.preformatted.extend(
            attrs
                .iter()
                .map(|attr| (format!("{}{}", self.prefix, attr.key), attr.value.clone())),
        );
        next
    }

    pub(crate) fn with_group(&self, name: &str) -> Self {
        let mut next = self.clone();
        if !name.is_empty() {
            next.prefix.push_str(name);
            next.prefix.push('.');
        }
        next
    }

    pub(crate) fn resolve<'a>(&'a self, attrs: &'a [Attr]) -> impl Iterator<Item = (String, &'a Value)> + 'a {
        self.preformatted
            .iter()
            .map(|(key, value)| (key.clone(), value))
            .chain(
                attrs
                    .iter()
                    .map(move |attr| (format!("{}{}", self.prefix, attr.key), &attr.value)),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_appends_in_call_order() {
        let mut record = Record::new(Level::INFO, "hello");
        record.add(Attr::new("b", 1));
        record.add(Attr::new("a", "x"));
        let keys: Vec<_> = record.attrs().iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn tree_places_record_attrs_in_innermost_group() {
        let tree = AttrTree::default()
            .with_attrs(&[Attr::new("service", "api")])
            .with_group("http")
            .with_attrs(&[Attr::new("method", "GET")])
            .with_group("");

        let resolved = tree.resolve(&[Attr::new("status", 200)]);
        assert_eq!(
            Value::Object(resolved),
            json!({"service": "api", "http": {"method": "GET", "status": 200}})
        );
    }

    #[test]
    fn tree_skips_empty_groups() {
        let tree = AttrTree::default().with_group("empty");
        assert!(tree.resolve(&[]).is_empty());
    }

    #[test]
    fn flat_attrs_prefix_keys_with_groups() {
        let flat = FlatAttrs::default()
            .with_group("req")
            .with_attrs(&[Attr::new("id", "r-1")]);
        let record_attrs = [Attr::new("bytes", 10)];
        let keys: Vec<String> = flat.resolve(&record_attrs).map(|(k, _)| k).collect();
        assert_eq!(keys, ["req.id", "req.bytes"]);
    }
}
