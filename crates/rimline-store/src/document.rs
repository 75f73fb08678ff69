//! Documents, records, filters and projections over dotted field paths

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored document: a JSON object.
pub type Document = Map<String, Value>;

/// A document together with its natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub doc: Document,
}

impl Record {
    pub fn new(key: impl Into<String>, doc: Document) -> Self {
        Self {
            key: key.into(),
            doc,
        }
    }

    /// Look up a dotted path inside this record's document.
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.doc, path)
    }

    /// String value at `path`, if present and a string.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }
}

/// Outcome of an upsert batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Keys that did not exist before this call
    pub inserted: usize,
    /// Keys that existed and were merged into
    pub updated: usize,
}

impl UpsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

impl std::ops::AddAssign for UpsertOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}

/// Resolve a dotted path (`"ids.orcid"`). `null` counts as absent.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Merge `update` into `target` top-level field by field. A `null` in the
/// update removes the field.
pub fn merge_into(target: &mut Document, update: Document) {
    for (k, v) in update {
        if v.is_null() {
            target.remove(&k);
        } else {
            target.insert(k, v);
        }
    }
}

/// Keep only the listed dotted paths. An empty projection keeps everything.
pub fn project(doc: &Document, fields: &[&str]) -> Document {
    if fields.is_empty() {
        return doc.clone();
    }
    let mut out = Document::new();
    for path in fields {
        if let Some(value) = get_path(doc, path) {
            insert_path(&mut out, path, value.clone());
        }
    }
    out
}

fn insert_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !entry.is_object() {
                *entry = Value::Object(Document::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Index terms for a value: strings as-is, scalars rendered, arrays flattened.
pub fn index_terms(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(items) => items.iter().flat_map(index_terms).collect(),
        Value::Null | Value::Object(_) => Vec::new(),
    }
}

/// A single condition on a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Exists(String),
    Missing(String),
    Equals(String, Value),
}

impl Condition {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::Exists(path) => get_path(doc, path).is_some(),
            Self::Missing(path) => get_path(doc, path).is_none(),
            Self::Equals(path, expected) => get_path(doc, path) == Some(expected),
        }
    }
}

/// Conjunction of conditions. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn exists(mut self, path: &str) -> Self {
        self.conditions.push(Condition::Exists(path.to_string()));
        self
    }

    pub fn missing(mut self, path: &str) -> Self {
        self.conditions.push(Condition::Missing(path.to_string()));
        self
    }

    pub fn equals(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Equals(path.to_string(), value.into()));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}
