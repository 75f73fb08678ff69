//! Source records as they come off the wire

use chrono::{SecondsFormat, Utc};
use rimline_store::{Document, Record};
use serde_json::Value;

/// Field stamped on every stored record
pub const HARVESTED_AT: &str = "_harvested_at";
/// Marker field on stub records
pub const STUB: &str = "_stub";
pub const STUB_ERROR: &str = "_error";
/// Where an opaque payload body is stored
pub const RAW_FIELD: &str = "raw";

/// Payload of one fetched record.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Parsed JSON object, stored verbatim
    Map(Document),
    /// Opaque body (XML, text) plus the few fields extracted from it
    Raw { fields: Document, body: String },
}

/// One keyed record from an external source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub key: String,
    pub payload: Payload,
}

impl SourceRecord {
    pub fn map(key: impl Into<String>, doc: Document) -> Self {
        Self {
            key: key.into(),
            payload: Payload::Map(doc),
        }
    }

    pub fn raw(key: impl Into<String>, fields: Document, body: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: Payload::Raw {
                fields,
                body: body.into(),
            },
        }
    }

    /// Placeholder for an item that failed permanently, so default item
    /// lists built from "still missing" queries skip it next run.
    pub fn stub(key: impl Into<String>, error: &str) -> Self {
        let mut doc = Document::new();
        doc.insert(STUB.into(), Value::Bool(true));
        doc.insert(STUB_ERROR.into(), Value::String(error.to_string()));
        Self::map(key, doc)
    }

    pub fn is_stub(&self) -> bool {
        matches!(&self.payload, Payload::Map(doc) if doc.get(STUB) == Some(&Value::Bool(true)))
    }

    /// Store form, stamped with the harvest time. A real record clears the
    /// stub marker left by an earlier failed fetch of the same key.
    pub fn into_record(self) -> Record {
        let is_stub = self.is_stub();
        let mut doc = match self.payload {
            Payload::Map(doc) => doc,
            Payload::Raw { mut fields, body } => {
                fields.insert(RAW_FIELD.into(), Value::String(body));
                fields
            }
        };
        if !is_stub {
            doc.insert(STUB.into(), Value::Null);
            doc.insert(STUB_ERROR.into(), Value::Null);
        }
        doc.insert(
            HARVESTED_AT.into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Record::new(self.key, doc)
    }
}
