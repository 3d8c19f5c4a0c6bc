use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

const KEY_PREFIX: char = '⟨';
const KEY_SUFFIX: char = '⟩';

/// A table name or a `table:key` record id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Thing {
    table: String,
    key: Option<String>,
}

impl Thing {
    /// Whole table, so records get random ids.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: None,
        }
    }

    /// One record, rendered `table:key`.
    pub fn record(table: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            table: table.into(),
            key: (!key.is_empty()).then_some(key),
        }
    }

    /// Splits at the first `:`; text without one is a bare table.
    pub fn parse(text: &str) -> Self {
        match text.split_once(':') {
            Some((table, key)) if !table.is_empty() => Self::record(table, key),
            _ => Self::table(text),
        }
    }

    /// Table part of the target.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Record key, when the target names one record.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// True when the target names one record.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }
}

fn is_plain_key(key: &str) -> bool {
    key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || (key.starts_with(KEY_PREFIX) && key.ends_with(KEY_SUFFIX))
        // Complex ids (objects, arrays, functions) are passed through.
        || key.starts_with(['{', '[', '('])
}

impl fmt::Display for Thing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            None => f.write_str(&self.table),
            Some(key) if is_plain_key(key) => write!(f, "{}:{key}", self.table),
            Some(key) => write!(f, "{}:{KEY_PREFIX}{key}{KEY_SUFFIX}", self.table),
        }
    }
}

impl From<&str> for Thing {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for Thing {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&Thing> for Thing {
    fn from(value: &Thing) -> Self {
        value.clone()
    }
}

impl From<Thing> for JsonValue {
    fn from(value: Thing) -> Self {
        JsonValue::String(value.to_string())
    }
}

impl Serialize for Thing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
