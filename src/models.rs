//! Data models for harvested records and the headlines fed to the model.
//!
//! A [`Record`] is deliberately a thin wrapper over a JSON object: each
//! harvest intent asks for its own field set, and the validator, the
//! deduplicator and the publisher all address fields by name through the
//! intent's profile. Well-known field names live in [`fields`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical field names shared by the built-in profiles.
pub mod fields {
    pub const NAME: &str = "name";
    pub const TITLE: &str = "title";
    pub const ADDRESS: &str = "address";
    pub const CITY: &str = "city";
    pub const COUNTY: &str = "county";
    pub const STATE: &str = "state";
    pub const WEBSITE: &str = "website";
    pub const SOURCE_URL: &str = "source_url";
    pub const SECTOR: &str = "sector";
    pub const SUMMARY: &str = "summary";
    pub const DESCRIPTION: &str = "description";
    pub const CONSTRUCTION_STATUS: &str = "construction_status";
    pub const DESIGNER: &str = "designer";
    pub const ESTIMATED_SQFT: &str = "estimated_sqft";
}

/// One business, project or news item as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Text view of a field.
    ///
    /// Strings are trimmed, numbers and booleans are rendered, arrays of
    /// scalars are joined with spaces. `null`, objects and blank values are
    /// treated as absent.
    pub fn text(&self, field: &str) -> Option<String> {
        let rendered = match self.0.get(field)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
            Value::Null | Value::Object(_) => return None,
        };
        (!rendered.is_empty()).then_some(rendered)
    }

    pub fn has(&self, field: &str) -> bool {
        self.text(field).is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn retain_fields(&mut self, keep: &[String]) {
        self.0.retain(|k, _| keep.iter().any(|f| f == k));
    }

    pub fn trim_strings(&mut self) {
        for value in self.0.values_mut() {
            if let Value::String(s) = value {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    *s = trimmed.to_string();
                }
            }
        }
    }

    /// Display label for logs: the given name field, or `"<unnamed>"`.
    pub fn label(&self, name_field: &str) -> String {
        self.text(name_field)
            .unwrap_or_else(|| "<unnamed>".to_string())
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// A headline pulled from a news feed, handed to the model for triage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Headline {
    pub title: String,
    pub link: String,
    pub published: Option<String>,
}
