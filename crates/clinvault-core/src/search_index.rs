//! Search index extraction.
//!
//! Pulls a small, fixed set of scalar values out of a resource document so
//! that queries can filter without parsing the document again. New searchable
//! keys are added here; the stored shape (key → values) never changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const IDENTIFIER: &str = "identifier";
pub const NAME: &str = "name";
pub const CODE: &str = "code";
pub const DATE: &str = "date";
pub const STATUS: &str = "status";

/// Document paths whose first hit becomes the `date` key.
const DATE_PATHS: &[&[&str]] = &[
    &["effectiveDateTime"],
    &["effectivePeriod", "start"],
    &["effectiveInstant"],
    &["issued"],
    &["onsetDateTime"],
    &["recordedDate"],
    &["authoredOn"],
    &["date"],
    &["birthDate"],
];

/// Denormalized key → values map stored next to every resource version.
///
/// Values are lowercased on insert so that lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchIndex(BTreeMap<String, Vec<String>>);

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let values = self.0.entry(key.to_string()).or_default();
        let value = value.to_lowercase();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// `true` when any value under `key` contains `needle` (case-insensitive).
    pub fn contains(&self, key: &str, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.get(key)
            .is_some_and(|values| values.iter().any(|v| v.contains(&needle)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Extracts the search index of a document.
pub fn extract_search_index(document: &Value) -> SearchIndex {
    let mut index = SearchIndex::new();

    for identifier in as_array(document.get("identifier")) {
        if let Some(value) = identifier.get("value").and_then(Value::as_str) {
            index.insert(IDENTIFIER, value);
        }
    }

    match document.get("name") {
        Some(Value::String(name)) => index.insert(NAME, name),
        Some(names) => {
            for name in as_array(Some(names)) {
                extract_human_name(name, &mut index);
            }
        }
        None => {}
    }

    if let Some(code) = document.get("code") {
        for coding in as_array(code.get("coding")) {
            if let Some(c) = coding.get("code").and_then(Value::as_str) {
                index.insert(CODE, c);
            }
            if let Some(display) = coding.get("display").and_then(Value::as_str) {
                index.insert(CODE, display);
            }
        }
        if let Some(text) = code.get("text").and_then(Value::as_str) {
            index.insert(CODE, text);
        }
    }

    if let Some(date) = DATE_PATHS
        .iter()
        .find_map(|path| lookup(document, path).and_then(Value::as_str))
    {
        index.insert(DATE, date);
    }

    if let Some(status) = document.get("status").and_then(Value::as_str) {
        index.insert(STATUS, status);
    }

    index
}

fn extract_human_name(name: &Value, index: &mut SearchIndex) {
    if let Some(text) = name.get("text").and_then(Value::as_str) {
        index.insert(NAME, text);
    }
    if let Some(family) = name.get("family").and_then(Value::as_str) {
        index.insert(NAME, family);
    }
    for given in as_array(name.get("given")) {
        if let Some(given) = given.as_str() {
            index.insert(NAME, given);
        }
    }
}

/// Tags from `meta.tag` as `system|code` strings.
pub fn extract_tags(document: &Value) -> Vec<String> {
    codings_at(document, "tag")
}

/// Security labels from `meta.security` as `system|code` strings.
pub fn extract_security_labels(document: &Value) -> Vec<String> {
    codings_at(document, "security")
}

fn codings_at(document: &Value, field: &str) -> Vec<String> {
    as_array(document.get("meta").and_then(|m| m.get(field)))
        .filter_map(|coding| {
            let code = coding.get("code").and_then(Value::as_str)?;
            Some(match coding.get("system").and_then(Value::as_str) {
                Some(system) => format!("{system}|{code}"),
                None => code.to_string(),
            })
        })
        .collect()
}

fn as_array(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    let items: &[Value] = match value {
        Some(Value::Array(items)) => items,
        Some(single) => std::slice::from_ref(single),
        None => &[],
    };
    items.iter()
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| current.get(segment))
}
