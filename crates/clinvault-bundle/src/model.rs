//! Bundle document model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bundle type label. It is written into the output and has no effect on
/// which resources are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    #[default]
    Collection,
    Transaction,
    Batch,
    Searchset,
    History,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Transaction => "transaction",
            Self::Batch => "batch",
            Self::Searchset => "searchset",
            Self::History => "history",
        }
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" => Ok(Self::Collection),
            "transaction" => Ok(Self::Transaction),
            "batch" => Ok(Self::Batch),
            "searchset" => Ok(Self::Searchset),
            "history" => Ok(Self::History),
            other => Err(format!("unknown bundle type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntrySearch {
    pub mode: String,
}

impl BundleEntrySearch {
    pub fn matched() -> Self {
        Self {
            mode: "match".to_string(),
        }
    }
}

/// Marks an entry that replays an operation other than a plain write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntryRequest {
    pub method: String,
    pub url: String,
}

impl BundleEntryRequest {
    pub const DELETE: &'static str = "DELETE";

    pub fn delete(resource_type: &str, id: &str) -> Self {
        Self {
            method: Self::DELETE.to_string(),
            url: format!("{resource_type}/{id}"),
        }
    }

    pub fn is_delete(&self) -> bool {
        self.method.eq_ignore_ascii_case(Self::DELETE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntry {
    #[serde(rename = "fullUrl", skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    pub resource: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleEntrySearch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,
}

impl BundleEntry {
    /// Entry for one stored version, addressed as `{type}/{id}/_history/{version}`.
    pub fn matched(resource_type: &str, id: &str, version_id: u64, resource: Value) -> Self {
        Self {
            full_url: Some(format!("{resource_type}/{id}/_history/{version_id}")),
            resource,
            search: Some(BundleEntrySearch::matched()),
            request: None,
        }
    }

    /// Entry for a deleted version. Import replays it as a delete.
    pub fn tombstone(resource_type: &str, id: &str, version_id: u64, resource: Value) -> Self {
        Self {
            request: Some(BundleEntryRequest::delete(resource_type, id)),
            ..Self::matched(resource_type, id, version_id, resource)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "type")]
    pub bundle_type: BundleType,
    pub timestamp: String,
    pub total: u64,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn new(bundle_type: BundleType, timestamp: String, entries: Vec<BundleEntry>) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            bundle_type,
            timestamp,
            total: entries.len() as u64,
            entry: entries,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_collection_bundle() {
        let entry = BundleEntry::matched(
            "Patient",
            "p1",
            3,
            json!({"resourceType": "Patient", "id": "p1"}),
        );
        let bundle = Bundle::new(
            BundleType::Collection,
            "2024-06-01T00:00:00Z".to_string(),
            vec![entry],
        );
        let j = bundle.to_value().unwrap();
        assert_eq!(j["resourceType"], "Bundle");
        assert_eq!(j["type"], "collection");
        assert_eq!(j["total"], 1);
        assert_eq!(j["entry"][0]["fullUrl"], "Patient/p1/_history/3");
        assert_eq!(j["entry"][0]["search"]["mode"], "match");
        assert!(j["entry"][0].get("request").is_none());
    }

    #[test]
    fn test_tombstone_entry_carries_delete_request() {
        let entry = BundleEntry::tombstone("Patient", "p1", 2, json!({"resourceType": "Patient"}));
        let j = serde_json::to_value(&entry).unwrap();
        assert_eq!(j["request"]["method"], "DELETE");
        assert_eq!(j["request"]["url"], "Patient/p1");
        assert!(entry.request.unwrap().is_delete());
    }

    #[test]
    fn test_bundle_type_labels() {
        for label in ["collection", "transaction", "batch", "searchset", "history"] {
            let parsed: BundleType = label.parse().unwrap();
            assert_eq!(parsed.as_str(), label);
        }
        assert!("document".parse::<BundleType>().is_err());
    }
}
