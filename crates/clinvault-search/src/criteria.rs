//! Search criteria accepted by [`SearchEngine`](crate::SearchEngine).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Ordering on `lastUpdated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(format!("unknown sort order '{other}'")),
        }
    }
}

/// Observation-only refinement, applied in memory after the store query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObservationFilter {
    /// Substring of any `code.coding[].code`.
    pub observation_code: Option<String>,
    /// Substring of any `code.coding[].system`.
    pub observation_system: Option<String>,
    /// Substring of `subject.reference`.
    pub patient_id: Option<String>,
    #[serde(alias = "maxObservationsPerPatient")]
    pub max_per_subject: Option<usize>,
    pub latest_only: bool,
}

impl ObservationFilter {
    /// True when any option is set, which restricts results to `Observation`.
    pub fn is_active(&self) -> bool {
        self.observation_code.is_some()
            || self.observation_system.is_some()
            || self.patient_id.is_some()
            || self.max_per_subject.is_some()
            || self.latest_only
    }

    pub fn limits_per_subject(&self) -> bool {
        self.latest_only || self.max_per_subject.is_some()
    }

    /// Effective per-subject cap. `latestOnly` wins over `maxPerSubject`.
    pub fn per_subject_cap(&self) -> Option<usize> {
        if self.latest_only {
            Some(1)
        } else {
            self.max_per_subject
        }
    }
}

/// Everything a caller can filter on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    pub resource_type: Option<String>,
    pub fhir_ids: Option<Vec<String>>,
    /// `identifier`, `name`, `code`, `status`, `subject` or `date` to a value.
    pub search_parameters: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub time_period: Option<String>,
    pub time_period_count: Option<u32>,
    #[serde(flatten)]
    pub observation: ObservationFilter,
    pub sort_order: SortOrder,
    pub include_deleted: bool,
    /// Falls back to the engine default when absent.
    pub max_resources: Option<usize>,
}

impl SearchCriteria {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn for_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fhir_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_parameters.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_dates(mut self, start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    #[must_use]
    pub fn with_relative_period(mut self, period: impl Into<String>, count: u32) -> Self {
        self.time_period = Some(period.into());
        self.time_period_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_observation(mut self, observation: ObservationFilter) -> Self {
        self.observation = observation;
        self
    }

    #[must_use]
    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    #[must_use]
    pub fn with_deleted(mut self, include_deleted: bool) -> Self {
        self.include_deleted = include_deleted;
        self
    }

    #[must_use]
    pub fn with_max_resources(mut self, max_resources: usize) -> Self {
        self.max_resources = Some(max_resources);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_order_parse() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("descending".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("sideways".parse::<SortOrder>().is_err());
        assert_eq!(SortOrder::default(), SortOrder::Desc);
    }

    #[test]
    fn test_deserialize_export_style_parameters() {
        let criteria: SearchCriteria = serde_json::from_value(json!({
            "resourceType": "Observation",
            "searchParameters": {"code": "8867-4"},
            "startDate": "2024-01-01T00:00:00Z",
            "timePeriod": "days",
            "timePeriodCount": 7,
            "observationCode": "8867",
            "maxObservationsPerPatient": 2,
            "sortOrder": "asc"
        }))
        .unwrap();

        assert_eq!(criteria.resource_type.as_deref(), Some("Observation"));
        assert_eq!(criteria.search_parameters["code"], "8867-4");
        assert!(criteria.start_date.is_some());
        assert_eq!(criteria.time_period_count, Some(7));
        assert_eq!(criteria.observation.max_per_subject, Some(2));
        assert_eq!(criteria.sort_order, SortOrder::Asc);
        assert!(!criteria.include_deleted);
        assert!(criteria.max_resources.is_none());
    }

    #[test]
    fn test_observation_filter_activation() {
        assert!(!ObservationFilter::default().is_active());

        let latest = ObservationFilter {
            latest_only: true,
            max_per_subject: Some(5),
            ..Default::default()
        };
        assert!(latest.is_active());
        assert_eq!(latest.per_subject_cap(), Some(1));

        let code_only = ObservationFilter {
            observation_code: Some("8867".into()),
            ..Default::default()
        };
        assert!(code_only.is_active());
        assert!(!code_only.limits_per_subject());
    }
}
