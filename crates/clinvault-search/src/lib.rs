//! Search and filter engine over the Clinvault resource store.
//!
//! Criteria are applied in a fixed order: tenant, type, ids and status first,
//! then the `lastUpdated` window, then the indexed search parameters, all as
//! one store query. Observation refinement, per-subject limiting, sorting and
//! the `maxResources` cut run in memory afterwards, in that order.

pub mod criteria;
pub mod engine;

pub use criteria::{ObservationFilter, SearchCriteria, SortOrder};
pub use engine::{SearchConfig, SearchEngine, SearchResult};
