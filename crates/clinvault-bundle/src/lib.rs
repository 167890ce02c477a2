//! Bundle export and import.
//!
//! Export runs a search, optionally expands each hit into its version
//! history and wraps every version in a bundle entry. Import upserts bundle
//! entries one by one and reports an outcome for each of them.

mod error;
pub mod import;
pub mod model;
mod service;

pub use error::BundleError;
pub use import::{EntryOutcome, ImportEntryResult, ImportResult};
pub use model::{Bundle, BundleEntry, BundleEntryRequest, BundleEntrySearch, BundleType};
pub use service::{BundleConfig, BundleExport, BundleExportSpec, BundleService, ExportMetadata};
