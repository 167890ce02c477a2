//! In-memory persistence backend for Clinvault.
//!
//! This crate provides an in-memory implementation of the `ResourceBackend`
//! trait from `clinvault-storage`, using papaya lock-free HashMaps for
//! concurrent access.
//!
//! # Example
//!
//! ```ignore
//! use clinvault_db_memory::create_backend;
//! use clinvault_storage::ResourceStore;
//!
//! let store = ResourceStore::new(create_backend());
//! ```

mod backend;

pub use backend::InMemoryBackend;

use clinvault_storage::DynBackend;

/// Creates a new shareable in-memory backend.
pub fn create_backend() -> DynBackend {
    std::sync::Arc::new(InMemoryBackend::new())
}
