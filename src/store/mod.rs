//! Document store boundary
//!
//! Discovery and export only need four operations from a store: list
//! collections, count documents, stream a collection with skip/limit, and
//! fetch one document by identifier. Connection handling belongs to the
//! implementation.

mod jsonl;
mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::value::Document;

/// Streaming cursor over a collection
pub type DocumentIter<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;

/// Read access to a document-oriented database
pub trait DocumentStore: Send + Sync {
    /// Collection names, sorted
    fn list_collections(&self) -> Result<Vec<String>>;

    /// Estimated (or exact) document count
    fn estimated_count(&self, collection: &str) -> Result<u64>;

    /// Stream documents in natural order, skipping `skip` and stopping after
    /// `limit` when given
    fn scan(&self, collection: &str, skip: u64, limit: Option<u64>) -> Result<DocumentIter<'_>>;

    /// Point lookup by `_id`
    fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>>;
}
