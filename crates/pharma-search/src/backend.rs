//! Search backend contract consumed by the index synchronizer.
//!
//! Writes are bulk lists of upserts and deletes keyed by document id;
//! they become visible after `refresh`.

use async_trait::async_trait;
use serde::Serialize;

use pharma_types::SearchDocument;

use crate::error::SearchError;
use crate::schema::PRODUCTS_INDEX;

/// One write in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Insert or replace the document with this id
    Index { id: String, doc: Box<SearchDocument> },
    /// Remove the document with this id; absent ids are not an error
    Delete { id: String },
}

impl BulkOp {
    pub fn index(doc: SearchDocument) -> Self {
        BulkOp::Index {
            id: doc.id.clone(),
            doc: Box::new(doc),
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        BulkOp::Delete { id: id.into() }
    }

    pub fn id(&self) -> &str {
        match self {
            BulkOp::Index { id, .. } | BulkOp::Delete { id } => id,
        }
    }
}

/// A rejected item of a bulk request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub id: String,
    pub reason: String,
}

/// Per-item outcome of a bulk request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

/// Search engine operations needed by the synchronizer.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn index_name(&self) -> &str {
        PRODUCTS_INDEX
    }

    /// Create the index with the product schema if it is absent.
    /// Returns true when the index was created by this call.
    async fn ensure_index(&self) -> Result<bool, SearchError>;

    /// Apply a bulk list of writes. Item failures are reported in the
    /// response; an `Err` means the whole request failed.
    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<BulkResponse, SearchError>;

    /// Make previous writes visible to searches.
    async fn refresh(&self) -> Result<(), SearchError>;

    /// Whether the backend is reachable.
    async fn ping(&self) -> bool;

    /// Number of searchable documents.
    async fn count(&self) -> Result<u64, SearchError>;

    /// Ids of every searchable document.
    async fn document_ids(&self) -> Result<Vec<String>, SearchError>;
}
