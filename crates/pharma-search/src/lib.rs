//! # pharma-search
//!
//! Product search index for the pharmacy inventory pipeline.
//!
//! ## Features
//! - Embedded Tantivy index with MmapDirectory for persistence
//! - `SearchBackend` trait: bulk upsert/delete by document id, refresh, ping
//! - Fuzzy product-name search with an exact city filter
//! - Serial lookup over normalized serials

pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod schema;
pub mod searcher;
pub mod tantivy_backend;

pub use backend::{BulkFailure, BulkOp, BulkResponse, SearchBackend};
pub use document::{doc_to_product, product_to_doc};
pub use error::SearchError;
pub use index::{SearchIndex, SearchIndexConfig};
pub use schema::{build_product_schema, ProductSchema, PRODUCTS_INDEX};
pub use searcher::{ProductHit, ProductSearcher, SearchOptions};
pub use tantivy_backend::TantivyBackend;
