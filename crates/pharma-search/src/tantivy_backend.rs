//! Embedded Tantivy implementation of [`SearchBackend`].
//!
//! The index is opened lazily on first use. The writer is shared behind
//! `Arc<Mutex<IndexWriter>>`; all blocking index work runs on the blocking
//! pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tantivy::collector::DocSetCollector;
use tantivy::query::AllQuery;
use tantivy::schema::Value;
use tantivy::{IndexReader, IndexWriter, TantivyDocument, Term};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backend::{BulkFailure, BulkOp, BulkResponse, SearchBackend};
use crate::document::product_to_doc;
use crate::error::SearchError;
use crate::index::{SearchIndex, SearchIndexConfig};
use crate::schema::PRODUCTS_INDEX;
use crate::searcher::ProductSearcher;

struct IndexHandle {
    index: SearchIndex,
    writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
}

impl IndexHandle {
    fn open(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = SearchIndex::open_or_create(config)?;
        let writer = index.writer()?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            writer: Arc::new(Mutex::new(writer)),
            reader,
        })
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }
}

/// Product index stored in a local directory.
pub struct TantivyBackend {
    config: SearchIndexConfig,
    handle: OnceCell<Arc<IndexHandle>>,
}

impl TantivyBackend {
    /// Create a backend; the index is opened or created on first use.
    pub fn new(config: SearchIndexConfig) -> Self {
        Self {
            config,
            handle: OnceCell::new(),
        }
    }

    /// Open the index now, failing fast when the directory is unusable.
    pub fn open(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let handle = IndexHandle::open(config.clone())?;
        Ok(Self {
            config,
            handle: OnceCell::new_with(Some(Arc::new(handle))),
        })
    }

    pub fn index_path(&self) -> &Path {
        &self.config.index_path
    }

    async fn handle(&self) -> Result<Arc<IndexHandle>, SearchError> {
        let handle = self
            .handle
            .get_or_try_init(|| async {
                let config = self.config.clone();
                let handle = tokio::task::spawn_blocking(move || IndexHandle::open(config)).await??;
                Ok::<_, SearchError>(Arc::new(handle))
            })
            .await?;
        Ok(handle.clone())
    }

    /// Searcher sharing this backend's reader, so it sees every refresh.
    pub async fn searcher(&self) -> Result<ProductSearcher, SearchError> {
        let handle = self.handle().await?;
        Ok(ProductSearcher::new(&handle.index, handle.reader.clone()))
    }
}

#[async_trait]
impl SearchBackend for TantivyBackend {
    async fn ensure_index(&self) -> Result<bool, SearchError> {
        let existed = self.handle.initialized() || self.config.index_exists();
        let handle = self.handle().await?;
        if !handle.index.exists() {
            return Err(SearchError::Unavailable(format!(
                "index directory {:?} is missing",
                handle.index.path()
            )));
        }
        if !existed {
            info!(index = PRODUCTS_INDEX, path = ?self.config.index_path, "Created product index");
        }
        Ok(!existed)
    }

    async fn bulk(&self, ops: Vec<BulkOp>) -> Result<BulkResponse, SearchError> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }
        let handle = self.handle().await?;

        tokio::task::spawn_blocking(move || {
            let schema = handle.index.schema();
            let writer = handle.lock_writer()?;
            let mut response = BulkResponse::default();

            for op in ops {
                match op {
                    BulkOp::Index { id, doc } => {
                        // Delete existing document with same ID (for update)
                        writer.delete_term(Term::from_field_text(schema.id, &id));
                        match writer.add_document(product_to_doc(schema, &doc)) {
                            Ok(_) => response.succeeded += 1,
                            Err(e) => response.failures.push(BulkFailure {
                                id,
                                reason: e.to_string(),
                            }),
                        }
                    }
                    BulkOp::Delete { id } => {
                        writer.delete_term(Term::from_field_text(schema.id, &id));
                        response.succeeded += 1;
                    }
                }
            }

            debug!(
                succeeded = response.succeeded,
                failed = response.failures.len(),
                "Applied bulk request"
            );
            Ok(response)
        })
        .await?
    }

    async fn refresh(&self) -> Result<(), SearchError> {
        let handle = self.handle().await?;
        tokio::task::spawn_blocking(move || {
            let opstamp = handle.lock_writer()?.commit()?;
            handle.reader.reload()?;
            info!(opstamp, "Committed index changes");
            Ok(())
        })
        .await?
    }

    async fn ping(&self) -> bool {
        match self.handle().await {
            Ok(handle) => handle.index.exists() && !handle.writer.is_poisoned(),
            Err(e) => {
                warn!(error = %e, "Search backend unreachable");
                false
            }
        }
    }

    async fn count(&self) -> Result<u64, SearchError> {
        let handle = self.handle().await?;
        Ok(handle.reader.searcher().num_docs())
    }

    async fn document_ids(&self) -> Result<Vec<String>, SearchError> {
        let handle = self.handle().await?;
        tokio::task::spawn_blocking(move || {
            let schema = handle.index.schema();
            let searcher = handle.reader.searcher();
            let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

            let mut ids = Vec::with_capacity(addresses.len());
            for address in addresses {
                let doc: TantivyDocument = searcher.doc(address)?;
                if let Some(id) = doc.get_first(schema.id).and_then(|v| v.as_str()) {
                    ids.push(id.to_string());
                }
            }
            Ok(ids)
        })
        .await?
    }
}
