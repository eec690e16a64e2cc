//! The product index directory.
//!
//! The daemon creates the index on first use. Readers that must never
//! create it, like the CLI search command, go through
//! [`SearchIndex::open_existing`].

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::{build_product_schema, ProductSchema, PRODUCTS_INDEX};

const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Tantivy rejects writer budgets below 15 MB per indexing thread
const MIN_WRITER_MEMORY_MB: usize = 15;

/// Written by Tantivy on index creation and every commit
const META_FILE: &str = "meta.json";

/// Location and writer budget of the product index.
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    pub index_path: PathBuf,
    pub writer_memory_mb: usize,
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    /// Writer budget in bytes, raised to what one writer thread needs.
    pub fn writer_budget_bytes(&self) -> usize {
        self.writer_memory_mb.max(MIN_WRITER_MEMORY_MB) * 1024 * 1024
    }

    pub fn index_exists(&self) -> bool {
        self.index_path.join(META_FILE).exists()
    }
}

/// An opened product index with its resolved fields.
pub struct SearchIndex {
    index: Index,
    schema: ProductSchema,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Open the product index, creating an empty one if the directory has
    /// none yet.
    pub fn open_or_create(config: SearchIndexConfig) -> Result<Self, SearchError> {
        if config.index_exists() {
            return Self::open_existing(config);
        }

        std::fs::create_dir_all(&config.index_path)?;
        let schema = build_product_schema();
        let index = Index::create_in_dir(&config.index_path, schema.schema().clone())?;
        info!(index = PRODUCTS_INDEX, path = ?config.index_path, "Created product index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    /// Open an index that already exists.
    ///
    /// # Errors
    ///
    /// `SearchError::IndexMissing` when nothing was indexed at the path yet,
    /// `SearchError::SchemaMismatch` when the directory holds some other
    /// index.
    pub fn open_existing(config: SearchIndexConfig) -> Result<Self, SearchError> {
        if !config.index_exists() {
            return Err(SearchError::IndexMissing(
                config.index_path.display().to_string(),
            ));
        }
        let index = Index::open_in_dir(&config.index_path)?;
        let schema = ProductSchema::from_schema(index.schema())?;
        debug!(path = ?config.index_path, "Opened product index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &ProductSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let budget = self.config.writer_budget_bytes();
        let writer = self.index.writer(budget)?;
        debug!(budget_bytes = budget, "Created index writer");
        Ok(writer)
    }

    /// Reader reloaded explicitly by whoever commits.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        Ok(self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }

    pub fn path(&self) -> &Path {
        &self.config.index_path
    }

    /// False once the directory was removed underneath the open index.
    pub fn exists(&self) -> bool {
        self.config.index_exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tantivy::schema::{Schema, STRING};
    use tempfile::TempDir;

    #[test]
    fn test_open_or_create_then_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path().join("products"));
        assert!(!config.index_exists());

        let created = SearchIndex::open_or_create(config.clone()).unwrap();
        assert!(created.exists());
        drop(created);

        let reopened = SearchIndex::open_existing(config).unwrap();
        assert_eq!(reopened.schema().schema(), build_product_schema().schema());
    }

    #[test]
    fn test_open_existing_never_creates() {
        let temp_dir = TempDir::new().unwrap();
        let config = SearchIndexConfig::new(temp_dir.path().join("products"));

        let err = SearchIndex::open_existing(config.clone()).err().unwrap();
        assert!(matches!(err, SearchError::IndexMissing(_)));
        assert!(!config.index_path.exists());
    }

    #[test]
    fn test_foreign_index_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut builder = Schema::builder();
        builder.add_text_field("title", STRING);
        Index::create_in_dir(temp_dir.path(), builder.build()).unwrap();

        let err = SearchIndex::open_or_create(SearchIndexConfig::new(temp_dir.path()))
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::SchemaMismatch(_)));
    }

    #[test]
    fn test_writer_budget_has_floor() {
        assert_eq!(
            SearchIndexConfig::new("/tmp/products").writer_budget_bytes(),
            50 * 1024 * 1024
        );
        assert_eq!(
            SearchIndexConfig::new("/tmp/products")
                .with_memory_mb(4)
                .writer_budget_bytes(),
            15 * 1024 * 1024
        );
    }
}
