//! Product search over the index.
//!
//! Name tokens are matched fuzzily; city is an exact keyword filter.

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{IndexReader, TantivyDocument, Term};
use tracing::{debug, info};

use pharma_types::{normalize_serial, SearchDocument};

use crate::document::doc_to_product;
use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::ProductSchema;

/// Most documents returned by a serial lookup
const SERIAL_LOOKUP_LIMIT: usize = 100;

/// A search hit with relevance score.
#[derive(Debug, Clone)]
pub struct ProductHit {
    pub score: f32,
    pub product: SearchDocument,
}

/// Search options for filtering and limiting results.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict to branches in this city
    pub city: Option<String>,
    /// Maximum results to return
    pub limit: usize,
    /// Tolerate typos in product names
    pub fuzzy: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            city: None,
            limit: 20,
            fuzzy: true,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn in_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn exact(mut self) -> Self {
        self.fuzzy = false;
        self
    }
}

/// Searcher over the product index.
pub struct ProductSearcher {
    reader: IndexReader,
    schema: ProductSchema,
    query_parser: QueryParser,
}

/// Edit distance allowed for a name token of this length.
fn fuzzy_distance(token: &str) -> u8 {
    match token.chars().count() {
        0..=3 => 0,
        4..=6 => 1,
        _ => 2,
    }
}

/// Split like the default tokenizer: alphanumeric runs, lower-cased.
fn name_tokens(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl ProductSearcher {
    /// Create a searcher sharing `reader` with the writer side.
    pub fn new(index: &SearchIndex, reader: IndexReader) -> Self {
        let schema = index.schema().clone();
        let query_parser = QueryParser::for_index(
            index.index(),
            vec![schema.name, schema.form, schema.manufacturer],
        );
        Self {
            reader,
            schema,
            query_parser,
        }
    }

    fn text_query(&self, query_str: &str, fuzzy: bool) -> Box<dyn Query> {
        // User input is free text; syntax errors are dropped, not reported
        let (parsed, _errors) = self.query_parser.parse_query_lenient(query_str);
        if !fuzzy {
            return parsed;
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Should, parsed)];
        for token in name_tokens(query_str) {
            let distance = fuzzy_distance(&token);
            if distance == 0 {
                continue;
            }
            let term = Term::from_field_text(self.schema.name, &token);
            clauses.push((
                Occur::Should,
                Box::new(FuzzyTermQuery::new(term, distance, true)),
            ));
        }
        Box::new(BooleanQuery::new(clauses))
    }

    /// Search products by free text.
    pub fn search(
        &self,
        query_str: &str,
        options: &SearchOptions,
    ) -> Result<Vec<ProductHit>, SearchError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let text_query = self.text_query(query_str, options.fuzzy);
        let final_query: Box<dyn Query> = match &options.city {
            Some(city) => {
                let city_term = Term::from_field_text(self.schema.city, city);
                Box::new(BooleanQuery::new(vec![
                    (Occur::Must, text_query),
                    (
                        Occur::Must,
                        Box::new(TermQuery::new(city_term, IndexRecordOption::Basic)),
                    ),
                ]))
            }
            None => text_query,
        };

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&final_query, &TopDocs::with_limit(options.limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            hits.push(ProductHit {
                score,
                product: doc_to_product(&self.schema, &doc),
            });
        }

        info!(
            query = query_str,
            city = options.city.as_deref().unwrap_or(""),
            results = hits.len(),
            "Product search complete"
        );
        Ok(hits)
    }

    /// Exact lookup by serial. The input is normalized like stored serials.
    pub fn find_by_serial(&self, serial: &str) -> Result<Vec<SearchDocument>, SearchError> {
        let normalized = normalize_serial(serial);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let term = Term::from_field_text(self.schema.serial, &normalized);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(SERIAL_LOOKUP_LIMIT))?;

        let mut products = Vec::with_capacity(top_docs.len());
        for (_, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            products.push(doc_to_product(&self.schema, &doc));
        }
        debug!(serial = %normalized, results = products.len(), "Serial lookup");
        Ok(products)
    }

    /// Number of live documents visible to this searcher.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_tokens_match_default_tokenizer() {
        assert_eq!(
            name_tokens("Парацетамол-500, TABS"),
            vec!["парацетамол", "500", "tabs"]
        );
        assert!(name_tokens("  ,; ").is_empty());
    }

    #[test]
    fn test_fuzzy_distance_by_length() {
        assert_eq!(fuzzy_distance("но"), 0);
        assert_eq!(fuzzy_distance("аспирин"), 2);
        assert_eq!(fuzzy_distance("нурофен"), 2);
        assert_eq!(fuzzy_distance("ибупр"), 1);
    }

    #[test]
    fn test_default_options() {
        let options = SearchOptions::default().in_city("Minsk").with_limit(5);
        assert_eq!(options.city.as_deref(), Some("Minsk"));
        assert_eq!(options.limit, 5);
        assert!(options.fuzzy);
        assert!(!options.exact().fuzzy);
    }
}
