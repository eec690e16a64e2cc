//! Tantivy schema for the `products` index.
//!
//! One document per inventory record. Text fields feed fuzzy product
//! search; keyword fields (serial, city, branch number) take exact filters.

use tantivy::schema::{Field, Schema, FAST, STORED, STRING, TEXT};

use crate::SearchError;

/// Name of the product index in logs and health output
pub const PRODUCTS_INDEX: &str = "products";

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct ProductSchema {
    schema: Schema,
    /// Record UUID, the document key (STRING | STORED)
    pub id: Field,
    pub name: Field,
    pub form: Field,
    pub manufacturer: Field,
    pub country: Field,
    /// Normalized serial (STRING | STORED)
    pub serial: Field,
    pub category: Field,
    pub price: Field,
    pub quantity: Field,
    pub total_price: Field,
    pub wholesale_price: Field,
    pub retail_price: Field,
    pub expiry_date: Field,
    pub branch_name: Field,
    pub branch_number: Field,
    /// Branch city, keyword filter (STRING | STORED)
    pub city: Field,
}

fn field(schema: &Schema, name: &str) -> Result<Field, SearchError> {
    schema
        .get_field(name)
        .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
}

impl ProductSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a ProductSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        Ok(Self {
            id: field(&schema, "id")?,
            name: field(&schema, "name")?,
            form: field(&schema, "form")?,
            manufacturer: field(&schema, "manufacturer")?,
            country: field(&schema, "country")?,
            serial: field(&schema, "serial")?,
            category: field(&schema, "category")?,
            price: field(&schema, "price")?,
            quantity: field(&schema, "quantity")?,
            total_price: field(&schema, "total_price")?,
            wholesale_price: field(&schema, "wholesale_price")?,
            retail_price: field(&schema, "retail_price")?,
            expiry_date: field(&schema, "expiry_date")?,
            branch_name: field(&schema, "branch_name")?,
            branch_number: field(&schema, "branch_number")?,
            city: field(&schema, "city")?,
            schema,
        })
    }
}

/// Build the product index schema.
pub fn build_product_schema() -> ProductSchema {
    let mut builder = Schema::builder();

    let id = builder.add_text_field("id", STRING | STORED);

    // Tokenized for fuzzy matching
    let name = builder.add_text_field("name", TEXT | STORED);
    let form = builder.add_text_field("form", TEXT | STORED);
    let manufacturer = builder.add_text_field("manufacturer", TEXT | STORED);

    let country = builder.add_text_field("country", STRING | STORED);
    let serial = builder.add_text_field("serial", STRING | STORED);
    let category = builder.add_text_field("category", STRING | STORED);

    let price = builder.add_f64_field("price", STORED | FAST);
    let quantity = builder.add_f64_field("quantity", STORED | FAST);
    let total_price = builder.add_f64_field("total_price", STORED);
    let wholesale_price = builder.add_f64_field("wholesale_price", STORED);
    let retail_price = builder.add_f64_field("retail_price", STORED);

    let expiry_date = builder.add_text_field("expiry_date", STRING | STORED);

    let branch_name = builder.add_text_field("branch_name", TEXT | STORED);
    let branch_number = builder.add_text_field("branch_number", STRING | STORED);
    let city = builder.add_text_field("city", STRING | STORED);

    ProductSchema {
        schema: builder.build(),
        id,
        name,
        form,
        manufacturer,
        country,
        serial,
        category,
        price,
        quantity,
        total_price,
        wholesale_price,
        retail_price,
        expiry_date,
        branch_name,
        branch_number,
        city,
    }
}
