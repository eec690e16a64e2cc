//! Mapping between `SearchDocument` and Tantivy documents.

use tantivy::schema::{Field, Value};
use tantivy::{doc, TantivyDocument};

use pharma_types::SearchDocument;

use crate::schema::ProductSchema;

/// Convert a search document projection to a Tantivy document.
pub fn product_to_doc(schema: &ProductSchema, product: &SearchDocument) -> TantivyDocument {
    doc!(
        schema.id => product.id.clone(),
        schema.name => product.name.clone(),
        schema.form => product.form.clone(),
        schema.manufacturer => product.manufacturer.clone(),
        schema.country => product.country.clone(),
        schema.serial => product.serial.clone(),
        schema.category => product.category.clone(),
        schema.price => product.price,
        schema.quantity => product.quantity,
        schema.total_price => product.total_price,
        schema.wholesale_price => product.wholesale_price,
        schema.retail_price => product.retail_price,
        schema.expiry_date => product.expiry_date.clone(),
        schema.branch_name => product.branch_name.clone(),
        schema.branch_number => product.branch_number.clone(),
        schema.city => product.city.clone()
    )
}

fn text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn number(doc: &TantivyDocument, field: Field) -> f64 {
    doc.get_first(field)
        .and_then(|v| v.as_f64())
        .unwrap_or_default()
}

/// Rebuild the projection from a stored document.
pub fn doc_to_product(schema: &ProductSchema, doc: &TantivyDocument) -> SearchDocument {
    SearchDocument {
        id: text(doc, schema.id),
        name: text(doc, schema.name),
        form: text(doc, schema.form),
        manufacturer: text(doc, schema.manufacturer),
        country: text(doc, schema.country),
        serial: text(doc, schema.serial),
        category: text(doc, schema.category),
        price: number(doc, schema.price),
        quantity: number(doc, schema.quantity),
        total_price: number(doc, schema.total_price),
        wholesale_price: number(doc, schema.wholesale_price),
        retail_price: number(doc, schema.retail_price),
        expiry_date: text(doc, schema.expiry_date),
        branch_name: text(doc, schema.branch_name),
        branch_number: text(doc, schema.branch_number),
        city: text(doc, schema.city),
    }
}
