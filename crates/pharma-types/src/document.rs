//! Search document projection.
//!
//! A denormalized, non-authoritative copy of an inventory record plus the
//! branch fields the search UI filters on. Always derivable from storage.

use serde::{Deserialize, Serialize};

use crate::branch::Branch;
use crate::record::InventoryRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Record UUID as a string; the document key
    pub id: String,
    pub name: String,
    pub form: String,
    pub manufacturer: String,
    pub country: String,
    pub serial: String,
    pub category: String,
    pub price: f64,
    pub quantity: f64,
    pub total_price: f64,
    pub wholesale_price: f64,
    pub retail_price: f64,
    /// ISO date, `YYYY-MM-DD`
    pub expiry_date: String,
    pub branch_name: String,
    pub branch_number: String,
    pub city: String,
}

impl SearchDocument {
    pub fn from_record(record: &InventoryRecord, branch: &Branch) -> Self {
        Self {
            id: record.record_id.to_string(),
            name: record.name.clone(),
            form: record.form.clone(),
            manufacturer: record.manufacturer.clone(),
            country: record.country.clone(),
            serial: record.serial.clone(),
            category: record.category.clone(),
            price: record.price,
            quantity: record.quantity,
            total_price: record.total_price,
            wholesale_price: record.wholesale_price,
            retail_price: record.retail_price,
            expiry_date: record.expiry_date.format("%Y-%m-%d").to_string(),
            branch_name: branch.name.clone(),
            branch_number: branch.number.clone(),
            city: branch.city_or_empty().to_string(),
        }
    }
}
