//! Inventory record types.
//!
//! `RecordDraft` is what the row parser produces from one CSV line.
//! `InventoryRecord` is the stored form, bound to a branch and carrying
//! a surrogate UUID that changes on every upload.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully typed product line parsed from an upload, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub name: String,
    pub form: String,
    pub manufacturer: String,
    pub country: String,
    pub serial: String,
    pub price: f64,
    pub quantity: f64,
    pub total_price: f64,
    pub expiry_date: NaiveDate,
    pub category: String,
    pub import_date: NaiveDate,
    pub internal_code: String,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub distributor: String,
    pub internal_id: String,
}

impl RecordDraft {
    /// Key used to suppress duplicate lines within one upload.
    pub fn dedup_key(&self) -> (String, String, NaiveDate) {
        (self.name.clone(), self.serial.clone(), self.expiry_date)
    }
}

/// A product line stocked by one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub record_id: Uuid,
    pub branch_id: Uuid,
    pub name: String,
    pub form: String,
    pub manufacturer: String,
    pub country: String,
    pub serial: String,
    pub price: f64,
    pub quantity: f64,
    pub total_price: f64,
    pub expiry_date: NaiveDate,
    pub category: String,
    pub import_date: NaiveDate,
    pub internal_code: String,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub distributor: String,
    pub internal_id: String,

    /// Last modification time; drives incremental indexing
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Bind a parsed draft to a branch under a fresh record id.
    pub fn from_draft(draft: RecordDraft, branch_id: Uuid, updated_at: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            branch_id,
            name: draft.name,
            form: draft.form,
            manufacturer: draft.manufacturer,
            country: draft.country,
            serial: draft.serial,
            price: draft.price,
            quantity: draft.quantity,
            total_price: draft.total_price,
            expiry_date: draft.expiry_date,
            category: draft.category,
            import_date: draft.import_date,
            internal_code: draft.internal_code,
            wholesale_price: draft.wholesale_price,
            retail_price: draft.retail_price,
            distributor: draft.distributor,
            internal_id: draft.internal_id,
            updated_at,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Strip whitespace, hyphens and underscores from a serial and upper-case it.
pub fn normalize_serial(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .flat_map(char::to_uppercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft() -> RecordDraft {
        RecordDraft {
            name: "Аспирин".to_string(),
            form: "ТАБЛ. 500мг №10".to_string(),
            manufacturer: "Bayer".to_string(),
            country: "Germany".to_string(),
            serial: "AB12".to_string(),
            price: 10.5,
            quantity: 2.0,
            total_price: 21.0,
            expiry_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            category: "Лексредства".to_string(),
            import_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            internal_code: "C-1".to_string(),
            wholesale_price: 9.0,
            retail_price: 10.5,
            distributor: "Pharma Dist".to_string(),
            internal_id: "42".to_string(),
        }
    }

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial(" ab-12_c d "), "AB12CD");
        assert_eq!(normalize_serial(""), "");
    }

    #[test]
    fn test_from_draft_assigns_fresh_ids() {
        let branch_id = Uuid::new_v4();
        let a = InventoryRecord::from_draft(sample_draft(), branch_id, Utc::now());
        let b = InventoryRecord::from_draft(sample_draft(), branch_id, Utc::now());
        assert_ne!(a.record_id, b.record_id);
        assert_eq!(a.branch_id, branch_id);
        assert_eq!(a.serial, "AB12");
    }

    #[test]
    fn test_dedup_key_ignores_price() {
        let a = sample_draft();
        let mut b = sample_draft();
        b.price = 99.0;
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
