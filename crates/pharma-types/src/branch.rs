//! Pharmacy branch (outlet) type.
//!
//! A branch is identified externally by its display name and branch number.
//! The `branch_id` UUID is the storage key and the join target for
//! inventory records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// City assigned to branches first created by an upload.
pub const NEW_BRANCH_CITY: &str = "New";

/// A pharmacy outlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: Uuid,

    /// Display name, e.g. "Новамедика"
    pub name: String,

    /// Branch number as uploaded (string, may carry leading zeros)
    pub number: String,

    /// Derived from name and number, unique per branch
    pub slug: String,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default)]
    pub opening_hours: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    /// Create a new branch with a fresh id and no metadata.
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        let name = name.into();
        let number = number.into();
        let now = Utc::now();
        Self {
            branch_id: Uuid::new_v4(),
            slug: slugify(&format!("{}-{}", name, number)),
            name,
            number,
            city: None,
            address: None,
            phone: None,
            opening_hours: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// City as indexed; empty when unknown.
    pub fn city_or_empty(&self) -> &str {
        self.city.as_deref().unwrap_or("")
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

/// Classification of an edit to an existing branch.
///
/// City edits change a denormalized field on every search document of the
/// branch, so they are told apart from other metadata edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchChange {
    Created,
    CityChanged,
    Updated,
}

impl BranchChange {
    /// Compare the stored and the new version of a branch.
    pub fn between(previous: Option<&Branch>, next: &Branch) -> Self {
        match previous {
            None => BranchChange::Created,
            Some(prev) if prev.city != next.city => BranchChange::CityChanged,
            Some(_) => BranchChange::Updated,
        }
    }
}

/// Build a URL-safe slug.
///
/// Letters and digits are lower-cased and kept (including non-ASCII
/// letters), every other run of characters collapses to a single `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}
