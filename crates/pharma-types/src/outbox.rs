//! Change events for async search index updates.
//!
//! Change events are written in the same atomic write as the storage
//! mutation they describe. The change dispatcher consumes them in sequence
//! order and turns each into an index synchronizer call.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Records were inserted or modified
    RecordsUpserted,
    /// Records were removed
    RecordsDeleted,
    /// A branch's city changed; every record of the branch must be re-indexed
    BranchCityChanged,
    /// Other branch metadata changed
    BranchUpdated,
    /// A branch and all its records were removed
    BranchDeleted,
}

/// An outbox entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,

    /// Affected records. For `BranchDeleted` this is the snapshot of the
    /// branch's records taken before the cascade delete.
    #[serde(default)]
    pub record_ids: Vec<Uuid>,

    #[serde(default)]
    pub branch_id: Option<Uuid>,

    #[serde(default)]
    pub branch_name: Option<String>,

    #[serde(default)]
    pub branch_number: Option<String>,

    pub timestamp_ms: i64,
}

impl ChangeEvent {
    fn new(kind: ChangeKind, record_ids: Vec<Uuid>) -> Self {
        Self {
            kind,
            record_ids,
            branch_id: None,
            branch_name: None,
            branch_number: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn records_upserted(record_ids: Vec<Uuid>) -> Self {
        Self::new(ChangeKind::RecordsUpserted, record_ids)
    }

    pub fn records_deleted(record_ids: Vec<Uuid>) -> Self {
        Self::new(ChangeKind::RecordsDeleted, record_ids)
    }

    pub fn branch_city_changed(branch_id: Uuid, name: &str, number: &str) -> Self {
        Self::new(ChangeKind::BranchCityChanged, Vec::new()).with_branch(branch_id, name, number)
    }

    pub fn branch_updated(branch_id: Uuid, name: &str, number: &str) -> Self {
        Self::new(ChangeKind::BranchUpdated, Vec::new()).with_branch(branch_id, name, number)
    }

    pub fn branch_deleted(branch_id: Uuid, record_ids: Vec<Uuid>) -> Self {
        let mut event = Self::new(ChangeKind::BranchDeleted, record_ids);
        event.branch_id = Some(branch_id);
        event
    }

    fn with_branch(mut self, branch_id: Uuid, name: &str, number: &str) -> Self {
        self.branch_id = Some(branch_id);
        self.branch_name = Some(name.to_string());
        self.branch_number = Some(number.to_string());
        self
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
