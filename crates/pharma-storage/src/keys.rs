//! Key encoding and decoding for the storage layer.
//!
//! Keys are ASCII strings with zero-padded numeric parts so lexicographic
//! order matches numeric order:
//! - `rec:{record_id}`
//! - `br:{branch_id}:{record_id}`
//! - `ts:{updated_ms:013}:{record_id}`
//! - `job:{not_before_ms:013}:{task_id}`
//! - `outbox:{sequence:020}`

use uuid::Uuid;

use crate::error::StorageError;

fn parse_uuid(s: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(s).map_err(|e| StorageError::Key(format!("Invalid UUID {}: {}", s, e)))
}

fn utf8(bytes: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
}

/// Primary key of an inventory record
pub struct RecordKey;

impl RecordKey {
    pub fn to_bytes(record_id: &Uuid) -> Vec<u8> {
        format!("rec:{}", record_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Uuid, StorageError> {
        let s = utf8(bytes)?;
        let id = s
            .strip_prefix("rec:")
            .ok_or_else(|| StorageError::Key(format!("Invalid record key format: {}", s)))?;
        parse_uuid(id)
    }
}

/// Primary key of a branch
pub struct BranchKey;

impl BranchKey {
    pub fn to_bytes(branch_id: &Uuid) -> Vec<u8> {
        format!("branch:{}", branch_id).into_bytes()
    }
}

/// Lookup key from the external branch identity to its id.
/// Format: ident:{name}\u{1f}{number}
pub struct BranchIdentKey;

impl BranchIdentKey {
    pub fn to_bytes(name: &str, number: &str) -> Vec<u8> {
        format!("ident:{}\u{1f}{}", name, number).into_bytes()
    }
}

/// Secondary index entry linking a branch to one of its records.
/// Format: br:{branch_id}:{record_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecordKey {
    pub branch_id: Uuid,
    pub record_id: Uuid,
}

impl BranchRecordKey {
    pub fn new(branch_id: Uuid, record_id: Uuid) -> Self {
        Self {
            branch_id,
            record_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("br:{}:{}", self.branch_id, self.record_id).into_bytes()
    }

    /// Prefix covering every record of a branch
    pub fn prefix(branch_id: &Uuid) -> Vec<u8> {
        format!("br:{}:", branch_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "br" {
            return Err(StorageError::Key(format!(
                "Invalid branch record key format: {}",
                s
            )));
        }
        Ok(Self {
            branch_id: parse_uuid(parts[1])?,
            record_id: parse_uuid(parts[2])?,
        })
    }
}

/// Secondary index ordered by last modification.
/// Format: ts:{updated_ms:013}:{record_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTimeKey {
    pub updated_ms: i64,
    pub record_id: Uuid,
}

impl RecordTimeKey {
    pub fn new(updated_ms: i64, record_id: Uuid) -> Self {
        Self {
            updated_ms,
            record_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("ts:{:013}:{}", self.updated_ms, self.record_id).into_bytes()
    }

    /// Scan start for records modified at or after `since_ms`
    pub fn prefix_start(since_ms: i64) -> Vec<u8> {
        format!("ts:{:013}:", since_ms.max(0)).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "ts" {
            return Err(StorageError::Key(format!("Invalid time key format: {}", s)));
        }
        let updated_ms: i64 = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        Ok(Self {
            updated_ms,
            record_id: parse_uuid(parts[2])?,
        })
    }
}

/// Task status key. Task ids are ULIDs so keys sort by creation time.
pub struct TaskKey;

impl TaskKey {
    pub fn to_bytes(task_id: &str) -> Vec<u8> {
        format!("task:{}", task_id).into_bytes()
    }
}

/// Queue key; scans return the earliest ready job first.
/// Format: job:{not_before_ms:013}:{task_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKey {
    pub not_before_ms: i64,
    pub task_id: String,
}

impl JobKey {
    pub fn new(not_before_ms: i64, task_id: impl Into<String>) -> Self {
        Self {
            not_before_ms,
            task_id: task_id.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("job:{:013}:{}", self.not_before_ms.max(0), self.task_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        if parts.len() != 3 || parts[0] != "job" {
            return Err(StorageError::Key(format!("Invalid job key format: {}", s)));
        }
        let not_before_ms: i64 = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid timestamp: {}", e)))?;
        Ok(Self::new(not_before_ms, parts[2]))
    }
}

/// Key for outbox entries (async index updates)
/// Format: outbox:{sequence:020}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxKey {
    /// Monotonic sequence number
    pub sequence: u64,
}

impl OutboxKey {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("outbox:{:020}", self.sequence).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let seq = s
            .strip_prefix("outbox:")
            .ok_or_else(|| StorageError::Key(format!("Invalid outbox key format: {}", s)))?;
        let sequence: u64 = seq
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;
        Ok(Self { sequence })
    }
}

/// Key for checkpoint entries
/// Format: checkpoint:{job_name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub job_name: String,
}

impl CheckpointKey {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("checkpoint:{}", self.job_name).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_key_lexicographic_order() {
        let id = Uuid::new_v4();
        let early = RecordTimeKey::new(999, id).to_bytes();
        let late = RecordTimeKey::new(1_000, id).to_bytes();
        assert!(early < late);
        assert!(RecordTimeKey::prefix_start(1_000) <= late);
    }

    #[test]
    fn test_branch_record_key_prefix() {
        let branch = Uuid::new_v4();
        let key = BranchRecordKey::new(branch, Uuid::new_v4());
        assert!(key.to_bytes().starts_with(&BranchRecordKey::prefix(&branch)));
        assert_eq!(BranchRecordKey::from_bytes(&key.to_bytes()).unwrap(), key);
    }

    #[test]
    fn test_job_key_orders_by_ready_time() {
        let a = JobKey::new(5, "01HZZZ").to_bytes();
        let b = JobKey::new(60_000, "01HAAA").to_bytes();
        assert!(a < b);
        let decoded = JobKey::from_bytes(&b).unwrap();
        assert_eq!(decoded.task_id, "01HAAA");
        assert_eq!(decoded.not_before_ms, 60_000);
    }

    #[test]
    fn test_outbox_key_rejects_garbage() {
        assert!(OutboxKey::from_bytes(b"inbox:1").is_err());
        assert_eq!(OutboxKey::from_bytes(&OutboxKey::new(7).to_bytes()).unwrap().sequence, 7);
    }

    #[test]
    fn test_record_key_parse() {
        let id = Uuid::new_v4();
        assert_eq!(RecordKey::from_bytes(&RecordKey::to_bytes(&id)).unwrap(), id);
    }
}
