//! Deployment ledger.
//!
//! Records are created when a deploy transaction is submitted and only move
//! forward: `Pending` to `Confirmed` or `Failed`. Nothing is ever deleted.
//! Every change is appended as a JSON line to the audit file, and replaying
//! that file on open restores the latest state of each record.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sol_sandbox_types::{Pubkey, Signature};
use tracing::warn;

use crate::error::HostError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub program_id: Pubkey,
    pub signature: Signature,
    pub network: String,
    pub submitted_at: DateTime<Utc>,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_valid_block_height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct DeploymentLedger {
    records: Mutex<HashMap<Pubkey, DeploymentRecord>>,
    audit: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl DeploymentLedger {
    /// Ledger without an audit file.
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            audit: None,
            path: None,
        }
    }

    /// Open (or create) the audit file at `path`, replaying existing entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HostError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HostError::io(parent, e))?;
        }
        let records = replay(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HostError::io(&path, e))?;
        Ok(Self {
            records: Mutex::new(records),
            audit: Some(Mutex::new(file)),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn insert(&self, record: DeploymentRecord) {
        self.append(&record);
        self.records.lock().insert(record.program_id, record);
    }

    /// Move a `Pending` record to `status`. Terminal records are returned
    /// unchanged.
    pub fn update_status(
        &self,
        program_id: &Pubkey,
        status: RecordStatus,
        error: Option<String>,
    ) -> Option<DeploymentRecord> {
        let updated = {
            let mut records = self.records.lock();
            let record = records.get_mut(program_id)?;
            if record.status.is_terminal() || status == RecordStatus::Pending {
                return Some(record.clone());
            }
            record.status = status;
            record.error = error;
            record.updated_at = Some(Utc::now());
            record.clone()
        };
        self.append(&updated);
        Some(updated)
    }

    pub fn get(&self, program_id: &Pubkey) -> Option<DeploymentRecord> {
        self.records.lock().get(program_id).cloned()
    }

    /// All records, oldest submission first.
    pub fn list(&self) -> Vec<DeploymentRecord> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by_key(|r| r.submitted_at);
        records
    }

    pub fn is_pending(&self, program_id: &Pubkey) -> bool {
        self.records
            .lock()
            .get(program_id)
            .map(|r| r.status == RecordStatus::Pending)
            .unwrap_or(false)
    }

    fn append(&self, record: &DeploymentRecord) {
        let Some(audit) = &self.audit else {
            return;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to serialize deployment record");
                return;
            }
        };
        let mut file = audit.lock();
        if let Err(e) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            warn!(program_id = %record.program_id, error = %e, "failed to append deployment record");
        }
    }
}

fn replay(path: &Path) -> Result<HashMap<Pubkey, DeploymentRecord>, HostError> {
    let mut records = HashMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(HostError::io(path, e)),
    };
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| HostError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DeploymentRecord>(&line) {
            Ok(record) => {
                records.insert(record.program_id, record);
            }
            Err(e) => warn!(line = n + 1, error = %e, "skipping malformed ledger entry"),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(seed: u8) -> DeploymentRecord {
        DeploymentRecord {
            program_id: Pubkey::new([seed; 32]),
            signature: Signature::new([seed; 64]),
            network: "local".to_string(),
            submitted_at: Utc::now(),
            status: RecordStatus::Pending,
            error: None,
            last_valid_block_height: 150,
            program_name: Some("counter".to_string()),
            artifact_sha256: None,
            updated_at: None,
        }
    }

    #[test]
    fn status_only_moves_forward() {
        let ledger = DeploymentLedger::in_memory();
        let r = record(1);
        ledger.insert(r.clone());
        assert!(ledger.is_pending(&r.program_id));

        let confirmed = ledger
            .update_status(&r.program_id, RecordStatus::Confirmed, None)
            .unwrap();
        assert_eq!(confirmed.status, RecordStatus::Confirmed);

        let again = ledger
            .update_status(&r.program_id, RecordStatus::Failed, Some("late".into()))
            .unwrap();
        assert_eq!(again.status, RecordStatus::Confirmed);
        assert_eq!(again.error, None);
        assert!(ledger.update_status(&Pubkey::new([9; 32]), RecordStatus::Failed, None).is_none());
    }

    #[test]
    fn reopening_replays_latest_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs/deployments.jsonl");
        let r = record(2);
        {
            let ledger = DeploymentLedger::open(&path).unwrap();
            ledger.insert(r.clone());
            ledger.insert(record(3));
            ledger.update_status(&r.program_id, RecordStatus::Failed, Some("boom".into()));
        }

        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert_eq!(lines, 3);

        let reopened = DeploymentLedger::open(&path).unwrap();
        let restored = reopened.get(&r.program_id).unwrap();
        assert_eq!(restored.status, RecordStatus::Failed);
        assert_eq!(restored.error.as_deref(), Some("boom"));
        assert_eq!(reopened.list().len(), 2);
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(record(4)).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["lastValidBlockHeight"], 150);
        assert!(json.get("programId").is_some());
    }
}
