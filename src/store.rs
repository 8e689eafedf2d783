use crate::error::SnapshotError;
use crate::twitter::UserRecord;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One account's following list on one logical date
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub handle: String,
    pub records: Vec<UserRecord>,
}

/// Storage key for a (date, handle) pair, e.g. `2024-05-01_alice`
pub fn snapshot_key(date: NaiveDate, handle: &str) -> String {
    format!("{}_{}", date.format("%Y-%m-%d"), handle)
}

/// Key-value persistence of snapshots
pub trait SnapshotStore {
    /// Persist a snapshot, replacing any earlier one with the same key
    fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    /// Load the snapshot stored under exactly (date, handle)
    fn load(&self, date: NaiveDate, handle: &str) -> Result<Snapshot, SnapshotError>;

    /// Load the snapshot `days` before `date`
    fn load_shifted(
        &self,
        date: NaiveDate,
        handle: &str,
        days: u32,
    ) -> Result<Snapshot, SnapshotError> {
        let shifted = date
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| SnapshotError::NotFound {
                key: format!("{} minus {days} days", snapshot_key(date, handle)),
            })?;
        self.load(shifted, handle)
    }
}

/// Snapshots as pretty-printed JSON files, one per key, in a flat directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Handles are `[A-Za-z0-9_]` upstream; anything else is replaced so a key
    /// can never leave the data directory
    pub fn snapshot_path(&self, date: NaiveDate, handle: &str) -> PathBuf {
        let safe_handle: String = handle
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.data_dir
            .join(format!("{}.json", snapshot_key(date, &safe_handle)))
    }

    /// Six-space indentation with sorted keys, for diffing files by eye
    fn encode(records: &[UserRecord]) -> Result<Vec<u8>, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"      ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        records.serialize(&mut serializer)?;
        Ok(buf)
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let key = snapshot_key(snapshot.date, &snapshot.handle);
        let write_failed = |reason: String| SnapshotError::WriteFailed {
            key: key.clone(),
            reason,
        };

        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            write_failed(format!(
                "cannot create {}: {e}",
                self.data_dir.display()
            ))
        })?;

        let encoded = Self::encode(&snapshot.records).map_err(|e| write_failed(e.to_string()))?;
        let path = self.snapshot_path(snapshot.date, &snapshot.handle);
        std::fs::write(&path, encoded).map_err(|e| write_failed(e.to_string()))?;

        info!(
            "Saved {} records to {}",
            snapshot.records.len(),
            path.display()
        );
        Ok(())
    }

    fn load(&self, date: NaiveDate, handle: &str) -> Result<Snapshot, SnapshotError> {
        let key = snapshot_key(date, handle);
        let path = self.snapshot_path(date, handle);
        debug!("Loading snapshot {} from {}", key, path.display());

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound { key });
            }
            Err(e) => {
                return Err(SnapshotError::Corrupt {
                    key,
                    reason: e.to_string(),
                });
            }
        };

        let records: Vec<UserRecord> =
            serde_json::from_str(&content).map_err(|e| SnapshotError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        Ok(Snapshot {
            date,
            handle: handle.to_string(),
            records,
        })
    }
}
