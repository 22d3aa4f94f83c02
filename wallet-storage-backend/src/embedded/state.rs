//! In-memory wallet state and its on-disk snapshot

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use wallet_storage_core::types::{StorageRecord, Tags};
use wallet_storage_core::{StorageError, StorageOp, StorageResult};

/// Snapshot format version written to disk.
const SNAPSHOT_VERSION: u32 = 1;

/// `(type, id)`
pub type RecordKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: Vec<u8>,
    pub tags: Tags,
}

impl StoredValue {
    pub fn to_record(&self, key: &RecordKey) -> StorageRecord {
        StorageRecord {
            record_type: key.0.clone(),
            id: key.1.clone(),
            value: self.value.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Records of one wallet, ordered by `(type, id)`.
#[derive(Debug, Clone, Default)]
pub struct WalletState {
    pub records: BTreeMap<RecordKey, StoredValue>,
    pub metadata: Vec<u8>,
}

/// Reverse steps for a partially or fully applied batch.
#[derive(Debug, Default)]
pub struct UndoLog {
    steps: Vec<UndoStep>,
}

#[derive(Debug)]
enum UndoStep {
    Remove(RecordKey),
    Restore(RecordKey, StoredValue),
    Metadata(Vec<u8>),
}

impl UndoLog {
    /// Put `state` back to how it was before the logged steps.
    pub fn revert(self, state: &mut WalletState) {
        for step in self.steps.into_iter().rev() {
            match step {
                UndoStep::Remove(key) => {
                    state.records.remove(&key);
                }
                UndoStep::Restore(key, value) => {
                    state.records.insert(key, value);
                }
                UndoStep::Metadata(previous) => state.metadata = previous,
            }
        }
    }
}

impl WalletState {
    /// Apply `ops` in order. On error every applied step is reverted before
    /// returning, so the state is untouched.
    pub fn apply(&mut self, ops: &[StorageOp]) -> StorageResult<UndoLog> {
        let mut undo = UndoLog::default();
        for op in ops {
            if let Err(e) = self.apply_one(op, &mut undo) {
                undo.revert(self);
                return Err(e);
            }
        }
        Ok(undo)
    }

    pub fn replace_metadata(&mut self, metadata: &[u8]) -> UndoLog {
        let previous = std::mem::replace(&mut self.metadata, metadata.to_vec());
        UndoLog {
            steps: vec![UndoStep::Metadata(previous)],
        }
    }

    fn apply_one(&mut self, op: &StorageOp, undo: &mut UndoLog) -> StorageResult<()> {
        let key = (op.record_type().to_string(), op.id().to_string());

        if let StorageOp::Add(record) = op {
            if self.records.contains_key(&key) {
                return Err(StorageError::duplicate_record(&key.0, &key.1));
            }
            self.records.insert(
                key.clone(),
                StoredValue {
                    value: record.value.clone(),
                    tags: record.tags.clone(),
                },
            );
            undo.steps.push(UndoStep::Remove(key));
            return Ok(());
        }

        let Some(current) = self.records.get_mut(&key) else {
            return Err(StorageError::record_not_found(&key.0, &key.1));
        };
        let previous = current.clone();
        match op {
            StorageOp::UpdateValue { value, .. } => current.value.clone_from(value),
            StorageOp::UpdateTags { tags, .. } => current.tags.clone_from(tags),
            StorageOp::AddTags { tags, .. } => {
                current
                    .tags
                    .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            StorageOp::DeleteTags { names, .. } => {
                for name in names {
                    current.tags.remove(name);
                }
            }
            StorageOp::Delete { .. } => {
                self.records.remove(&key);
            }
            StorageOp::Add(_) => {}
        }
        undo.steps.push(UndoStep::Restore(key, previous));
        Ok(())
    }
}

// ===== Snapshot =====

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    version: u32,
    metadata: String,
    records: Vec<SnapshotRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRecord {
    #[serde(rename = "type")]
    record_type: String,
    id: String,
    value: String,
    #[serde(default)]
    tags: Tags,
}

impl WalletState {
    pub fn to_snapshot_bytes(&self) -> StorageResult<Vec<u8>> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            metadata: BASE64.encode(&self.metadata),
            records: self
                .records
                .iter()
                .map(|((record_type, id), stored)| SnapshotRecord {
                    record_type: record_type.clone(),
                    id: id.clone(),
                    value: BASE64.encode(&stored.value),
                    tags: stored.tags.clone(),
                })
                .collect(),
        };
        serde_json::to_vec(&snapshot)
            .map_err(|e| StorageError::Io(format!("Failed to encode wallet snapshot: {e}")))
    }

    pub fn from_snapshot_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::Io(format!("Corrupt wallet snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::Io(format!(
                "Unsupported wallet snapshot version {}",
                snapshot.version
            )));
        }

        let decode = |field: &str, s: &str| {
            BASE64
                .decode(s)
                .map_err(|e| StorageError::Io(format!("Corrupt wallet snapshot {field}: {e}")))
        };

        let mut state = Self {
            records: BTreeMap::new(),
            metadata: decode("metadata", &snapshot.metadata)?,
        };
        for record in snapshot.records {
            let value = decode("value", &record.value)?;
            state.records.insert(
                (record.record_type, record.id),
                StoredValue {
                    value,
                    tags: record.tags,
                },
            );
        }
        Ok(state)
    }

    pub fn load(path: &Path) -> StorageResult<Self> {
        let bytes = fs::read(path).map_err(|e| {
            StorageError::Io(format!("Failed to read '{}': {e}", path.display()))
        })?;
        Self::from_snapshot_bytes(&bytes)
    }

}

/// Durably replace the snapshot at `path` with `bytes`.
pub fn write_snapshot(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    write_atomic(path, bytes)
        .map_err(|e| StorageError::Io(format!("Failed to write '{}': {e}", path.display())))
}

/// Temp files `write_atomic` leaves next to `snapshot` when interrupted.
pub fn is_snapshot_temp(snapshot: &Path, candidate: &Path) -> bool {
    let (Some(snapshot), Some(candidate)) = (
        snapshot.file_name().and_then(|name| name.to_str()),
        candidate.file_name().and_then(|name| name.to_str()),
    ) else {
        return false;
    };
    candidate
        .strip_prefix(snapshot)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|rest| rest.ends_with(".tmp"))
}

/// Write `data` to a temp file next to `path`, sync it, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file name"))?;
    let temp_path = parent.join(format!("{filename}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;
    if let Err(e) = file.write_all(data).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    drop(file);

    rename_with_fallback(&temp_path, path)
}

/// Rename that also works where the destination must not exist yet.
fn rename_with_fallback(temp_path: &Path, destination: &Path) -> io::Result<()> {
    if let Err(initial_err) = fs::rename(temp_path, destination) {
        let _ = fs::remove_file(destination);
        fs::rename(temp_path, destination).map_err(|retry_err| {
            let _ = fs::remove_file(temp_path);
            io::Error::new(
                retry_err.kind(),
                format!("rename failed (initial: {initial_err}, retry: {retry_err})"),
            )
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, value: &[u8]) -> StorageRecord {
        StorageRecord::new("did", id, value.to_vec()).with_tag("~k", "v")
    }

    #[test]
    fn failed_batch_reverts_earlier_steps() {
        let mut state = WalletState::default();
        state.apply(&[StorageOp::Add(record("a", b"1"))]).unwrap();

        let res = state.apply(&[
            StorageOp::update_value("did", "a", b"2".to_vec()),
            StorageOp::Add(record("b", b"x")),
            StorageOp::delete("did", "missing"),
        ]);

        assert!(matches!(res, Err(StorageError::NotFound(_))));
        assert_eq!(state.records.len(), 1);
        let a = &state.records[&("did".to_string(), "a".to_string())];
        assert_eq!(a.value, b"1");
    }

    #[test]
    fn undo_log_reverts_successful_batch() {
        let mut state = WalletState::default();
        state.apply(&[StorageOp::Add(record("a", b"1"))]).unwrap();
        let before = state.records.clone();

        let undo = state
            .apply(&[
                StorageOp::delete_tags("did", "a", vec!["~k".into()]),
                StorageOp::delete("did", "a"),
                StorageOp::Add(record("a", b"new")),
            ])
            .unwrap();
        undo.revert(&mut state);

        assert_eq!(state.records, before);
    }

    #[test]
    fn tag_ops_leave_value_alone() {
        let mut state = WalletState::default();
        state.apply(&[StorageOp::Add(record("a", b"cipher"))]).unwrap();

        let mut extra = Tags::new();
        extra.insert("~k".into(), "v2".into());
        extra.insert("enc".into(), "e".into());
        state
            .apply(&[StorageOp::add_tags("did", "a", extra)])
            .unwrap();

        let a = &state.records[&("did".to_string(), "a".to_string())];
        assert_eq!(a.value, b"cipher");
        assert_eq!(a.tags.get("~k").map(String::as_str), Some("v2"));
        assert_eq!(a.tags.len(), 2);
    }

    #[test]
    fn snapshot_preserves_bytes() {
        let mut state = WalletState {
            metadata: vec![0, 255, 7],
            ..WalletState::default()
        };
        state
            .apply(&[StorageOp::Add(record("a", &[0xde, 0xad, 0x00, 0xff]))])
            .unwrap();

        let restored = WalletState::from_snapshot_bytes(&state.to_snapshot_bytes().unwrap()).unwrap();
        assert_eq!(restored.records, state.records);
        assert_eq!(restored.metadata, state.metadata);
    }

    #[test]
    fn persist_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wallet.json");

        let mut state = WalletState::default();
        state.apply(&[StorageOp::Add(record("a", b"1"))]).unwrap();
        write_snapshot(&path, &state.to_snapshot_bytes().unwrap()).unwrap();
        state.apply(&[StorageOp::Add(record("b", b"2"))]).unwrap();
        write_snapshot(&path, &state.to_snapshot_bytes().unwrap()).unwrap();

        let loaded = WalletState::load(&path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        // No temp files left behind.
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn only_snapshot_temp_files_match() {
        let snapshot = Path::new("/w/wallet.json");
        assert!(is_snapshot_temp(snapshot, Path::new("/w/wallet.json.3f2a.tmp")));
        assert!(!is_snapshot_temp(snapshot, Path::new("/w/wallet.json")));
        assert!(!is_snapshot_temp(snapshot, Path::new("/w/holiday.jpg")));
        assert!(!is_snapshot_temp(snapshot, Path::new("/w/wallet.jsonx.tmp")));
    }

    #[test]
    fn corrupt_snapshot_is_io_error() {
        assert!(matches!(
            WalletState::from_snapshot_bytes(b"{not json"),
            Err(StorageError::Io(_))
        ));
    }
}
