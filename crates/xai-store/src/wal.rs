use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use xai_core::types::{Hash32, Timestamp};
use xai_core::RejectReason;

/// Reorg journal phase. `Begin` without a matching `Commit`/`Rollback` at
/// boot means the process died mid-reorg and the store must be rewound to
/// the recorded fork height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalPhase {
    Begin,
    Commit,
    Rollback,
}

/// The single journal record. The file never holds more than one (I9):
/// commit/rollback overwrite the begin they close.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalRecord {
    #[serde(with = "xai_core::types::amount_string")]
    pub id: u128,
    pub op: String,
    pub phase: WalPhase,
    pub old_tip: Hash32,
    pub new_tip: Hash32,
    pub fork_height: u64,
    pub created_at: Timestamp,
}

/// Write-ahead log for reorgs: one JSON record in one file, fsynced on every
/// write via write-temp-then-rename so a crash never leaves a half-written
/// record in place of a good one.
pub struct Wal {
    path: PathBuf,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Journal the start of a reorg. Fails if an uncommitted record already
    /// exists — at most one reorg may be in flight.
    pub fn begin(
        &self,
        old_tip: Hash32,
        new_tip: Hash32,
        fork_height: u64,
        now: Timestamp,
    ) -> Result<WalRecord, RejectReason> {
        if let Some(rec) = self.read()? {
            if rec.phase == WalPhase::Begin {
                return Err(RejectReason::WalCorrupt(format!(
                    "uncommitted reorg record {} already present",
                    rec.id
                )));
            }
        }
        let record = WalRecord {
            id: self.next_id()?,
            op: "reorg".into(),
            phase: WalPhase::Begin,
            old_tip,
            new_tip,
            fork_height,
            created_at: now,
        };
        self.write(&record)?;
        Ok(record)
    }

    /// Close the in-flight reorg as committed. Idempotent: replaying a commit
    /// over an already-closed record is a no-op.
    pub fn commit(&self, now: Timestamp) -> Result<(), RejectReason> {
        self.close(WalPhase::Commit, now)
    }

    /// Close the in-flight reorg as rolled back. Idempotent like `commit`.
    pub fn rollback(&self, now: Timestamp) -> Result<(), RejectReason> {
        self.close(WalPhase::Rollback, now)
    }

    fn close(&self, phase: WalPhase, now: Timestamp) -> Result<(), RejectReason> {
        match self.read()? {
            Some(rec) if rec.phase == WalPhase::Begin => {
                let closed = WalRecord {
                    phase,
                    created_at: now,
                    ..rec
                };
                self.write(&closed)
            }
            Some(_) | None => Ok(()),
        }
    }

    /// Boot-time recovery check. Returns the pending `begin` record if the
    /// node died mid-reorg; the caller rewinds the store to `fork_height`
    /// and then calls [`Wal::rollback`] (or [`Wal::clear`]).
    pub fn recover(&self) -> Result<Option<WalRecord>, RejectReason> {
        match self.read()? {
            Some(rec) if rec.phase == WalPhase::Begin => {
                warn!(id = %rec.id, fork_height = rec.fork_height, "pending reorg found in WAL");
                Ok(Some(rec))
            }
            Some(rec) => {
                info!(id = %rec.id, phase = ?rec.phase, "WAL record already closed");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Remove the journal file entirely.
    pub fn clear(&self) -> Result<(), RejectReason> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RejectReason::StorageError(format!("clearing WAL: {e}"))),
        }
    }

    fn next_id(&self) -> Result<u128, RejectReason> {
        Ok(self.read()?.map(|r| r.id + 1).unwrap_or(1))
    }

    fn read(&self) -> Result<Option<WalRecord>, RejectReason> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RejectReason::StorageError(format!("reading WAL: {e}"))),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RejectReason::WalCorrupt(format!("unparseable WAL record: {e}")))
    }

    fn write(&self, record: &WalRecord) -> Result<(), RejectReason> {
        let bytes = serde_json::to_vec(record)
            .map_err(|e| RejectReason::Serialization(format!("encoding WAL record: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)
            .map_err(|e| RejectReason::StorageError(format!("creating WAL tmp: {e}")))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| RejectReason::StorageError(format!("writing WAL: {e}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| RejectReason::StorageError(format!("publishing WAL record: {e}")))?;
        if let Some(dir) = self.path.parent() {
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wal(tag: &str) -> (Wal, PathBuf) {
        let dir = std::env::temp_dir().join(format!("xai_wal_{tag}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        (Wal::open(dir.join("reorg.wal")), dir)
    }

    #[test]
    fn begin_then_commit_leaves_no_pending() {
        let (wal, dir) = temp_wal("commit");
        wal.begin(Hash32::from_bytes([1; 32]), Hash32::from_bytes([2; 32]), 5, 100)
            .unwrap();
        assert!(wal.recover().unwrap().is_some());
        wal.commit(101).unwrap();
        assert!(wal.recover().unwrap().is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn second_begin_without_close_rejected() {
        let (wal, dir) = temp_wal("double");
        wal.begin(Hash32::ZERO, Hash32::ZERO, 1, 1).unwrap();
        assert!(matches!(
            wal.begin(Hash32::ZERO, Hash32::ZERO, 2, 2),
            Err(RejectReason::WalCorrupt(_))
        ));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn recovery_is_idempotent() {
        let (wal, dir) = temp_wal("idem");
        wal.begin(Hash32::ZERO, Hash32::from_bytes([9; 32]), 7, 1).unwrap();
        let first = wal.recover().unwrap().unwrap();
        let second = wal.recover().unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.fork_height, 7);
        // Closing twice is a no-op, not an error.
        wal.rollback(2).unwrap();
        wal.rollback(3).unwrap();
        assert!(wal.recover().unwrap().is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_refuses() {
        let (wal, dir) = temp_wal("corrupt");
        fs::write(dir.join("reorg.wal"), b"{not json").unwrap();
        assert!(matches!(wal.recover(), Err(RejectReason::WalCorrupt(_))));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn ids_increase_across_reorgs() {
        let (wal, dir) = temp_wal("ids");
        let a = wal.begin(Hash32::ZERO, Hash32::ZERO, 1, 1).unwrap();
        wal.commit(2).unwrap();
        let b = wal.begin(Hash32::ZERO, Hash32::ZERO, 2, 3).unwrap();
        assert!(b.id > a.id);
        let _ = fs::remove_dir_all(dir);
    }
}
