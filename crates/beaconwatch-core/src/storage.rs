//! File-backed spool for deferred records.
//!
//! Each accepted record is one `<id>.json` file, written to a temporary name
//! and renamed into place so a reader never sees half a record. A consumer
//! drains the spool with [`SpoolSink::pending`] and deletes what it has
//! handled with [`SpoolSink::acknowledge`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dispatcher::{DeferredSink, RetryPolicy, SubmitError};
use crate::error::{BeaconError, Result};
use crate::types::DeferredRecord;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// Default data directory, e.g. `~/.local/share/beaconwatch/`.
///
/// # Errors
///
/// Returns [`BeaconError::PersistenceError`] if no home directory is known.
pub fn default_data_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "beaconwatch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| BeaconError::PersistenceError("Cannot determine data directory".into()))
}

/// Default spool directory: `spool/` under [`default_data_dir`].
///
/// # Errors
///
/// Returns [`BeaconError::PersistenceError`] if no home directory is known.
pub fn default_spool_dir() -> Result<PathBuf> {
    Ok(default_data_dir()?.join("spool"))
}

/// A [`DeferredSink`] writing records to a directory.
#[derive(Debug, Clone)]
pub struct SpoolSink {
    dir: PathBuf,
    retry: RetryPolicy,
}

impl SpoolSink {
    /// Creates a spool in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::IoError`] if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>, retry: RetryPolicy) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Spool directory ready");
        Ok(Self { dir, retry })
    }

    /// Spool directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records not yet acknowledged, oldest first.
    ///
    /// Files that fail to parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::IoError`] if the directory cannot be read.
    pub fn pending(&self) -> Result<Vec<DeferredRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(BeaconError::from)
                .and_then(|content| Ok(serde_json::from_str::<DeferredRecord>(&content)?))
            {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable spool file"),
            }
        }
        // UUIDv7 ids sort by creation time.
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    /// Deletes an acknowledged record.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::RecordNotFound`] if no such record is spooled.
    pub fn acknowledge(&self, id: Uuid) -> Result<()> {
        let path = self.record_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(%id, "Spool record acknowledged");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BeaconError::RecordNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, record: &DeferredRecord) -> Result<()> {
        let content = serde_json::to_vec_pretty(record)?;
        let temp = self.dir.join(format!("{}.{TEMP_EXTENSION}", record.id));
        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, self.record_path(record.id)).await?;
        Ok(())
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }
}

#[async_trait]
impl DeferredSink for SpoolSink {
    async fn submit(&self, record: &DeferredRecord) -> std::result::Result<(), SubmitError> {
        match self.write(record).await {
            Ok(()) => Ok(()),
            Err(BeaconError::PersistenceError(message)) => Err(SubmitError::Rejected(message)),
            Err(e) => Err(SubmitError::Transient(e.to_string())),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionKey;
    use crate::types::{DispatchEnvelope, EventTag};
    use tempfile::TempDir;

    fn record(identifier: &str) -> DeferredRecord {
        let region =
            RegionKey::parse(identifier, "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0", "", "").unwrap();
        DispatchEnvelope::RegionEntered { region }.into_deferred_record()
    }

    fn spool() -> (TempDir, SpoolSink) {
        let dir = TempDir::new().unwrap();
        let sink = SpoolSink::new(dir.path().join("spool"), RetryPolicy::default()).unwrap();
        (dir, sink)
    }

    #[tokio::test]
    async fn test_submit_then_pending() {
        let (_dir, sink) = spool();
        let first = record("a");
        let second = record("b");
        sink.submit(&second).await.unwrap();
        sink.submit(&first).await.unwrap();

        let pending = sink.pending().unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(pending[0].event, EventTag::Enter);
    }

    #[tokio::test]
    async fn test_resubmit_is_idempotent() {
        let (_dir, sink) = spool();
        let rec = record("a");
        sink.submit(&rec).await.unwrap();
        sink.submit(&rec).await.unwrap();
        assert_eq!(sink.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_removes_record() {
        let (_dir, sink) = spool();
        let rec = record("a");
        sink.submit(&rec).await.unwrap();
        sink.acknowledge(rec.id).unwrap();
        assert!(sink.pending().unwrap().is_empty());

        let err = sink.acknowledge(rec.id).unwrap_err();
        assert!(matches!(err, BeaconError::RecordNotFound(_)));
    }

    #[test]
    fn test_pending_skips_foreign_and_corrupt_files() {
        let (_dir, sink) = spool();
        std::fs::write(sink.dir().join("notes.txt"), "hello").unwrap();
        std::fs::write(sink.dir().join("broken.json"), "{").unwrap();
        std::fs::write(sink.dir().join("half.json.tmp"), "{").unwrap();
        assert!(sink.pending().unwrap().is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let (dir, sink) = spool();
        let rec = record("a");
        tokio_test::block_on(sink.submit(&rec)).unwrap();

        let reopened = SpoolSink::new(dir.path().join("spool"), RetryPolicy::default()).unwrap();
        assert_eq!(reopened.pending().unwrap(), vec![rec]);
    }
}
