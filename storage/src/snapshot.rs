use hyperrec_core::error::{ErrorCode, HyperrecError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

const PREFIX: &str = "snapshot_";
const EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HyperrecError for SnapshotError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

/// Directory of sequence-numbered engine snapshot documents.
pub struct SnapshotManager {
    dir: PathBuf,
    retain: Option<usize>,
}

impl SnapshotManager {
    /// Keeps every snapshot until [`SnapshotManager::with_retention`] says otherwise.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            retain: None,
        }
    }

    /// After each append only the newest `keep` snapshots stay on disk. `0` keeps all.
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.retain = (keep > 0).then_some(keep);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `data` as snapshot `sequence`. The final name only appears once the bytes are on
    /// disk, so readers never see a partial document.
    pub async fn create_snapshot(&self, sequence: u64, data: &[u8]) -> Result<PathBuf, SnapshotError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).await?;
        }

        let path = self.dir.join(format!("{PREFIX}{sequence:020}.{EXTENSION}"));
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &path).await?;

        Ok(path)
    }

    /// Writes the next snapshot after the latest one on disk, then applies the retention count.
    pub async fn append_snapshot(&self, data: &[u8]) -> Result<(u64, PathBuf), SnapshotError> {
        let next = match self.latest_snapshot().await? {
            Some((sequence, _)) => sequence + 1,
            None => 1,
        };
        let path = self.create_snapshot(next, data).await?;
        if let Err(e) = self.prune().await {
            warn!(error = %e, dir = %self.dir.display(), "Snapshot pruning failed");
        }
        Ok((next, path))
    }

    /// Snapshots on disk, oldest first.
    pub async fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(sequence) = parse_sequence(&path) {
                snapshots.push((sequence, path));
            }
        }
        snapshots.sort_by_key(|(sequence, _)| *sequence);
        Ok(snapshots)
    }

    /// Deletes all but the newest retained snapshots. Returns how many were removed.
    pub async fn prune(&self) -> Result<usize, SnapshotError> {
        let Some(keep) = self.retain else {
            return Ok(0);
        };
        let snapshots = self.list_snapshots().await?;
        let excess = snapshots.len().saturating_sub(keep);
        for (sequence, path) in &snapshots[..excess] {
            fs::remove_file(path).await?;
            debug!(sequence, "Old snapshot removed");
        }
        Ok(excess)
    }

    pub async fn latest_snapshot(&self) -> Result<Option<(u64, PathBuf)>, SnapshotError> {
        Ok(self.list_snapshots().await?.pop())
    }

    pub async fn load_latest(&self) -> Result<Option<(u64, Vec<u8>)>, SnapshotError> {
        match self.latest_snapshot().await? {
            Some((sequence, path)) => Ok(Some((sequence, fs::read(path).await?))),
            None => Ok(None),
        }
    }
}

fn parse_sequence(path: &Path) -> Option<u64> {
    let file_name = path.file_name()?.to_str()?;
    file_name
        .strip_prefix(PREFIX)?
        .strip_suffix(EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sequence_ignores_foreign_files() {
        assert_eq!(
            parse_sequence(Path::new("/tmp/snapshot_00000000000000000042.json")),
            Some(42)
        );
        assert_eq!(parse_sequence(Path::new("/tmp/snapshot_00000000000000000042.tmp")), None);
        assert_eq!(parse_sequence(Path::new("/tmp/notes.json")), None);
    }
}
