use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use trendvisor_core::{TaskRecord, TrendvisorError, TrendvisorResult};

use crate::store::{decode_snapshot, encode_snapshot, StateStore};

/// File-based store: one pretty-printed JSON snapshot per task.
///
/// Snapshots are written to a temporary file and renamed into place, so a
/// reader sees either the previous or the new snapshot, never a torn one.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// Fails with [`TrendvisorError::StoreUnavailable`] when the directory
    /// cannot be created or is not a directory.
    pub async fn new(dir: impl Into<PathBuf>) -> TrendvisorResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            TrendvisorError::StoreUnavailable(format!("{}: {e}", dir.display()))
        })?;
        let meta = tokio::fs::metadata(&dir).await.map_err(|e| {
            TrendvisorError::StoreUnavailable(format!("{}: {e}", dir.display()))
        })?;
        if !meta.is_dir() {
            return Err(TrendvisorError::StoreUnavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        info!(dir = %dir.display(), "File state store opened");
        Ok(Self { dir })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(task_id)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, task: &TaskRecord) -> TrendvisorResult<()> {
        let snapshot = encode_snapshot(task)?;
        let path = self.task_path(&task.task_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, snapshot).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(task_id = %task.task_id, path = %path.display(), "Task snapshot written");
        Ok(())
    }

    async fn get(&self, task_id: &str) -> TrendvisorResult<Option<TaskRecord>> {
        let path = self.task_path(task_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(path = %path.display(), "Task snapshot is not UTF-8");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(decode_snapshot(task_id, &raw))
    }

    async fn list(&self) -> TrendvisorResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Some(id) = decode_file_stem(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Maps a task id to a portable file stem. Bytes outside `[A-Za-z0-9_-]`
/// are written as `%XX`, which keeps the mapping reversible.
fn encode_file_stem(task_id: &str) -> String {
    let mut out = String::with_capacity(task_id.len());
    for byte in task_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_file_stem(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
