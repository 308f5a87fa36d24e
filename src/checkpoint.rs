use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use crate::{Error, Result};

/// Append-only log of finished work-item keys, one per line.
///
/// The whole file is read into a set when opened. `mark_done` appends one line and
/// syncs it to disk before returning, so a key reported done survives a crash.
/// A torn last line (no trailing newline) is dropped on open.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    done: HashSet<String>,
    file: File,
}

impl CheckpointStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fail = |source| Error::Checkpoint {
            path: path.clone(),
            source,
        };

        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(fail(e)),
        };

        let complete_len = contents
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        let done = String::from_utf8_lossy(&contents[..complete_len])
            .lines()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect::<HashSet<_>>();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(fail)?;
        if complete_len < contents.len() {
            tracing::warn!(
                path = %path.display(),
                "dropping torn record at the end of the checkpoint file"
            );
            file.set_len(complete_len as u64).await.map_err(fail)?;
        }

        tracing::debug!(path = %path.display(), entries = done.len(), "loaded checkpoint");
        Ok(Self { path, done, file })
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    /// Durably records `key` as finished. Marking a key twice writes it once.
    pub async fn mark_done(&mut self, key: &str) -> Result<()> {
        if self.done.contains(key) {
            return Ok(());
        }
        let record = format!("{key}\n");
        let fail = |source| Error::Checkpoint {
            path: self.path.clone(),
            source,
        };
        self.file.write_all(record.as_bytes()).await.map_err(fail)?;
        self.file.flush().await.map_err(fail)?;
        self.file.sync_data().await.map_err(fail)?;
        self.done.insert(key.to_owned());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
