//! Flat-file run state: JSON processed-sets and append-only id logs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A set of identifiers persisted as a JSON array.
///
/// Cloning is cheap; clones share the same underlying set so a shutdown
/// handler can flush state owned by a running mirror.
#[derive(Debug, Clone)]
pub struct ProcessedSet {
    path: Arc<PathBuf>,
    ids: Arc<Mutex<HashSet<String>>>,
}

impl ProcessedSet {
    /// Load a set from `path`.
    ///
    /// A missing file yields an empty set. A file that cannot be parsed is
    /// logged and also yields an empty set, so a truncated write never blocks a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let ids = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(list) => list.into_iter().collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt state file, starting empty");
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file: {}", path.display()))
            }
        };

        debug!(path = %path.display(), count = ids.len(), "Loaded state file");

        Ok(Self {
            path: Arc::new(path),
            ids: Arc::new(Mutex::new(ids)),
        })
    }

    /// Path the set is persisted to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.lock().await.contains(id)
    }

    /// Add an identifier, returning `true` if it was not already present.
    pub async fn insert(&self, id: impl Into<String>) -> bool {
        self.ids.lock().await.insert(id.into())
    }

    /// Add many identifiers, returning how many were new.
    pub async fn extend<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.ids.lock().await;
        let mut added = 0;
        for id in ids {
            if guard.insert(id.into()) {
                added += 1;
            }
        }
        added
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }

    /// Largest number `n` such that `{prefix}{n}` is in the set.
    pub async fn max_numeric(&self, prefix: &str) -> Option<u64> {
        self.ids
            .lock()
            .await
            .iter()
            .filter_map(|id| id.strip_prefix(prefix)?.parse::<u64>().ok())
            .max()
    }

    /// Persist the set as a sorted JSON array.
    ///
    /// The array is written to a sibling temp file and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self) -> Result<()> {
        let mut sorted: Vec<String> = self.ids.lock().await.iter().cloned().collect();
        sorted.sort();

        let json = serde_json::to_string_pretty(&sorted).context("Failed to serialize state")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, self.path.as_path())
            .await
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;

        debug!(path = %self.path.display(), count = sorted.len(), "Saved state file");
        Ok(())
    }
}

/// Newline-delimited id log that is only ever appended to.
///
/// Each log owns its own lock, so concurrent writers to different logs never
/// contend with each other.
#[derive(Debug, Clone)]
pub struct AppendLog {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppendLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every id in the log. A missing log is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub async fn load_set(&self) -> Result<HashSet<String>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(self.path.as_path()).await {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read log: {}", self.path.display())),
        }
    }

    /// Append one id as its own line.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be opened or written.
    pub async fn append(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
            .await
            .with_context(|| format!("Failed to open log: {}", self.path.display()))?;
        file.write_all(format!("{id}\n").as_bytes())
            .await
            .with_context(|| format!("Failed to append to log: {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}
