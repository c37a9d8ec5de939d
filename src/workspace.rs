//! Per-site working directory: raw listings, downloaded PDFs and metadata sidecars.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Local state of one document before it is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentStatus {
    pub already_processed: bool,
    pub pdf_exists: bool,
    pub metadata_exists: bool,
}

impl DocumentStatus {
    /// Processed before, or both files already on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.already_processed || (self.pdf_exists && self.metadata_exists)
    }
}

/// Directory layout for one legislature mirror.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the workspace directories under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let workspace = Self { root: root.into() };
        for dir in [
            workspace.documents_dir(),
            workspace.metadata_dir(),
            workspace.list_dir(),
            workspace.tree_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(workspace)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    #[must_use]
    pub fn documents_dir(&self) -> PathBuf {
        self.raw_dir().join("documents")
    }

    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.raw_dir().join("metadata")
    }

    #[must_use]
    pub fn list_dir(&self) -> PathBuf {
        self.raw_dir().join("list")
    }

    #[must_use]
    pub fn tree_dir(&self) -> PathBuf {
        self.raw_dir().join("tree")
    }

    #[must_use]
    pub fn pdf_path(&self, filename: &str) -> PathBuf {
        self.documents_dir().join(filename)
    }

    /// Sidecar path for a document, named after its PDF stem.
    #[must_use]
    pub fn metadata_path(&self, stem: &str) -> PathBuf {
        self.metadata_dir().join(format!("{stem}.json"))
    }

    #[must_use]
    pub fn list_path(&self, name: &str) -> PathBuf {
        self.list_dir().join(name)
    }

    #[must_use]
    pub fn tree_path(&self, name: &str) -> PathBuf {
        self.tree_dir().join(name)
    }

    /// State file stored at the workspace root.
    #[must_use]
    pub fn state_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Compute the local status of a document.
    pub async fn status(&self, pdfs: &[PathBuf], metadata: &Path, already_processed: bool) -> DocumentStatus {
        let mut pdf_exists = !pdfs.is_empty();
        for pdf in pdfs {
            if !exists(pdf).await {
                pdf_exists = false;
                break;
            }
        }
        DocumentStatus {
            already_processed,
            pdf_exists,
            metadata_exists: exists(metadata).await,
        }
    }

    /// Write a pretty-printed sidecar, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write_sidecar(&self, path: &Path, sidecar: &Map<String, Value>) -> Result<()> {
        write_json(path, &Value::Object(sidecar.clone())).await
    }

    /// Remove files, ignoring any that are already gone.
    pub async fn remove_quietly(&self, paths: &[PathBuf]) {
        for path in paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
            }
        }
    }

    /// Delete everything inside `dir`, keeping the directory itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or recreated.
    pub async fn clear_dir(&self, dir: &Path) -> Result<usize> {
        if !exists(dir).await {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove entry"),
            }
        }
        Ok(removed)
    }

    /// Delete regular files in `dir` whose modification time is older than `age`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub async fn remove_older_than(&self, dir: &Path, age: Duration) -> Result<usize> {
        if !exists(dir).await {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if meta.modified().is_ok_and(|m| m < cutoff) {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!(path = %entry.path().display(), error = %e, "Failed to remove stale file");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Whether a path exists, treating errors as absence.
pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Write any JSON value pretty-printed, creating parent directories as needed.
///
/// The file is written next to `path` with a `.tmp` suffix and renamed into
/// place, so readers never see a partial document.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub async fn write_json(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write file: {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace file: {}", path.display()))
}

/// Read and parse a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub async fn read_json(path: &Path) -> Result<Value> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_layout() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path().join("assam")).await.unwrap();
        assert!(ws.documents_dir().is_dir());
        assert!(ws.metadata_dir().is_dir());
        assert!(ws.list_dir().is_dir());
        assert!(ws.tree_dir().is_dir());
        assert_eq!(
            ws.metadata_path("1990-03-12"),
            dir.path().join("assam/raw/metadata/1990-03-12.json")
        );
    }

    #[tokio::test]
    async fn test_write_json_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue/DB_LA_1.json");

        write_json(&path, &json!({"unique_id": "DB_LA_1"})).await.unwrap();
        write_json(&path, &json!({"unique_id": "DB_LA_2"})).await.unwrap();

        assert_eq!(read_json(&path).await.unwrap(), json!({"unique_id": "DB_LA_2"}));
        assert!(!dir.path().join("queue/DB_LA_1.json.tmp").exists());
        let mut entries = tokio::fs::read_dir(dir.path().join("queue")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["DB_LA_1.json"]);
    }

    #[tokio::test]
    async fn test_status() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).await.unwrap();
        let pdf = ws.pdf_path("a.pdf");
        let meta = ws.metadata_path("a");

        let status = ws.status(&[pdf.clone()], &meta, false).await;
        assert!(!status.exists());

        std::fs::write(&pdf, b"%PDF").unwrap();
        let status = ws.status(&[pdf.clone()], &meta, false).await;
        assert!(status.pdf_exists);
        assert!(!status.exists());

        ws.write_sidecar(&meta, json!({"title": "x"}).as_object().unwrap())
            .await
            .unwrap();
        let status = ws.status(&[pdf], &meta, false).await;
        assert!(status.exists());

        let status = ws.status(&[], &meta, true).await;
        assert!(!status.pdf_exists);
        assert!(status.exists());
    }

    #[tokio::test]
    async fn test_sidecar_keeps_unicode() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).await.unwrap();
        let path = ws.metadata_path("kerala");
        ws.write_sidecar(&path, json!({"subject_mal": "നിയമസഭ"}).as_object().unwrap())
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("നിയമസഭ"));
        assert_eq!(read_json(&path).await.unwrap()["subject_mal"], "നിയമസഭ");
    }

    #[tokio::test]
    async fn test_clear_dir_and_remove_quietly() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).await.unwrap();
        std::fs::create_dir_all(ws.documents_dir().join("1234")).unwrap();
        std::fs::write(ws.documents_dir().join("1234/a.pdf"), b"x").unwrap();
        std::fs::write(ws.pdf_path("b.pdf"), b"x").unwrap();

        ws.remove_quietly(&[ws.pdf_path("b.pdf"), ws.pdf_path("never-existed.pdf")])
            .await;
        assert!(!ws.pdf_path("b.pdf").exists());

        let removed = ws.clear_dir(&ws.raw_dir()).await.unwrap();
        assert_eq!(removed, 4);
        assert!(ws.raw_dir().is_dir());
        assert!(!ws.documents_dir().exists());
    }

    #[tokio::test]
    async fn test_remove_older_than_keeps_fresh_files() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::create(dir.path()).await.unwrap();
        std::fs::write(ws.list_path("1990-01-01.json"), b"{}").unwrap();

        let removed = ws
            .remove_older_than(&ws.list_dir(), Duration::from_secs(7 * 24 * 3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = ws.remove_older_than(&ws.list_dir(), Duration::ZERO).await.unwrap();
        assert!(removed <= 1);
    }
}
