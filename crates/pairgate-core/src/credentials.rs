//! File-backed credentials store.
//!
//! The upstream hands us named opaque blobs; each one lands in its own file
//! under the sessions directory. Content is never interpreted here.

use crate::error::PairgateError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Named opaque credential blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSnapshot {
    files: BTreeMap<String, Vec<u8>>,
}

impl CredentialSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), data.into());
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Reject anything that is not a plain file name.
pub fn validate_name(name: &str) -> Result<(), PairgateError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.ends_with(TMP_SUFFIX);
    if bad {
        return Err(PairgateError::Credentials(format!(
            "invalid credential file name '{name}'"
        )));
    }
    Ok(())
}

const TMP_SUFFIX: &str = ".tmp";

/// Credentials directory on disk.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it does not exist yet. Blocking; for startup.
    pub fn ensure_dir(&self) -> Result<(), PairgateError> {
        if !self.dir.exists() {
            info!("creating sessions folder at {}", self.dir.display());
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                PairgateError::Credentials(format!(
                    "failed to create {}: {e}",
                    self.dir.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Async counterpart of [`Self::ensure_dir`] for the load and save paths.
    async fn create_dir(&self) -> Result<(), PairgateError> {
        if tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(());
        }
        info!("creating sessions folder at {}", self.dir.display());
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            PairgateError::Credentials(format!("failed to create {}: {e}", self.dir.display()))
        })
    }

    /// Read every credential file in the directory.
    pub async fn load(&self) -> Result<CredentialSnapshot, PairgateError> {
        self.create_dir().await?;

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            PairgateError::Credentials(format!("failed to read {}: {e}", self.dir.display()))
        })?;

        let mut snapshot = CredentialSnapshot::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PairgateError::Credentials(format!("failed to list credentials: {e}")))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_name(&name).is_err() {
                continue;
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PairgateError::Credentials(format!("failed to stat {name}: {e}")))?;
            if !file_type.is_file() {
                continue;
            }
            let data = tokio::fs::read(entry.path())
                .await
                .map_err(|e| PairgateError::Credentials(format!("failed to read {name}: {e}")))?;
            snapshot.insert(name, data);
        }

        debug!(
            "loaded {} credential file(s) from {}",
            snapshot.len(),
            self.dir.display()
        );
        Ok(snapshot)
    }

    /// Write each blob atomically (temp file, then rename).
    pub async fn save(&self, snapshot: &CredentialSnapshot) -> Result<(), PairgateError> {
        self.create_dir().await?;

        for (name, data) in snapshot.iter() {
            validate_name(name)?;
            let target = self.dir.join(name);
            let tmp = self
                .dir
                .join(format!("{name}.{}{TMP_SUFFIX}", Uuid::new_v4().simple()));
            tokio::fs::write(&tmp, data)
                .await
                .map_err(|e| PairgateError::Credentials(format!("failed to write {name}: {e}")))?;
            if let Err(e) = tokio::fs::rename(&tmp, &target).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(PairgateError::Credentials(format!(
                    "failed to replace {name}: {e}"
                )));
            }
        }

        debug!(
            "saved {} credential file(s) to {}",
            snapshot.len(),
            self.dir.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("creds.json").is_ok());
        assert!(validate_name("pre-key-1.json").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("creds.json.tmp").is_err());
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("sessions");
        let store = CredentialStore::new(&dir);
        store.ensure_dir().unwrap();
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_load_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path().join("sessions"));
        let snapshot = store.load().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(store.dir().is_dir(), "load should create the directory");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path());

        let mut snapshot = CredentialSnapshot::new();
        snapshot.insert("creds.json", b"{\"me\":null}".to_vec());
        snapshot.insert("app-state-sync-key-1.json", vec![0u8, 1, 2]);
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, snapshot);

        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("deploy").join("sessions");
        let store = CredentialStore::new(&dir);

        let mut snapshot = CredentialSnapshot::new();
        snapshot.insert("creds.json", b"{}".to_vec());
        store.save(&snapshot).await.unwrap();
        assert!(dir.join("creds.json").is_file());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path());

        let mut first = CredentialSnapshot::new();
        first.insert("creds.json", b"old".to_vec());
        store.save(&first).await.unwrap();

        let mut second = CredentialSnapshot::new();
        second.insert("creds.json", b"new".to_vec());
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.get("creds.json"), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn test_save_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path().join("sessions"));
        let mut snapshot = CredentialSnapshot::new();
        snapshot.insert("../escape.json", b"x".to_vec());
        let err = store.save(&snapshot).await.unwrap_err();
        assert!(err.to_string().contains("invalid credential file name"));
        assert!(!tmp.path().join("escape.json").exists());
    }

    #[tokio::test]
    async fn test_load_fails_when_path_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("sessions");
        std::fs::write(&file, b"not a dir").unwrap();
        let store = CredentialStore::new(&file);
        let err = store.load().await.unwrap_err();
        assert!(err.to_string().contains("credentials error"));
    }

    #[tokio::test]
    async fn test_load_skips_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("creds.json"), b"{}").unwrap();
        let loaded = CredentialStore::new(tmp.path()).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
