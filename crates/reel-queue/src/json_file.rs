//! Whole-file JSON persistence with atomic replacement.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::QueueResult;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read and decode `path`. A missing file yields `None`.
pub async fn load<T: DeserializeOwned>(path: &Path) -> QueueResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `value` to a sibling temp file and rename it over `path`.
///
/// Readers observe either the previous contents or the new ones.
pub async fn save<T: Serialize>(path: &Path, value: &T) -> QueueResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    if let Err(e) = fs::write(&tmp, &bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        save(&path, &vec!["a", "b"]).await.unwrap();
        let loaded: Option<Vec<String>> = load(&path).await.unwrap();

        assert_eq!(loaded, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!tmp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Vec<String>> = load(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").await.unwrap();

        let loaded: QueueResult<Option<Vec<String>>> = load(&path).await;
        assert!(loaded.is_err());
    }
}
