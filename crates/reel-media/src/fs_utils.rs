//! Filesystem helpers: scoped temporary files and cross-device moves.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Removes the files it holds.
///
/// Used for concat manifests and thumbnail candidate frames. The success
/// path calls [`ScopedFiles::remove`]; anything still tracked on drop (error
/// returns) is removed with blocking calls.
#[derive(Debug, Default)]
pub struct ScopedFiles {
    paths: Vec<PathBuf>,
}

impl ScopedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `path`. It does not need to exist yet.
    pub fn track(&mut self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        self.paths.push(path.clone());
        path
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every tracked file without blocking the runtime.
    pub async fn remove(mut self) {
        for path in std::mem::take(&mut self.paths) {
            log_removal(&path, fs::remove_file(&path).await);
        }
    }
}

fn log_removal(path: &Path, outcome: std::io::Result<()>) {
    match outcome {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed scoped file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove scoped file"),
    }
}

impl Drop for ScopedFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            log_removal(path, std::fs::remove_file(path));
        }
    }
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first. On EXDEV it copies to a temporary file next to the
/// destination and renames that into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.exists() {
        return Err(MediaError::FileNotFound(src.to_path_buf()));
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is 18 on Linux and macOS
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &tmp_dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        tracing::error!(
            "Failed to copy file during cross-device move: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        let _ = fs::remove_file(&tmp_dst).await;
        tracing::error!(
            "Failed to rename temp file during cross-device move: {} -> {}: {}",
            tmp_dst.display(),
            dst.display(),
            e
        );
        return Err(e.into());
    }

    // Best effort: the destination is already complete
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

/// Size of a file in bytes.
pub async fn file_size(path: impl AsRef<Path>) -> MediaResult<u64> {
    let path = path.as_ref();
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(MediaError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("final.mp4");
        let dst = dir.path().join("project-1").join("final.mp4");

        fs::write(&src, b"video").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_move_file_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("final.mp4");

        fs::write(&src, b"new content").await.unwrap();
        fs::write(&dst, b"old content").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert_eq!(fs::read_to_string(&dst).await.unwrap(), "new content");
    }

    #[tokio::test]
    async fn test_move_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = move_file(dir.path().join("nope.mp4"), dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }

    #[test]
    fn test_scoped_files_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("frame-0.jpg");
        let b = dir.path().join("frame-1.jpg");
        std::fs::write(&a, b"x").unwrap();

        {
            let mut scoped = ScopedFiles::new();
            scoped.track(&a);
            // never created; dropping must not panic
            scoped.track(&b);
            assert_eq!(scoped.paths().len(), 2);
        }

        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[tokio::test]
    async fn test_scoped_files_remove_empties_tracking() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("concatenated-list.txt");
        tokio::fs::write(&manifest, b"file 'a.mp4'\n").await.unwrap();

        let mut scoped = ScopedFiles::new();
        scoped.track(&manifest);
        scoped.track(dir.path().join("missing.jpg"));
        scoped.remove().await;

        assert!(!manifest.exists());
    }
}
