//! Create, upload, rename, move and delete
//!
//! Destinations are always re-resolved through the sandbox root before the
//! filesystem is touched.

use std::path::Path;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use walkdir::WalkDir;

use super::{validate_name, FileError, ResolvedPath, SandboxRoot};

#[derive(Debug, Clone)]
pub struct MutationService {
    root: SandboxRoot,
}

impl MutationService {
    pub fn new(root: SandboxRoot) -> Self {
        Self { root }
    }

    /// Create `name` below `parent`, including any missing segments of `parent`.
    pub async fn create_directory(
        &self,
        parent: &ResolvedPath,
        name: &str,
    ) -> Result<ResolvedPath, FileError> {
        validate_name(name)?;
        let target = self.root.resolve_absolute(&parent.full().join(name))?;

        if exists(target.entry()).await {
            return Err(FileError::Conflict(
                "File or folder already exists".to_string(),
            ));
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o755);
        builder
            .create(target.full())
            .await
            .map_err(|e| FileError::io("Failed to create folder", e))?;

        tracing::info!(path = target.relative(), "Folder created");
        Ok(target)
    }

    /// Stream `source` into `parent/file_name`. The bytes land in a temp file
    /// inside `parent` first and are committed without clobbering, so a
    /// concurrent upload of the same name makes this one fail with `Conflict`.
    pub async fn upload<R>(
        &self,
        parent: &ResolvedPath,
        file_name: &str,
        source: R,
    ) -> Result<ResolvedPath, FileError>
    where
        R: AsyncRead,
    {
        tokio::pin!(source);
        validate_name(file_name)?;
        let target = self.root.resolve_absolute(&parent.full().join(file_name))?;

        if exists(target.entry()).await {
            return Err(FileError::Conflict("File already exists".to_string()));
        }

        let temp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(parent.full())
            .map_err(|e| FileError::io("Failed to upload file", e))?;
        let std_file = temp
            .reopen()
            .map_err(|e| FileError::io("Failed to upload file", e))?;
        let mut file = fs::File::from_std(std_file);

        let written = tokio::io::copy(&mut source, &mut file)
            .await
            .map_err(|e| FileError::io("Failed to upload file", e))?;
        file.flush()
            .await
            .map_err(|e| FileError::io("Failed to upload file", e))?;
        drop(file);

        let destination = target.entry().to_path_buf();
        tokio::task::spawn_blocking(move || temp.persist_noclobber(&destination))
            .await
            .map_err(|e| FileError::Server(format!("Upload task failed: {e}")))?
            .map_err(|e| {
                if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                    FileError::Conflict("File already exists".to_string())
                } else {
                    FileError::io("Failed to upload file", e.error)
                }
            })?;

        tracing::info!(path = target.relative(), bytes = written, "File uploaded");
        Ok(target)
    }

    /// Rename `entry` within its parent directory.
    pub async fn rename(
        &self,
        entry: &ResolvedPath,
        new_name: &str,
    ) -> Result<ResolvedPath, FileError> {
        validate_name(new_name)?;
        if entry.is_root() {
            return Err(FileError::AccessDenied);
        }
        let parent = entry.entry().parent().ok_or(FileError::AccessDenied)?;
        let destination = self.root.resolve_absolute(&parent.join(new_name))?;

        if !exists(entry.entry()).await {
            return Err(FileError::not_found());
        }
        if exists(destination.entry()).await {
            return Err(FileError::Conflict(
                "File or folder already exists".to_string(),
            ));
        }

        fs::rename(entry.entry(), destination.entry())
            .await
            .map_err(|e| FileError::io("Failed to rename", e))?;

        tracing::info!(
            from = entry.relative(),
            to = destination.relative(),
            "Entry renamed"
        );
        Ok(destination)
    }

    /// Move `entry` into `target_dir` (relative to the root; empty = root),
    /// keeping its base name.
    pub async fn move_entry(
        &self,
        entry: &ResolvedPath,
        target_dir: &str,
    ) -> Result<ResolvedPath, FileError> {
        if entry.is_root() {
            return Err(FileError::BadRequest(
                "Cannot move the root directory".to_string(),
            ));
        }

        let base_name = entry.file_name();
        let destination = if target_dir.is_empty() {
            self.root.resolve(&base_name)?
        } else {
            self.root.resolve(&format!("{target_dir}/{base_name}"))?
        };

        if !exists(entry.entry()).await {
            return Err(FileError::not_found());
        }
        if !target_dir.is_empty() {
            let target = self.root.resolve(target_dir)?;
            if !is_dir(target.full()).await {
                return Err(FileError::BadRequest(
                    "Target directory does not exist".to_string(),
                ));
            }
        }
        if exists(destination.entry()).await {
            return Err(FileError::Conflict(
                "File or folder already exists".to_string(),
            ));
        }

        fs::rename(entry.entry(), destination.entry())
            .await
            .map_err(|e| FileError::io("Failed to move", e))?;

        tracing::info!(
            from = entry.relative(),
            to = destination.relative(),
            "Entry moved"
        );
        Ok(destination)
    }

    /// Delete a file, or a directory and everything below it. Each file and
    /// directory must be writable; the first failure aborts and whatever was
    /// already removed stays removed.
    pub async fn delete(&self, entry: &ResolvedPath) -> Result<DeletedKind, FileError> {
        if entry.is_root() {
            return Err(FileError::BadRequest(
                "Cannot delete the root directory".to_string(),
            ));
        }

        let metadata = match fs::symlink_metadata(entry.entry()).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::not_found())
            }
            Err(e) => return Err(FileError::io("Failed to read metadata", e)),
        };

        if !metadata.is_dir() {
            if !metadata.file_type().is_symlink() && metadata.permissions().readonly() {
                return Err(FileError::Server(
                    "File is not writable, cannot delete".to_string(),
                ));
            }
            // Symlinks are unlinked, never followed
            fs::remove_file(entry.entry())
                .await
                .map_err(|e| FileError::io("Failed to delete file", e))?;
            tracing::info!(path = entry.relative(), "File deleted");
            return Ok(DeletedKind::File);
        }

        if metadata.permissions().readonly() {
            return Err(FileError::Server(
                "Directory is not writable, cannot delete".to_string(),
            ));
        }

        let dir = entry.entry().to_path_buf();
        tokio::task::spawn_blocking(move || remove_tree(&dir))
            .await
            .map_err(|e| FileError::Server(format!("Delete task failed: {e}")))?
            .map_err(|message| {
                tracing::error!(path = entry.relative(), error = %message, "Directory delete aborted");
                FileError::Server(format!("Failed to delete directory: {message}"))
            })?;

        tracing::info!(path = entry.relative(), "Directory deleted");
        Ok(DeletedKind::Directory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletedKind {
    File,
    Directory,
}

async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Depth-first removal, children before their directory.
fn remove_tree(dir: &Path) -> Result<(), String> {
    let entries = WalkDir::new(dir)
        .contents_first(true)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type();
        if !file_type.is_symlink() {
            let metadata = entry.metadata().map_err(|e| e.to_string())?;
            if metadata.permissions().readonly() {
                return Err(format!("{} is not writable", path.display()));
            }
        }
        let removed = if file_type.is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        };
        removed.map_err(|e| format!("{}: {e}", path.display()))?;
    }
    Ok(())
}
