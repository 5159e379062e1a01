//! Sandbox path resolution
//!
//! A client path is joined onto the sandbox root and canonicalized. When the
//! target does not exist yet (mkdir, upload, rename destinations) the path is
//! normalized lexically instead and only its deepest existing ancestor is
//! canonicalized, so symlinks below that ancestor are not followed. Either way
//! the result must be the root itself or lie below it, compared by path
//! component rather than by string prefix (`/data/root-evil` is not inside
//! `/data/root`).
//!
//! A [`ResolvedPath`] carries two paths. `full` follows every symlink and is
//! what reads go through. `entry` is the directory entry the client named,
//! with only its parent canonicalized, and is what rename, move and delete
//! act on, so a symlink is renamed or unlinked rather than its target.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::FileError;

/// The single directory every request is confined to
#[derive(Debug, Clone)]
pub struct SandboxRoot {
    root: Arc<PathBuf>,
}

/// An absolute path proven to be inside a [`SandboxRoot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    full: PathBuf,
    entry: PathBuf,
    relative: String,
}

impl SandboxRoot {
    /// Canonicalizes `root` once; falls back to lexical normalization if it
    /// cannot be canonicalized.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(root))
                .unwrap_or_else(|_| root.to_path_buf())
        };
        let root = absolute
            .canonicalize()
            .unwrap_or_else(|_| normalize_lexically(&absolute));
        Self {
            root: Arc::new(root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied path relative to the root.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, FileError> {
        if raw.contains('\0') {
            tracing::warn!(path = raw, "Rejected path containing NUL byte");
            return Err(FileError::AccessDenied);
        }
        // `root + "/" + raw`: a leading slash never makes the path absolute
        let joined = self.root.join(raw.trim_start_matches('/'));
        self.contain(&joined)
    }

    /// Re-validate a path built from an already resolved one (rename/move targets).
    pub fn resolve_absolute(&self, candidate: &Path) -> Result<ResolvedPath, FileError> {
        if !self.contains(candidate) {
            tracing::warn!(path = %candidate.display(), "Rejected path outside sandbox");
            return Err(FileError::AccessDenied);
        }
        self.contain(candidate)
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(self.root.as_path())
    }

    /// `/`-separated path of `full` below the root; empty for the root itself.
    pub fn relative(&self, full: &Path) -> Option<String> {
        let rest = full.strip_prefix(self.root.as_path()).ok()?;
        let parts: Vec<_> = rest
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn contain(&self, joined: &Path) -> Result<ResolvedPath, FileError> {
        let lexical = normalize_lexically(joined);
        let full = match joined.canonicalize() {
            Ok(p) => p,
            Err(_) => canonicalize_existing_ancestor(&lexical),
        };
        let entry = match (lexical.parent(), lexical.file_name()) {
            (Some(parent), Some(name)) => canonicalize_or_ancestor(parent).join(name),
            _ => full.clone(),
        };

        // Both the target and the named entry must stay inside
        match (self.relative(&full), self.relative(&entry)) {
            (Some(_), Some(relative)) => Ok(ResolvedPath {
                full,
                entry,
                relative,
            }),
            _ => {
                tracing::warn!(
                    path = %joined.display(),
                    resolved = %full.display(),
                    "Rejected path escaping sandbox"
                );
                Err(FileError::AccessDenied)
            }
        }
    }
}

impl ResolvedPath {
    pub fn full(&self) -> &Path {
        &self.full
    }

    /// The entry itself; a trailing symlink is not followed.
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// Location of [`Self::entry`] below the root, `/`-separated.
    pub fn relative(&self) -> &str {
        &self.relative
    }

    pub fn is_root(&self) -> bool {
        self.relative.is_empty()
    }

    /// Name of the entry as the client addressed it, or empty for the root
    pub fn file_name(&self) -> String {
        if self.is_root() {
            return String::new();
        }
        self.entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.full
    }
}

/// Drop `.` segments and collapse `segment/..` pairs without touching the
/// filesystem. `..` at the filesystem root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn canonicalize_or_ancestor(path: &Path) -> PathBuf {
    path.canonicalize()
        .unwrap_or_else(|_| canonicalize_existing_ancestor(path))
}

fn canonicalize_existing_ancestor(path: &Path) -> PathBuf {
    for ancestor in path.ancestors().skip(1) {
        if let Ok(canonical) = ancestor.canonicalize() {
            return match path.strip_prefix(ancestor) {
                Ok(tail) => canonical.join(tail),
                Err(_) => path.to_path_buf(),
            };
        }
    }
    path.to_path_buf()
}
