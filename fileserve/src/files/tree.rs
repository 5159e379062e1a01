//! Directory listing and recursive name search

use std::fs::Metadata;
use std::path::Path;

use chrono::{DateTime, FixedOffset, Utc};
use shared_types::FileEntry;
use tokio::fs;
use walkdir::WalkDir;

use super::content::mime_type;
use super::{FileError, ResolvedPath, SandboxRoot};

/// Reads the live tree under the sandbox root. Holds no cached state.
#[derive(Debug, Clone)]
pub struct FileTree {
    root: SandboxRoot,
    offset: FixedOffset,
}

impl FileTree {
    /// `offset` is the zone `modifiedTime` is rendered in.
    pub fn new(root: SandboxRoot, offset: FixedOffset) -> Self {
        Self { root, offset }
    }

    pub fn root(&self) -> &SandboxRoot {
        &self.root
    }

    /// Direct children of `dir`, sorted by name.
    pub async fn list_directory(&self, dir: &ResolvedPath) -> Result<Vec<FileEntry>, FileError> {
        match fs::metadata(dir.full()).await {
            Ok(m) if m.is_dir() => {}
            Ok(_) => {
                return Err(FileError::BadRequest(format!(
                    "Not a directory: {}",
                    dir.relative()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::not_found())
            }
            Err(e) => return Err(FileError::io("Failed to read directory metadata", e)),
        }

        let mut read_dir = fs::read_dir(dir.full())
            .await
            .map_err(|e| FileError::io("Failed to read directory", e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| FileError::io("Failed to read directory", e))?
        {
            let path = entry.path();
            // Follow symlinks like a plain stat would; keep dangling links as-is
            let metadata = match fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                },
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(self.entry_for(&path, name, &metadata));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Pre-order walk of everything below `start`, keeping entries whose name
    /// contains `query` case-insensitively. Directories are always descended.
    pub async fn search_tree(
        &self,
        start: &ResolvedPath,
        query: &str,
    ) -> Result<Vec<FileEntry>, FileError> {
        if query.is_empty() {
            return Err(FileError::BadRequest(
                "Search query must not be empty".to_string(),
            ));
        }

        let tree = self.clone();
        let start = start.full().to_path_buf();
        let needle = query.to_lowercase();

        let results = tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();
            for entry in WalkDir::new(&start)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.to_lowercase().contains(&needle) {
                    continue;
                }
                let metadata = match std::fs::metadata(entry.path()) {
                    Ok(m) => m,
                    Err(_) => match entry.metadata() {
                        Ok(m) => m,
                        Err(_) => continue,
                    },
                };
                results.push(tree.entry_for(entry.path(), name, &metadata));
            }
            results
        })
        .await
        .map_err(|e| FileError::Server(format!("Search task failed: {e}")))?;

        tracing::debug!(query, matches = results.len(), "Search finished");
        Ok(results)
    }

    fn entry_for(&self, path: &Path, name: String, metadata: &Metadata) -> FileEntry {
        let is_directory = metadata.is_dir();
        FileEntry {
            name,
            is_directory,
            size: if is_directory { 0 } else { metadata.len() },
            modified_time: format_modified(metadata, &self.offset),
            path: self.root.relative(path).unwrap_or_default(),
            mime_type: (!is_directory).then(|| mime_type(path)),
        }
    }
}

fn format_modified(metadata: &Metadata, offset: &FixedOffset) -> String {
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    modified
        .with_timezone(offset)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_fixture() -> (tempfile::TempDir, FileTree) {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("projects/2024/q4")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::create_dir_all(root.join("reports")).unwrap();
        std::fs::write(root.join("readme.md"), "# hi").unwrap();
        std::fs::write(root.join("projects/2024/q4/Report_Final.pdf"), "%PDF").unwrap();
        std::fs::write(root.join("projects/notes.txt"), "notes").unwrap();

        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let sandbox = SandboxRoot::new(temp.path());
        (temp, FileTree::new(sandbox, offset))
    }

    #[tokio::test]
    async fn test_list_root_directory() {
        let (_temp, tree) = tree_fixture();
        let dir = tree.root().resolve("").unwrap();
        let entries = tree.list_directory(&dir).await.unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["empty", "projects", "readme.md", "reports"]);

        let readme = &entries[2];
        assert!(!readme.is_directory);
        assert_eq!(readme.size, 4);
        assert_eq!(readme.path, "readme.md");
        assert!(readme.mime_type.as_deref().unwrap().starts_with("text/"));
        assert_eq!(readme.modified_time.len(), "2024-01-01T00:00:00".len());

        let projects = &entries[1];
        assert!(projects.is_directory);
        assert_eq!(projects.size, 0);
        assert!(projects.mime_type.is_none());
    }

    #[tokio::test]
    async fn test_list_nested_directory_paths_are_relative() {
        let (_temp, tree) = tree_fixture();
        let dir = tree.root().resolve("projects").unwrap();
        let entries = tree.list_directory(&dir).await.unwrap();

        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["projects/2024", "projects/notes.txt"]);
    }

    #[tokio::test]
    async fn test_list_empty_directory() {
        let (_temp, tree) = tree_fixture();
        let dir = tree.root().resolve("empty").unwrap();
        assert!(tree.list_directory(&dir).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_directory() {
        let (_temp, tree) = tree_fixture();
        let dir = tree.root().resolve("nope").unwrap();
        assert!(matches!(
            tree.list_directory(&dir).await,
            Err(FileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_deep() {
        let (_temp, tree) = tree_fixture();
        let root = tree.root().resolve("").unwrap();
        let results = tree.search_tree(&root, "report").await.unwrap();

        let paths: Vec<_> = results.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["projects/2024/q4/Report_Final.pdf", "reports"]);
        assert!(!results[0].path.starts_with('/'));
        assert_eq!(results[0].mime_type.as_deref(), Some("application/pdf"));
        assert!(results[1].is_directory);
    }

    #[tokio::test]
    async fn test_search_includes_directories_and_descends() {
        let (_temp, tree) = tree_fixture();
        let root = tree.root().resolve("").unwrap();
        let results = tree.search_tree(&root, "2024").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "projects/2024");
        assert!(results[0].is_directory);
    }

    #[tokio::test]
    async fn test_search_preorder_parent_before_children() {
        let (_temp, tree) = tree_fixture();
        let root = tree.root().resolve("").unwrap();
        let results = tree.search_tree(&root, "o").await.unwrap();

        let paths: Vec<_> = results.iter().map(|e| e.path.as_str()).collect();
        let projects = paths.iter().position(|p| *p == "projects").unwrap();
        let notes = paths.iter().position(|p| *p == "projects/notes.txt").unwrap();
        assert!(projects < notes);
    }

    #[tokio::test]
    async fn test_search_rejects_empty_query() {
        let (_temp, tree) = tree_fixture();
        let root = tree.root().resolve("").unwrap();
        assert!(matches!(
            tree.search_tree(&root, "").await,
            Err(FileError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_search_without_matches_is_empty() {
        let (_temp, tree) = tree_fixture();
        let root = tree.root().resolve("").unwrap();
        assert!(tree.search_tree(&root, "zzz").await.unwrap().is_empty());
    }
}
