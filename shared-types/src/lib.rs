//! Shared types between the file manager backend and its browser UI
//!
//! Serializable with serde for JSON over HTTP. Field names follow the
//! camelCase protocol the UI already speaks.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Directory Entries
// ============================================================================

/// One row of a directory listing or search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "file-manager.ts")]
pub struct FileEntry {
    pub name: String,

    pub is_directory: bool,

    /// Bytes; always 0 for directories
    pub size: u64,

    /// Local wall-clock time, `YYYY-MM-DDTHH:MM:SS`
    pub modified_time: String,

    /// Path relative to the sandbox root, `/`-separated
    pub path: String,

    /// MIME type, files only
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub mime_type: Option<String>,
}

impl FileEntry {
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }
}

// ============================================================================
// Request Bodies
// ============================================================================

/// JSON body accepted by POST and PUT
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(tag = "action")]
#[ts(export, export_to = "file-manager.ts")]
pub enum FileAction {
    /// POST: create `name` inside the directory at `?path=`
    #[serde(rename = "createFolder")]
    CreateFolder { name: String },

    /// PUT: rename the entry at `?path=` within its parent directory
    #[serde(rename = "rename")]
    Rename {
        #[serde(rename = "newName")]
        new_name: String,
    },

    /// PUT: move the entry at `?path=` into `targetPath` (empty = root)
    #[serde(rename = "move")]
    Move {
        #[serde(rename = "targetPath", default)]
        target_path: String,
    },
}

// ============================================================================
// Responses
// ============================================================================

/// Body returned by every successful mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "file-manager.ts")]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Body returned for every error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "file-manager.ts")]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable code, e.g. `ACCESS_DENIED`
    pub code: String,
}

/// Inline preview of a non-text file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "file-manager.ts")]
pub struct Base64Content {
    pub content: String,
    /// Always `"base64"`
    pub encoding: String,
}

impl Base64Content {
    pub fn new(content: String) -> Self {
        Self {
            content,
            encoding: "base64".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ts_rs::Config;

    #[test]
    fn test_file_entry_wire_names() {
        let entry = FileEntry {
            name: "notes.txt".to_string(),
            is_directory: false,
            size: 12,
            modified_time: "2024-01-02T03:04:05".to_string(),
            path: "docs/notes.txt".to_string(),
            mime_type: Some("text/plain".to_string()),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["isDirectory"], false);
        assert_eq!(json["modifiedTime"], "2024-01-02T03:04:05");
        assert_eq!(json["type"], "text/plain");
        assert!(json.get("mime_type").is_none());
    }

    #[test]
    fn test_directory_entry_omits_type() {
        let entry = FileEntry {
            name: "docs".to_string(),
            is_directory: true,
            size: 0,
            modified_time: "2024-01-02T03:04:05".to_string(),
            path: "docs".to_string(),
            mime_type: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("\"type\""));
        assert!(!entry.is_file());
    }

    #[test]
    fn test_file_action_parsing() {
        let action: FileAction =
            serde_json::from_str(r#"{"action":"createFolder","name":"new"}"#).unwrap();
        assert_eq!(
            action,
            FileAction::CreateFolder {
                name: "new".to_string()
            }
        );

        let action: FileAction =
            serde_json::from_str(r#"{"action":"rename","newName":"b.txt"}"#).unwrap();
        assert_eq!(
            action,
            FileAction::Rename {
                new_name: "b.txt".to_string()
            }
        );

        let action: FileAction = serde_json::from_str(r#"{"action":"move"}"#).unwrap();
        assert_eq!(
            action,
            FileAction::Move {
                target_path: String::new()
            }
        );

        assert!(serde_json::from_str::<FileAction>(r#"{"action":"explode"}"#).is_err());
    }

    #[test]
    fn test_base64_envelope() {
        let body = Base64Content::new("AAEC".to_string());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["encoding"], "base64");
        assert_eq!(json["content"], "AAEC");
    }

    #[test]
    fn export_types() {
        // The export_to attribute in each type's #[ts] macro specifies the output file
        let config = Config::default();
        FileEntry::export(&config).unwrap();
        FileAction::export(&config).unwrap();
        SuccessResponse::export(&config).unwrap();
        ErrorResponse::export(&config).unwrap();
        Base64Content::export(&config).unwrap();
    }
}
