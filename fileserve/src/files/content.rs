//! Content negotiation for a single file
//!
//! Decides whether a file goes out as a thumbnail, inline text, a base64
//! JSON envelope, or a raw attachment stream.

use std::path::Path;

use axum::body::Body;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use shared_types::Base64Content;
use tokio::fs;
use tokio_util::io::ReaderStream;

use super::thumbnail::{Thumbnail, ThumbnailGenerator};
use super::{FileError, ResolvedPath};

/// Inline previews above this size are refused (50 MiB)
pub const MAX_PREVIEW_BYTES: u64 = 50 * 1024 * 1024;

/// Inline text above this size is streamed instead of read in one go (10 MiB)
pub const STREAM_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Read buffer used for every streamed body
pub const STREAM_BUFFER_BYTES: usize = 64 * 1024;

/// Best-effort MIME type from the file name, `application/octet-stream` if unknown
pub fn mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Types that are sent back verbatim when inline content is requested
pub fn is_inline_text(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/javascript" | "application/xml" | "application/pdf"
        )
}

/// Query flags and headers that steer retrieval
#[derive(Debug, Clone, Default)]
pub struct ContentFlags {
    pub thumbnail: bool,
    pub content: bool,
    pub accept: Option<String>,
}

impl ContentFlags {
    pub fn wants_inline(&self) -> bool {
        self.content
            || self
                .accept
                .as_deref()
                .is_some_and(|accept| accept.contains("application/json"))
    }
}

/// File bytes, either fully read or opened for streaming
#[derive(Debug)]
pub enum FileBody {
    Buffered(Vec<u8>),
    Streamed(fs::File),
}

impl FileBody {
    pub async fn open(path: &Path) -> Result<Self, FileError> {
        let file = fs::File::open(path)
            .await
            .map_err(|e| FileError::io("Failed to open file", e))?;
        Ok(FileBody::Streamed(file))
    }

    pub async fn read(path: &Path) -> Result<Self, FileError> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| FileError::io("Failed to read file", e))?;
        Ok(FileBody::Buffered(bytes))
    }

    pub fn into_body(self) -> Body {
        match self {
            FileBody::Buffered(bytes) => Body::from(bytes),
            FileBody::Streamed(file) => {
                Body::from_stream(ReaderStream::with_capacity(file, STREAM_BUFFER_BYTES))
            }
        }
    }
}

/// How a file is handed back to the client
#[derive(Debug)]
pub enum Delivery {
    Thumbnail(Thumbnail),
    InlineText {
        content_type: String,
        body: FileBody,
    },
    Base64(Base64Content),
    Attachment {
        content_type: String,
        file_name: String,
        length: u64,
        body: FileBody,
    },
}

#[derive(Clone)]
pub struct ContentNegotiator {
    thumbnails: ThumbnailGenerator,
}

impl ContentNegotiator {
    pub fn new(thumbnails: ThumbnailGenerator) -> Self {
        Self { thumbnails }
    }

    /// `file` must be an existing regular file.
    pub async fn negotiate(
        &self,
        file: &ResolvedPath,
        flags: &ContentFlags,
    ) -> Result<Delivery, FileError> {
        let mime = mime_type(file.full());

        if flags.thumbnail {
            if !mime.starts_with("image/") {
                return Err(FileError::NotFound("File is not an image".to_string()));
            }
            return Ok(Delivery::Thumbnail(
                self.thumbnails.generate(file.full(), &mime).await?,
            ));
        }

        let size = fs::metadata(file.full())
            .await
            .map_err(|e| FileError::io("Failed to read file metadata", e))?
            .len();
        let inline = flags.wants_inline();

        if inline && size > MAX_PREVIEW_BYTES {
            return Err(FileError::BadRequest(
                "File is too large to preview, download it instead".to_string(),
            ));
        }

        if inline && is_inline_text(&mime) {
            let body = if size > STREAM_THRESHOLD_BYTES {
                FileBody::open(file.full()).await?
            } else {
                FileBody::read(file.full()).await?
            };
            return Ok(Delivery::InlineText {
                content_type: format!("{mime}; charset=utf-8"),
                body,
            });
        }

        if inline {
            let bytes = fs::read(file.full())
                .await
                .map_err(|e| FileError::io("Failed to read file", e))?;
            return Ok(Delivery::Base64(Base64Content::new(STANDARD.encode(bytes))));
        }

        Ok(Delivery::Attachment {
            content_type: mime,
            file_name: file.file_name(),
            length: size,
            body: FileBody::open(file.full()).await?,
        })
    }
}
