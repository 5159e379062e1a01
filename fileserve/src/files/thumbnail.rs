//! Image thumbnails
//!
//! Strategies run in order until one succeeds: native decoding with the
//! `image` crate, then an external ImageMagick-style converter. If every
//! strategy fails the original bytes are passed through unchanged, so callers
//! must not assume a thumbnail response has actually been resized.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, GenericImageView, ImageFormat, Rgba, RgbImage, RgbaImage};

use super::content::FileBody;
use super::FileError;

pub const THUMBNAIL_MAX_WIDTH: u32 = 200;
pub const THUMBNAIL_MAX_HEIGHT: u32 = 200;
pub const JPEG_QUALITY: u8 = 80;
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";
/// One day
pub const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Converter {binary} failed: {status}")]
    ConverterFailed { binary: String, status: String },

    #[error("Converter {binary} timed out after {timeout:?}")]
    ConverterTimeout { binary: String, timeout: Duration },

    #[error("No converter binaries configured")]
    NoConverter,

    #[error("Converter produced no output")]
    EmptyOutput,

    #[error("Render task failed: {0}")]
    Task(String),
}

/// A rendered (or passed-through) preview
#[derive(Debug)]
pub struct Thumbnail {
    pub content_type: String,
    pub body: FileBody,
    /// False when the original image was passed through
    pub resized: bool,
}

/// One way of turning an image file into JPEG thumbnail bytes
#[async_trait]
pub trait ThumbnailStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError>;
}

/// Ordered strategy chain with a passthrough fallback
#[derive(Clone)]
pub struct ThumbnailGenerator {
    strategies: Arc<Vec<Box<dyn ThumbnailStrategy>>>,
}

impl ThumbnailGenerator {
    pub fn new(strategies: Vec<Box<dyn ThumbnailStrategy>>) -> Self {
        Self {
            strategies: Arc::new(strategies),
        }
    }

    /// Native rendering first, then the given converter binaries.
    pub fn with_converters(binaries: Vec<String>, timeout: Duration) -> Self {
        Self::new(vec![
            Box::new(NativeRenderer),
            Box::new(ExternalConverter::new(binaries, timeout)),
        ])
    }

    /// Never fails because of a strategy; only an unreadable source on the
    /// passthrough path surfaces as an error.
    pub async fn generate(&self, source: &Path, mime: &str) -> Result<Thumbnail, FileError> {
        for strategy in self.strategies.iter() {
            match strategy.render(source).await {
                Ok(bytes) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        path = %source.display(),
                        bytes = bytes.len(),
                        "Thumbnail rendered"
                    );
                    return Ok(Thumbnail {
                        content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
                        body: FileBody::Buffered(bytes),
                        resized: true,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        path = %source.display(),
                        error = %e,
                        "Thumbnail strategy failed, trying next"
                    );
                }
            }
        }

        tracing::warn!(path = %source.display(), "All thumbnail strategies failed, passing original through");
        Ok(Thumbnail {
            content_type: mime.to_string(),
            body: FileBody::open(source).await?,
            resized: false,
        })
    }
}

/// Largest side maps to 200px, the other scales proportionally (at least 1px).
pub fn thumbnail_dimensions(width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let scaled = |num: u32, den: u32, target: u32| -> u32 {
        ((u64::from(num) * u64::from(target)) / u64::from(den)).max(1) as u32
    };
    if width > height {
        Some((
            THUMBNAIL_MAX_WIDTH,
            scaled(height, width, THUMBNAIL_MAX_WIDTH),
        ))
    } else {
        Some((
            scaled(width, height, THUMBNAIL_MAX_HEIGHT),
            THUMBNAIL_MAX_HEIGHT,
        ))
    }
}

// ============================================================================
// Native renderer
// ============================================================================

/// Decodes JPEG/PNG/GIF/BMP/WEBP in-process and re-encodes as JPEG
pub struct NativeRenderer;

#[async_trait]
impl ThumbnailStrategy for NativeRenderer {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn render(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError> {
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || render_native(&source))
            .await
            .map_err(|e| ThumbnailError::Task(e.to_string()))?
    }
}

fn render_native(source: &Path) -> Result<Vec<u8>, ThumbnailError> {
    let reader = image::io::Reader::open(source)?.with_guessed_format()?;
    let format = match reader.format() {
        Some(
            format @ (ImageFormat::Jpeg
            | ImageFormat::Png
            | ImageFormat::Gif
            | ImageFormat::Bmp
            | ImageFormat::WebP),
        ) => format,
        Some(other) => return Err(ThumbnailError::UnsupportedFormat(format!("{other:?}"))),
        None => return Err(ThumbnailError::UnsupportedFormat("unknown".to_string())),
    };

    let decoded = reader.decode()?;
    let (source_width, source_height) = decoded.dimensions();
    let (width, height) =
        thumbnail_dimensions(source_width, source_height).ok_or(ThumbnailError::EmptyImage)?;

    let resized = image::imageops::resize(&decoded.to_rgba8(), width, height, FilterType::Triangle);

    // PNG and GIF may carry transparency: start from a transparent canvas
    let canvas = if matches!(format, ImageFormat::Png | ImageFormat::Gif) {
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0]));
        image::imageops::overlay(&mut canvas, &resized, 0, 0);
        canvas
    } else {
        resized
    };

    let flattened = flatten_onto_white(&canvas);
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        flattened.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;
    Ok(out)
}

/// JPEG has no alpha channel; blend against white instead of dropping it.
fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let blend = |c: u8| -> u8 {
            ((u16::from(c) * u16::from(a) + 255 * (255 - u16::from(a))) / 255) as u8
        };
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

// ============================================================================
// External converter
// ============================================================================

/// Runs `<binary> SRC -resize 200x200 -quality 80 OUT` for each candidate
/// binary until one exits successfully.
pub struct ExternalConverter {
    binaries: Vec<String>,
    timeout: Duration,
}

impl ExternalConverter {
    pub fn new(binaries: Vec<String>, timeout: Duration) -> Self {
        Self { binaries, timeout }
    }

    async fn run(&self, binary: &str, source: &Path, output: &Path) -> Result<(), ThumbnailError> {
        let status = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(binary)
                .arg(source)
                .arg("-resize")
                .arg(format!("{THUMBNAIL_MAX_WIDTH}x{THUMBNAIL_MAX_HEIGHT}"))
                .arg("-quality")
                .arg(JPEG_QUALITY.to_string())
                .arg(output)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| ThumbnailError::ConverterTimeout {
            binary: binary.to_string(),
            timeout: self.timeout,
        })??;

        if !status.success() {
            return Err(ThumbnailError::ConverterFailed {
                binary: binary.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ThumbnailStrategy for ExternalConverter {
    fn name(&self) -> &'static str {
        "external-converter"
    }

    async fn render(&self, source: &Path) -> Result<Vec<u8>, ThumbnailError> {
        let output = tempfile::Builder::new()
            .prefix("thumb_")
            .suffix(".jpg")
            .tempfile()?
            .into_temp_path();
        let output_path: PathBuf = output.to_path_buf();

        let mut last_error = ThumbnailError::NoConverter;
        for binary in &self.binaries {
            match self.run(binary, source, &output_path).await {
                Ok(()) => {
                    let bytes = tokio::fs::read(&output_path).await?;
                    output.close()?;
                    if bytes.is_empty() {
                        return Err(ThumbnailError::EmptyOutput);
                    }
                    return Ok(bytes);
                }
                Err(e) => {
                    tracing::debug!(binary = %binary, error = %e, "Converter candidate failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait]
    impl ThumbnailStrategy for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn render(&self, _source: &Path) -> Result<Vec<u8>, ThumbnailError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(vec![0xFF, 0xD8, 0xFF])
            } else {
                Err(ThumbnailError::EmptyOutput)
            }
        }
    }

    fn buffered(thumbnail: Thumbnail) -> Vec<u8> {
        match thumbnail.body {
            FileBody::Buffered(bytes) => bytes,
            FileBody::Streamed(_) => panic!("expected buffered thumbnail"),
        }
    }

    fn no_converter() -> ThumbnailGenerator {
        ThumbnailGenerator::with_converters(Vec::new(), Duration::from_secs(1))
    }

    #[test]
    fn test_dimensions_preserve_aspect_ratio() {
        assert_eq!(thumbnail_dimensions(400, 100), Some((200, 50)));
        assert_eq!(thumbnail_dimensions(100, 400), Some((50, 200)));
        assert_eq!(thumbnail_dimensions(300, 300), Some((200, 200)));
        assert_eq!(thumbnail_dimensions(50, 20), Some((200, 80)));
        assert_eq!(thumbnail_dimensions(10_000, 1), Some((200, 1)));
        assert_eq!(thumbnail_dimensions(0, 10), None);
    }

    #[tokio::test]
    async fn test_native_png_with_alpha() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("wide.png");
        RgbaImage::from_pixel(400, 100, Rgba([255, 0, 0, 0]))
            .save(&path)
            .unwrap();

        let thumbnail = no_converter().generate(&path, "image/png").await.unwrap();
        assert!(thumbnail.resized);
        assert_eq!(thumbnail.content_type, "image/jpeg");

        let bytes = buffered(thumbnail);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (200, 50));
        // Fully transparent pixels come out white, not black
        let pixel = decoded.to_rgb8().get_pixel(100, 25).0;
        assert!(pixel.iter().all(|c| *c > 240), "got {pixel:?}");
    }

    #[tokio::test]
    async fn test_native_jpeg_tall() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tall.jpg");
        RgbImage::from_pixel(90, 300, image::Rgb([10, 120, 200]))
            .save(&path)
            .unwrap();

        let thumbnail = no_converter().generate(&path, "image/jpeg").await.unwrap();
        let decoded = image::load_from_memory(&buffered(thumbnail)).unwrap();
        assert_eq!(decoded.dimensions(), (60, 200));
    }

    #[tokio::test]
    async fn test_corrupt_image_passes_through() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.png");
        let garbage = b"\x89PNG\r\n\x1a\nnot really a png".to_vec();
        std::fs::write(&path, &garbage).unwrap();

        let generator = ThumbnailGenerator::with_converters(
            vec!["definitely-not-a-converter".to_string()],
            Duration::from_secs(1),
        );
        let thumbnail = generator.generate(&path, "image/png").await.unwrap();
        assert!(!thumbnail.resized);
        assert_eq!(thumbnail.content_type, "image/png");

        let FileBody::Streamed(mut file) = thumbnail.body else {
            panic!("passthrough should stream the original");
        };
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut file, &mut bytes)
            .await
            .unwrap();
        assert_eq!(bytes, garbage);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_converter_tries_every_candidate() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("a.png");
        std::fs::write(&source, b"x").unwrap();

        let converter = ExternalConverter::new(
            vec!["false".to_string(), "definitely-not-a-converter".to_string()],
            Duration::from_secs(5),
        );
        let err = converter.render(&source).await.unwrap_err();
        assert!(matches!(err, ThumbnailError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("a.png");
        std::fs::write(&source, b"x").unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let generator = ThumbnailGenerator::new(vec![
            Box::new(Counting {
                calls: first.clone(),
                succeed: false,
            }),
            Box::new(Counting {
                calls: second.clone(),
                succeed: true,
            }),
            Box::new(Counting {
                calls: third.clone(),
                succeed: true,
            }),
        ]);

        let thumbnail = generator.generate(&source, "image/png").await.unwrap();
        assert!(thumbnail.resized);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }
}
