//! Share and download integration.
//!
//! The clipboard and the file-save mechanism belong to the host. The core
//! talks to them through [`Clipboard`] and [`DownloadSink`] and falls back to
//! text when the clipboard cannot hold an image.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data_url::{self, DataUrl};

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Clipboard does not support images")]
    ImageUnsupported,

    #[error("Invalid image data: {0}")]
    InvalidData(String),

    #[error("Clipboard write failed: {0}")]
    Clipboard(String),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid image data")]
    NotAnImage,

    #[error("Failed to save {0}: {1}")]
    Io(String, #[source] io::Error),
}

/// Binary form of an image data URL, ready for the clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// How a share request ended up on the clipboard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShareOutcome {
    Image,
    Text,
}

pub trait Clipboard {
    fn supports_images(&self) -> bool;
    fn write_image(&mut self, blob: &ImageBlob) -> Result<(), ShareError>;
    fn write_text(&mut self, text: &str) -> Result<(), ShareError>;
}

pub trait DownloadSink {
    fn save(&mut self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

pub fn to_blob_bytes(data_url: &str) -> Result<ImageBlob, ShareError> {
    let parsed = DataUrl::parse(data_url).map_err(|e| ShareError::InvalidData(e.to_string()))?;
    if !parsed.is_image() {
        return Err(ShareError::InvalidData(format!("not an image: {}", parsed.mime)));
    }
    Ok(ImageBlob { mime: parsed.mime, bytes: parsed.bytes })
}

/// Put the image on the clipboard, or its data URL as text when images are unsupported.
pub fn share_bytes(clipboard: &mut dyn Clipboard, data_url: &str) -> Result<ShareOutcome, ShareError> {
    let blob = to_blob_bytes(data_url)?;

    if clipboard.supports_images() {
        match clipboard.write_image(&blob) {
            Ok(()) => {
                debug!(mime = %blob.mime, bytes = blob.bytes.len(), "Image copied to clipboard");
                return Ok(ShareOutcome::Image);
            }
            Err(e) => warn!(error = %e, "Clipboard image write failed, falling back to text"),
        }
    } else {
        warn!("Clipboard has no image support, copying data URL as text");
    }

    clipboard.write_text(data_url)?;
    Ok(ShareOutcome::Text)
}

/// Hand the decoded image to the sink under `filename`.
pub fn trigger_download(
    sink: &mut dyn DownloadSink,
    data_url: &str,
    filename: &str,
) -> Result<PathBuf, DownloadError> {
    if !data_url::looks_like_image(data_url) {
        return Err(DownloadError::NotAnImage);
    }
    let parsed = DataUrl::parse(data_url).map_err(|_| DownloadError::NotAnImage)?;
    let path = sink
        .save(filename, &parsed.bytes)
        .map_err(|e| DownloadError::Io(filename.to_string(), e))?;
    debug!(path = %path.display(), bytes = parsed.bytes.len(), "Download saved");
    Ok(path)
}

/// Link to the shared view of a record.
pub fn share_link(base_url: &str, id: &str) -> String {
    format!("{}/share?id={}", base_url.trim_end_matches('/'), id)
}

/// Link to the result view of a record.
pub fn result_link(base_url: &str, id: &str) -> String {
    format!("{}/result/{}", base_url.trim_end_matches('/'), id)
}

/// Saves downloads into a directory, replacing files atomically.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    fn save(&mut self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty file name"))?;
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.part", name.to_string_lossy()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// Text-only clipboard that keeps the last value written.
#[derive(Debug, Clone, Default)]
pub struct TextClipboard {
    pub contents: Option<String>,
}

impl Clipboard for TextClipboard {
    fn supports_images(&self) -> bool {
        false
    }

    fn write_image(&mut self, _blob: &ImageBlob) -> Result<(), ShareError> {
        Err(ShareError::ImageUnsupported)
    }

    fn write_text(&mut self, text: &str) -> Result<(), ShareError> {
        self.contents = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_URL: &str = "data:image/png;base64,iVBORw0KGgo=";

    #[derive(Default)]
    struct ImageClipboard {
        image: Option<ImageBlob>,
        text: Option<String>,
    }

    impl Clipboard for ImageClipboard {
        fn supports_images(&self) -> bool {
            true
        }

        fn write_image(&mut self, blob: &ImageBlob) -> Result<(), ShareError> {
            self.image = Some(blob.clone());
            Ok(())
        }

        fn write_text(&mut self, text: &str) -> Result<(), ShareError> {
            self.text = Some(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_share_prefers_image() {
        let mut clipboard = ImageClipboard::default();
        let outcome = share_bytes(&mut clipboard, PNG_URL).unwrap();
        assert_eq!(outcome, ShareOutcome::Image);
        assert_eq!(clipboard.image.unwrap().bytes[..4], [0x89, b'P', b'N', b'G']);
        assert!(clipboard.text.is_none());
    }

    #[test]
    fn test_share_falls_back_to_text() {
        let mut clipboard = TextClipboard::default();
        let outcome = share_bytes(&mut clipboard, PNG_URL).unwrap();
        assert_eq!(outcome, ShareOutcome::Text);
        assert_eq!(clipboard.contents.as_deref(), Some(PNG_URL));
    }

    #[test]
    fn test_blob_rejects_non_image() {
        assert!(matches!(to_blob_bytes("data:text/plain;base64,aGk="), Err(ShareError::InvalidData(_))));
    }

    #[test]
    fn test_download_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        let err = trigger_download(&mut sink, "data:,", "a.png").unwrap_err();
        assert!(matches!(err, DownloadError::NotAnImage));
    }

    #[test]
    fn test_download_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        let path = trigger_download(&mut sink, PNG_URL, "车辆通行证_浙F12345.png").unwrap();
        assert_eq!(path, dir.path().join("车辆通行证_浙F12345.png"));
        assert_eq!(fs::read(path).unwrap()[..4], [0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn test_download_strips_directories_from_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path());
        let path = trigger_download(&mut sink, PNG_URL, "../escape.png").unwrap();
        assert_eq!(path, dir.path().join("escape.png"));
    }

    #[test]
    fn test_links() {
        assert_eq!(share_link("https://x.test/", "abc"), "https://x.test/share?id=abc");
        assert_eq!(result_link("https://x.test", "abc"), "https://x.test/result/abc");
    }
}
