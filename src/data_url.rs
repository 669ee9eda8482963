//! Data URLs - self-describing encoded images
//!
//! `data:<mime>;base64,<payload>`, the form permit images are stored and
//! shared in.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("Not a data URL")]
    MissingScheme,

    #[error("Data URL has no payload separator")]
    MissingPayload,

    #[error("Only base64 data URLs are supported")]
    NotBase64,

    #[error("Invalid base64 payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { mime: mime.into(), bytes }
    }

    pub fn parse(text: &str) -> Result<Self, DataUrlError> {
        let (mime, payload) = split(text)?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| DataUrlError::Decode(e.to_string()))?;
        Ok(Self { mime: mime.to_string(), bytes })
    }

    pub fn encode(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// Split into mime type and base64 payload without decoding.
pub fn split(text: &str) -> Result<(&str, &str), DataUrlError> {
    let rest = text.strip_prefix("data:").ok_or(DataUrlError::MissingScheme)?;
    let (header, payload) = rest.split_once(',').ok_or(DataUrlError::MissingPayload)?;
    let mime = header.strip_suffix(";base64").ok_or(DataUrlError::NotBase64)?;
    Ok((mime, payload))
}

/// Cheap prefix check used before handing data to a download sink.
pub fn looks_like_image(text: &str) -> bool {
    text.starts_with("data:image/")
}

/// Decoded size estimated from the base64 payload length.
pub fn approximate_size(payload: &str) -> usize {
    ((payload.len() as f64) * 3.0 / 4.0).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_png_header() {
        let url = DataUrl::new("image/png", vec![0x89, b'P', b'N', b'G']).encode();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
        let parsed = DataUrl::parse(&url).unwrap();
        assert_eq!(parsed.mime, "image/png");
        assert_eq!(parsed.bytes, vec![0x89, b'P', b'N', b'G']);
        assert!(parsed.is_image());
    }

    #[test]
    fn test_rejects_non_data_urls() {
        assert_eq!(DataUrl::parse("https://example.com/a.png"), Err(DataUrlError::MissingScheme));
        assert_eq!(DataUrl::parse("data:image/png;base64"), Err(DataUrlError::MissingPayload));
        assert_eq!(DataUrl::parse("data:text/plain,hello"), Err(DataUrlError::NotBase64));
        assert!(matches!(DataUrl::parse("data:image/png;base64,@@@"), Err(DataUrlError::Decode(_))));
    }

    #[test]
    fn test_empty_canvas_url_is_not_image() {
        assert!(!looks_like_image("data:,"));
        assert!(looks_like_image("data:image/jpeg;base64,AAAA"));
    }

    #[test]
    fn test_approximate_size() {
        assert_eq!(approximate_size("iVBORw=="), 6);
        assert_eq!(approximate_size(""), 0);
    }
}
