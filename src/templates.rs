//! Permit Layout - Enforceable Contract
//!
//! The layout fixes the canvas, where and how the plate is drawn, and how
//! long the background may take to load. The background image itself is a
//! static asset resolved against a deploy-time prefix.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::ENGINE_VERSION;

/// File name of the background template under the asset base.
pub const DEFAULT_TEMPLATE_IMAGE: &str = "车辆通行证_画板 1.jpg";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Failed to read layout: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid layout: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Layout version {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Invalid version: {0}")]
    Version(String),

    #[error("Invalid layout: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermitLayout {
    pub id: String,
    pub name: String,
    pub layout_version: String,
    pub engine_min_version: String,
    /// Canvas width and height; the background is scaled to fit.
    pub canvas_size: [u32; 2],
    #[serde(default)]
    pub plate_text: TextStyle,
    #[serde(default = "default_preview_scale")]
    pub preview_scale: f32,
    #[serde(default = "default_preview_quality")]
    pub preview_quality: u8,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

fn default_preview_scale() -> f32 { 0.5 }
fn default_preview_quality() -> u8 { 80 }
fn default_load_timeout_ms() -> u64 { 10_000 }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    /// Pixel height of the em box.
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_text_color")]
    pub color: [u8; 4],
    /// Horizontal centre as a fraction of canvas width.
    #[serde(default = "default_center_x")]
    pub center_x: f32,
    /// Vertical centre as a fraction of canvas height.
    #[serde(default = "default_center_y")]
    pub center_y: f32,
    #[serde(default)]
    pub shadow: ShadowStyle,
}

fn default_font_size() -> f32 { 105.0 }
fn default_text_color() -> [u8; 4] { [0, 0, 0, 255] }
fn default_center_x() -> f32 { 0.5 }
fn default_center_y() -> f32 { 0.47 }

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: default_font_size(),
            color: default_text_color(),
            center_x: default_center_x(),
            center_y: default_center_y(),
            shadow: ShadowStyle::default(),
        }
    }
}

/// Light halo drawn under the text so it reads on any background.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShadowStyle {
    #[serde(default = "default_shadow_color")]
    pub color: [u8; 4],
    #[serde(default = "default_shadow_blur")]
    pub blur: f32,
    #[serde(default = "default_shadow_offset")]
    pub offset: [i32; 2],
}

fn default_shadow_color() -> [u8; 4] { [255, 255, 255, 204] }
fn default_shadow_blur() -> f32 { 2.0 }
fn default_shadow_offset() -> [i32; 2] { [1, 1] }

impl Default for ShadowStyle {
    fn default() -> Self {
        Self {
            color: default_shadow_color(),
            blur: default_shadow_blur(),
            offset: default_shadow_offset(),
        }
    }
}

impl Default for PermitLayout {
    fn default() -> Self {
        Self {
            id: "changan-chrysanthemum-2025".to_string(),
            name: "2025长安菊展车辆通行证".to_string(),
            layout_version: "1.0.0".to_string(),
            engine_min_version: "1.0.0".to_string(),
            canvas_size: [800, 1200],
            plate_text: TextStyle::default(),
            preview_scale: default_preview_scale(),
            preview_quality: default_preview_quality(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl PermitLayout {
    pub fn load_from_file(path: &Path) -> Result<Self, LayoutError> {
        let content = fs::read_to_string(path)?;
        let layout: PermitLayout = serde_json::from_str(&content)?;
        layout.check()?;
        Ok(layout)
    }

    pub fn width(&self) -> u32 {
        self.canvas_size[0]
    }

    pub fn height(&self) -> u32 {
        self.canvas_size[1]
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Rejects layouts this engine cannot honour.
    pub fn check(&self) -> Result<(), LayoutError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|e| LayoutError::Version(e.to_string()))?;
        let min_ver = semver::Version::parse(&self.engine_min_version)
            .map_err(|e| LayoutError::Version(e.to_string()))?;

        if engine_ver < min_ver {
            return Err(LayoutError::EngineVersionMismatch(
                self.layout_version.clone(),
                self.engine_min_version.clone(),
                ENGINE_VERSION.to_string(),
            ));
        }
        if self.width() == 0 || self.height() == 0 {
            return Err(LayoutError::Invalid("canvas size must be non-zero".into()));
        }
        if !(self.preview_scale > 0.0 && self.preview_scale <= 1.0) {
            return Err(LayoutError::Invalid("preview scale must be in (0, 1]".into()));
        }
        if self.plate_text.font_size <= 0.0 {
            return Err(LayoutError::Invalid("font size must be positive".into()));
        }
        Ok(())
    }
}

/// Resolves static asset names against a deploy-time prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResolver {
    base: PathBuf,
}

impl AssetResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        self.base.join(name)
    }

    pub fn template(&self, name: &str) -> FileTemplate {
        FileTemplate::new(self.resolve(name))
    }
}

/// Where background template bytes come from.
pub trait TemplateSource: Send + Sync {
    fn describe(&self) -> String;
    fn load(&self) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct FileTemplate {
    path: PathBuf,
}

impl FileTemplate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemplateSource for FileTemplate {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

/// Template bytes already in memory.
#[derive(Debug, Clone)]
pub struct MemoryTemplate {
    bytes: Arc<[u8]>,
}

impl MemoryTemplate {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl TemplateSource for MemoryTemplate {
    fn describe(&self) -> String {
        format!("<memory: {} bytes>", self.bytes.len())
    }

    fn load(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_matches_permit_canvas() {
        let layout = PermitLayout::default();
        assert_eq!(layout.canvas_size, [800, 1200]);
        assert_eq!(layout.plate_text.font_size, 105.0);
        assert_eq!(layout.load_timeout(), Duration::from_secs(10));
        assert!(layout.check().is_ok());
    }

    #[test]
    fn test_layout_json_fills_defaults() {
        let json = r#"{
            "id": "custom",
            "name": "Custom",
            "layoutVersion": "1.1.0",
            "engineMinVersion": "1.0.0",
            "canvasSize": [400, 600]
        }"#;
        let layout: PermitLayout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.height(), 600);
        assert_eq!(layout.plate_text.center_y, 0.47);
        assert_eq!(layout.plate_text.shadow.offset, [1, 1]);
        assert_eq!(layout.preview_scale, 0.5);
    }

    #[test]
    fn test_future_engine_requirement_rejected() {
        let layout = PermitLayout {
            engine_min_version: "99.0.0".to_string(),
            ..PermitLayout::default()
        };
        assert!(matches!(layout.check(), Err(LayoutError::EngineVersionMismatch(..))));
    }

    #[test]
    fn test_zero_canvas_rejected() {
        let layout = PermitLayout { canvas_size: [0, 1200], ..PermitLayout::default() };
        assert!(matches!(layout.check(), Err(LayoutError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        fs::write(&path, serde_json::to_string(&PermitLayout::default()).unwrap()).unwrap();
        let layout = PermitLayout::load_from_file(&path).unwrap();
        assert_eq!(layout, PermitLayout::default());
    }

    #[test]
    fn test_resolver_joins_prefix() {
        let resolver = AssetResolver::new("/srv/vehicle-pass-generator");
        assert_eq!(
            resolver.resolve(DEFAULT_TEMPLATE_IMAGE),
            PathBuf::from("/srv/vehicle-pass-generator/车辆通行证_画板 1.jpg")
        );
    }

    #[test]
    fn test_memory_template_loads_bytes() {
        let source = MemoryTemplate::new(vec![1u8, 2, 3]);
        assert_eq!(source.load().unwrap(), vec![1, 2, 3]);
    }
}
