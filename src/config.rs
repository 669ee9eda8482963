//! Configuration loaded from environment variables.
//!
//! All settings have defaults so the CLI runs with zero configuration from a
//! checkout that has the template under `public/`.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::store::DEFAULT_QUOTA_BYTES;
use crate::templates::DEFAULT_TEMPLATE_IMAGE;

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Directory holding the file-backed store.
    /// Env: `VEHICLEPASS_DATA_DIR`
    /// Default: platform data dir, else `./data`
    pub data_dir: PathBuf,

    /// Deploy-time prefix for static assets.
    /// Env: `VEHICLEPASS_ASSET_BASE`
    /// Default: `public`
    pub asset_base: PathBuf,

    /// Background template file name under `asset_base`.
    /// Env: `VEHICLEPASS_TEMPLATE_IMAGE`
    pub template_image: String,

    /// Optional layout JSON overriding the built-in layout.
    /// Env: `VEHICLEPASS_LAYOUT`
    pub layout_path: Option<PathBuf>,

    /// Optional TTF/OTF used for the plate text.
    /// Env: `VEHICLEPASS_FONT`
    pub font_path: Option<PathBuf>,

    /// Store byte budget.
    /// Env: `VEHICLEPASS_QUOTA_BYTES`
    /// Default: 5 MiB
    pub quota_bytes: usize,

    /// Origin share links are built on.
    /// Env: `VEHICLEPASS_SHARE_BASE_URL`
    pub share_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            asset_base: PathBuf::from("public"),
            template_image: DEFAULT_TEMPLATE_IMAGE.to_string(),
            layout_path: None,
            font_path: None,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            share_base_url: "http://localhost:5173".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("org", "changan", "vehiclepass")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("VEHICLEPASS_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(base) = lookup("VEHICLEPASS_ASSET_BASE") {
            config.asset_base = PathBuf::from(base);
        }

        if let Some(name) = lookup("VEHICLEPASS_TEMPLATE_IMAGE") {
            if !name.is_empty() {
                config.template_image = name;
            }
        }

        if let Some(path) = lookup("VEHICLEPASS_LAYOUT").filter(|p| !p.is_empty()) {
            config.layout_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("VEHICLEPASS_FONT").filter(|p| !p.is_empty()) {
            config.font_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("VEHICLEPASS_QUOTA_BYTES") {
            match val.parse::<usize>() {
                Ok(n) => config.quota_bytes = n,
                Err(_) => tracing::warn!(value = %val, "Invalid VEHICLEPASS_QUOTA_BYTES, using default"),
            }
        }

        if let Some(url) = lookup("VEHICLEPASS_SHARE_BASE_URL") {
            config.share_base_url = url;
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn template_path(&self) -> PathBuf {
        self.asset_base.join(&self.template_image)
    }
}
