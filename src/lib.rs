//! Vehicle Pass Core - visitor permits
//!
//! # Flow
//! 1. A form is validated (required fields, plate pattern)
//! 2. The record is stored in a single JSON snapshot
//! 3. The permit image is rendered on demand and cached by record id
//! 4. Images leave through a download sink or the clipboard

pub mod records;
pub mod validation;
pub mod templates;
pub mod glyphs;
pub mod data_url;
pub mod render;
pub mod share;
pub mod store;
pub mod hashing;
pub mod config;
pub mod pipeline;

pub use records::{VisitorForm, VisitorRecord, Statistics, StorageUsage};
pub use validation::{validate, is_valid_plate, Field, FieldErrors, Validator, ValidationError};
pub use templates::{PermitLayout, AssetResolver, TemplateSource, FileTemplate, MemoryTemplate};
pub use glyphs::PlateFont;
pub use render::{PermitRenderer, RenderError, ImageInfo, inspect};
pub use share::{Clipboard, DownloadSink, ShareError, DownloadError, ShareOutcome};
pub use store::{RecordStore, KeyValueBackend, MemoryBackend, FileBackend, Snapshot, StorageError};
pub use config::AppConfig;
pub use pipeline::{PermitPipeline, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
