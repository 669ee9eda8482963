//! Permit Renderer
//!
//! Loads the background template, scales it onto the layout canvas, draws the
//! license plate with its halo and encodes the result as a PNG data URL.
//! Only the plate is drawn; the other applicant fields are carried but not
//! rendered.

use std::io::Cursor;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::data_url::{self, DataUrl};
use crate::glyphs::{PlateFont, TextMask};
use crate::hashing::sha256_hex;
use crate::records::VisitorForm;
use crate::templates::{PermitLayout, TemplateSource, TextStyle};

/// Encoded output shorter than this is treated as an empty canvas.
pub const MIN_DATA_URL_LEN: usize = 1000;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template {0} did not load within {1:?}")]
    TemplateTimeout(String, Duration),

    #[error("Template {0} is unavailable: {1}")]
    TemplateUnavailable(String, String),

    #[error("Template image could not be decoded: {0}")]
    TemplateDecode(String),

    #[error("Template image has zero dimensions")]
    EmptyTemplate,

    #[error("Image encoding failed: {0}")]
    Encode(String),

    #[error("Rendered image is degenerate ({0} bytes of data URL)")]
    DegenerateOutput(usize),

    #[error("Invalid image data: {0}")]
    InvalidData(String),
}

/// Dimensions and size of an encoded image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Decoded byte size estimated from the base64 payload length.
    pub size: usize,
    pub mime: String,
    pub sha256: String,
}

/// Renders permits for one layout and background.
///
/// Holds no mutable state; each render composes onto a fresh canvas.
pub struct PermitRenderer {
    layout: PermitLayout,
    source: Arc<dyn TemplateSource>,
    font: PlateFont,
}

impl PermitRenderer {
    pub fn new(layout: PermitLayout, source: Arc<dyn TemplateSource>, font: PlateFont) -> Self {
        if font.is_builtin() {
            warn!("No plate font configured, using built-in block glyphs");
        }
        Self { layout, source, font }
    }

    pub fn layout(&self) -> &PermitLayout {
        &self.layout
    }

    /// Render the permit as a PNG data URL at full canvas resolution.
    pub fn render(&self, form: &VisitorForm) -> Result<String, RenderError> {
        debug!(plate = %form.license_plate, layout = %self.layout.id, "Rendering permit");
        let canvas = self.compose(form)?;
        let url = encode_png(canvas)?;
        check_output(&url)?;
        debug!(len = url.len(), "Permit rendered");
        Ok(url)
    }

    /// Render the permit scaled by the layout's preview factor, as JPEG.
    pub fn render_preview(&self, form: &VisitorForm) -> Result<String, RenderError> {
        let canvas = self.compose(form)?;
        let scale = self.layout.preview_scale;
        let width = ((canvas.width() as f32 * scale).round() as u32).max(1);
        let height = ((canvas.height() as f32 * scale).round() as u32).max(1);
        let small = imageops::resize(&canvas, width, height, FilterType::Triangle);
        let url = encode_jpeg(small, self.layout.preview_quality)?;
        check_output(&url)?;
        Ok(url)
    }

    /// Background plus plate text on a canvas of the layout's size.
    pub fn compose(&self, form: &VisitorForm) -> Result<RgbaImage, RenderError> {
        let background = self.load_background()?;
        let (width, height) = (self.layout.width(), self.layout.height());

        let mut canvas = if background.dimensions() == (width, height) {
            background.to_rgba8()
        } else {
            imageops::resize(&background.to_rgba8(), width, height, FilterType::Triangle)
        };

        let style = &self.layout.plate_text;
        let cx = width as f32 * style.center_x;
        let cy = height as f32 * style.center_y;
        let mask = self.font.rasterize(&form.license_plate, style.font_size, cx, cy);
        composite_text(&mut canvas, &mask, style);

        Ok(canvas)
    }

    /// Load and decode the template on a worker, bounded by the layout timeout.
    ///
    /// A load that misses the deadline keeps running detached; its result is dropped.
    pub fn load_background(&self) -> Result<DynamicImage, RenderError> {
        let timeout = self.layout.load_timeout();
        let source = Arc::clone(&self.source);
        let name = source.describe();
        let (tx, rx) = mpsc::sync_channel(1);

        thread::spawn(move || {
            let result = source
                .load()
                .map_err(|e| RenderError::TemplateUnavailable(source.describe(), e.to_string()))
                .and_then(|bytes| {
                    image::load_from_memory(&bytes)
                        .map_err(|e| RenderError::TemplateDecode(e.to_string()))
                });
            let _ = tx.send(result);
        });

        let image = match rx.recv_timeout(timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(RenderError::TemplateTimeout(name, timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(RenderError::TemplateUnavailable(name, "loader exited".into()));
            }
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(RenderError::EmptyTemplate);
        }
        debug!(width = image.width(), height = image.height(), "Template loaded");
        Ok(image)
    }
}

/// Report dimensions, mime type and approximate size of a data URL.
pub fn inspect(data_url: &str) -> Result<ImageInfo, RenderError> {
    let (_, payload) =
        data_url::split(data_url).map_err(|e| RenderError::InvalidData(e.to_string()))?;
    let parsed = DataUrl::parse(data_url).map_err(|e| RenderError::InvalidData(e.to_string()))?;

    let (width, height) = ImageReader::new(Cursor::new(&parsed.bytes))
        .with_guessed_format()
        .map_err(|e| RenderError::InvalidData(e.to_string()))?
        .into_dimensions()
        .map_err(|e| RenderError::InvalidData(e.to_string()))?;

    Ok(ImageInfo {
        width,
        height,
        size: data_url::approximate_size(payload),
        mime: parsed.mime,
        sha256: sha256_hex(&parsed.bytes),
    })
}

/// True when the string is an image data URL long enough to hold real content.
pub fn validate_image_data(data_url: &str) -> bool {
    data_url::looks_like_image(data_url) && data_url.len() >= MIN_DATA_URL_LEN
}

fn check_output(url: &str) -> Result<(), RenderError> {
    if validate_image_data(url) {
        Ok(())
    } else {
        Err(RenderError::DegenerateOutput(url.len()))
    }
}

fn encode_png(canvas: RgbaImage) -> Result<String, RenderError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(DataUrl::new("image/png", buf).encode())
}

fn encode_jpeg(canvas: RgbaImage, quality: u8) -> Result<String, RenderError> {
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(DataUrl::new("image/jpeg", buf).encode())
}

/// Halo first, then the text, both source-over.
fn composite_text(canvas: &mut RgbaImage, mask: &TextMask, style: &TextStyle) {
    if mask.is_empty() {
        return;
    }

    let shadow = &style.shadow;
    if shadow.color[3] > 0 {
        let pad = (shadow.blur * 3.0).ceil().max(0.0) as u32;
        let (w, h) = mask.coverage.dimensions();
        let mut layer = GrayImage::new(w + 2 * pad, h + 2 * pad);
        imageops::replace(&mut layer, &mask.coverage, pad as i64, pad as i64);
        let layer = if shadow.blur > 0.0 {
            imageops::blur(&layer, shadow.blur)
        } else {
            layer
        };
        blend_mask(
            canvas,
            &layer,
            mask.left - pad as i64 + shadow.offset[0] as i64,
            mask.top - pad as i64 + shadow.offset[1] as i64,
            shadow.color,
        );
    }

    blend_mask(canvas, &mask.coverage, mask.left, mask.top, style.color);
}

fn blend_mask(canvas: &mut RgbaImage, coverage: &GrayImage, left: i64, top: i64, color: [u8; 4]) {
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    for (x, y, c) in coverage.enumerate_pixels() {
        let value = c.0[0];
        if value == 0 {
            continue;
        }
        let px = left + x as i64;
        let py = top + y as i64;
        if px < 0 || py < 0 || px >= cw || py >= ch {
            continue;
        }
        blend_pixel(canvas.get_pixel_mut(px as u32, py as u32), color, value);
    }
}

fn blend_pixel(dst: &mut Rgba<u8>, color: [u8; 4], coverage: u8) {
    let alpha = (color[3] as f32 / 255.0) * (coverage as f32 / 255.0);
    let inv = 1.0 - alpha;
    for i in 0..3 {
        dst.0[i] = (color[i] as f32 * alpha + dst.0[i] as f32 * inv).round() as u8;
    }
    let dst_alpha = dst.0[3] as f32 / 255.0;
    dst.0[3] = ((alpha + dst_alpha * inv) * 255.0).round() as u8;
}
