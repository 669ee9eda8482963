//! Permit Pipeline - Single Entry Point
//!
//! Owns the validator, the record store and the renderer. `submit` always
//! validates; there is no path into the store that skips it.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::records::{VisitorForm, VisitorRecord};
use crate::render::{PermitRenderer, RenderError};
use crate::share::{self, Clipboard, DownloadError, DownloadSink, ShareError, ShareOutcome};
use crate::store::{KeyValueBackend, RecordStore, StorageError};
use crate::validation::{FieldErrors, Validator};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {}", summarize(.0))]
    Invalid(FieldErrors),

    #[error("Application not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Share(#[from] ShareError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

fn summarize(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, message)| format!("{field}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct PermitPipeline<B: KeyValueBackend> {
    validator: Validator,
    store: RecordStore<B>,
    renderer: PermitRenderer,
}

impl<B: KeyValueBackend> PermitPipeline<B> {
    pub fn new(store: RecordStore<B>, renderer: PermitRenderer) -> Self {
        Self {
            validator: Validator::new(),
            store,
            renderer,
        }
    }

    pub fn store(&self) -> &RecordStore<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore<B> {
        &mut self.store
    }

    pub fn renderer(&self) -> &PermitRenderer {
        &self.renderer
    }

    pub fn validate(&self, form: &VisitorForm) -> FieldErrors {
        self.validator.validate(form)
    }

    /// Validate the form and store it as a new record.
    pub fn submit(&mut self, form: VisitorForm) -> Result<VisitorRecord, PipelineError> {
        self.submit_at(form, Utc::now())
    }

    pub fn submit_at(
        &mut self,
        form: VisitorForm,
        now: DateTime<Utc>,
    ) -> Result<VisitorRecord, PipelineError> {
        let form = form.normalized();

        // MANDATORY: nothing reaches the store unvalidated.
        let errors = self.validator.validate(&form);
        if !errors.is_empty() {
            return Err(PipelineError::Invalid(errors));
        }

        let record = VisitorRecord::from_form(form, now);
        self.store.upsert(record.clone())?;
        info!(id = %record.id, plate = %record.license_plate, "Application submitted");
        Ok(record)
    }

    pub fn record(&self, id: &str) -> Result<VisitorRecord, PipelineError> {
        self.store
            .get(id)
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    /// The cached permit for `id`, rendering and caching it on first use.
    pub fn permit_image(&mut self, id: &str) -> Result<String, PipelineError> {
        let record = self.record(id)?;
        if let Some(cached) = self.store.get_image(id) {
            return Ok(cached);
        }

        let image = self.renderer.render(&record.form())?;
        if !self.store.put_image(id, &image) {
            warn!(id, "Permit rendered but could not be cached");
        }
        Ok(image)
    }

    /// Render afresh and overwrite the cached permit.
    pub fn regenerate(&mut self, id: &str) -> Result<String, PipelineError> {
        let record = self.record(id)?;
        let image = self.renderer.render(&record.form())?;
        if !self.store.put_image(id, &image) {
            warn!(id, "Permit rendered but could not be cached");
        }
        Ok(image)
    }

    pub fn preview(&self, id: &str) -> Result<String, PipelineError> {
        let record = self.record(id)?;
        Ok(self.renderer.render_preview(&record.form())?)
    }

    /// Save the permit through `sink`, under the record's default name unless one is given.
    pub fn download(
        &mut self,
        id: &str,
        sink: &mut dyn DownloadSink,
        filename: Option<&str>,
    ) -> Result<PathBuf, PipelineError> {
        let record = self.record(id)?;
        let image = self.permit_image(id)?;
        let name = filename
            .map(str::to_string)
            .unwrap_or_else(|| record.permit_filename());
        Ok(share::trigger_download(sink, &image, &name)?)
    }

    /// Copy the permit to the clipboard, falling back to its share link as text.
    pub fn share(
        &mut self,
        id: &str,
        clipboard: &mut dyn Clipboard,
        base_url: &str,
    ) -> Result<ShareOutcome, PipelineError> {
        let image = self.permit_image(id)?;
        match share::share_bytes(clipboard, &image) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, id, "Sharing image failed, copying link instead");
                clipboard.write_text(&share::share_link(base_url, id))?;
                Ok(ShareOutcome::Text)
            }
        }
    }

    pub fn delete(&mut self, id: &str) -> Result<(), PipelineError> {
        if !self.store.delete(id)? {
            return Err(PipelineError::NotFound(id.to_string()));
        }
        info!(id, "Application deleted");
        Ok(())
    }
}
