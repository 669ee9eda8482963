//! Record Store - one JSON snapshot under one key
//!
//! Every mutation is a read-modify-write of the whole snapshot. Reads that
//! fail are logged and come back empty; `upsert`, `delete` and
//! `import_snapshot` return their errors so the caller can retry.
//!
//! Writers are not coordinated. Two processes sharing a backend race and the
//! last write wins. [`RecordStore::upsert_if_revision`] is the opt-in guarded
//! write for callers that need to detect that.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::hashing::snapshot_revision;
use crate::records::{Statistics, StorageUsage, VisitorRecord};
use crate::validation::ValidationError;

/// Key the snapshot lives under.
pub const STORAGE_KEY: &str = "vehicle_permit_applications";

/// Byte budget of a browser-local store.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

const PROBE_KEY: &str = "__storage_test__";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Storage quota exceeded: {size} bytes (max {quota})")]
    QuotaExceeded { size: usize, quota: usize },

    #[error("Stored snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Snapshot changed: expected revision {expected}, found {actual}")]
    Conflict { expected: String, actual: String },
}

/// String key-value persistence with a byte budget.
pub trait KeyValueBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
    fn quota(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    entries: HashMap<String, String>,
    quota: usize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota: usize) -> Self {
        Self { entries: HashMap::new(), quota }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let others: usize = self
            .entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let size = key.len() + value.len();
        if others + size > self.quota {
            return Err(StorageError::QuotaExceeded { size, quota: self.quota });
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn quota(&self) -> usize {
        self.quota
    }
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    quota: usize,
}

impl FileBackend {
    pub fn open(dir: impl Into<PathBuf>, quota: usize) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), quota, "Opened file store");
        Ok(Self { dir, quota })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn used_by_others(&self, key: &str) -> Result<usize, StorageError> {
        let own = self.path_for(key);
        let mut used = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path == own || path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let key_len = path.file_stem().map_or(0, |k| k.len());
            used += key_len + fs::metadata(&path)?.len() as usize;
        }
        Ok(used)
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let size = key.len() + value.len();
        if self.used_by_others(key)? + size > self.quota {
            return Err(StorageError::QuotaExceeded { size, quota: self.quota });
        }
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn quota(&self) -> usize {
        self.quota
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything the store holds, written as one blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    #[serde(default)]
    pub applications: Vec<VisitorRecord>,
    /// Record id to image data URL.
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

impl Snapshot {
    fn sort(&mut self) {
        self.applications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

/// Lenient shape used to check imports field by field.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    applications: Option<Vec<RawRecord>>,
    #[serde(default)]
    images: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    id: Option<String>,
    applicant_name: Option<String>,
    department: Option<String>,
    invitee: Option<String>,
    license_plate: Option<String>,
    created_at: Option<String>,
    phone: Option<String>,
    visit_date: Option<String>,
    visit_time: Option<String>,
    purpose: Option<String>,
}

fn required(value: Option<String>, index: usize, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField { index, field }),
    }
}

impl RawRecord {
    fn into_record(self, index: usize) -> Result<VisitorRecord, ValidationError> {
        let id = required(self.id, index, "id")?;
        let applicant_name = required(self.applicant_name, index, "applicantName")?;
        let license_plate = required(self.license_plate, index, "licensePlate")?;
        let created_raw = required(self.created_at, index, "createdAt")?;
        let created_at = DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| ValidationError::InvalidTimestamp { index, value: created_raw.clone() })?;

        Ok(VisitorRecord {
            id,
            applicant_name,
            department: self.department.unwrap_or_default(),
            invitee: self.invitee.unwrap_or_default(),
            license_plate,
            created_at,
            phone: self.phone,
            visit_date: self.visit_date,
            visit_time: self.visit_time,
            purpose: self.purpose,
        })
    }
}

fn parse_import(text: &str) -> Result<Snapshot, ValidationError> {
    let raw: RawSnapshot = serde_json::from_str(text)
        .map_err(|e| ValidationError::MalformedSnapshot(e.to_string()))?;
    let records = raw
        .applications
        .ok_or_else(|| ValidationError::MalformedSnapshot("missing applications array".into()))?;

    let mut seen = HashSet::new();
    let mut applications = Vec::with_capacity(records.len());
    for (index, raw) in records.into_iter().enumerate() {
        let record = raw.into_record(index)?;
        if !seen.insert(record.id.clone()) {
            return Err(ValidationError::DuplicateId { index, id: record.id });
        }
        applications.push(record);
    }

    let mut snapshot = Snapshot {
        applications,
        images: raw.images.unwrap_or_default(),
    };
    snapshot.sort();
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct RecordStore<B: KeyValueBackend> {
    backend: B,
}

impl RecordStore<MemoryBackend> {
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }
}

impl<B: KeyValueBackend> RecordStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn read_raw(&self) -> Result<Option<String>, StorageError> {
        self.backend.get(STORAGE_KEY)
    }

    fn parse(raw: Option<&str>) -> Result<Snapshot, StorageError> {
        match raw {
            None => Ok(Snapshot::default()),
            Some(text) => {
                serde_json::from_str(text).map_err(|e| StorageError::Corrupt(e.to_string()))
            }
        }
    }

    /// The whole snapshot; errors on an unreadable or corrupt blob.
    pub fn load(&self) -> Result<Snapshot, StorageError> {
        Self::parse(self.read_raw()?.as_deref())
    }

    fn persist(&mut self, snapshot: &Snapshot) -> Result<(), StorageError> {
        let text = serde_json::to_string(snapshot)?;
        self.backend.set(STORAGE_KEY, &text)
    }

    fn load_or_empty(&self, what: &str) -> Snapshot {
        self.load().unwrap_or_else(|e| {
            error!(error = %e, "Failed to read {what}");
            Snapshot::default()
        })
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<VisitorRecord> {
        let mut snapshot = self.load_or_empty("applications");
        snapshot.sort();
        snapshot.applications
    }

    pub fn get(&self, id: &str) -> Option<VisitorRecord> {
        self.load_or_empty("application")
            .applications
            .into_iter()
            .find(|r| r.id == id)
    }

    /// Insert or replace by id, keeping newest-first order.
    pub fn upsert(&mut self, record: VisitorRecord) -> Result<(), StorageError> {
        let mut snapshot = self.load()?;
        Self::apply_upsert(&mut snapshot, record);
        self.persist(&snapshot)
    }

    /// `upsert` that fails with `Conflict` if the blob changed since `expected`.
    /// Returns the new revision.
    pub fn upsert_if_revision(
        &mut self,
        record: VisitorRecord,
        expected: &str,
    ) -> Result<String, StorageError> {
        let raw = self.read_raw()?;
        let actual = snapshot_revision(raw.as_deref());
        if actual != expected {
            warn!(%expected, %actual, "Snapshot changed underneath guarded write");
            return Err(StorageError::Conflict { expected: expected.to_string(), actual });
        }
        let mut snapshot = Self::parse(raw.as_deref())?;
        Self::apply_upsert(&mut snapshot, record);
        self.persist(&snapshot)?;
        self.revision()
    }

    fn apply_upsert(snapshot: &mut Snapshot, record: VisitorRecord) {
        match snapshot.applications.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => snapshot.applications.push(record),
        }
        snapshot.sort();
    }

    /// Remove a record and its image. Returns whether the record existed.
    pub fn delete(&mut self, id: &str) -> Result<bool, StorageError> {
        let mut snapshot = self.load()?;
        let before = snapshot.applications.len();
        snapshot.applications.retain(|r| r.id != id);
        let removed = snapshot.applications.len() != before;
        snapshot.images.remove(id);
        self.persist(&snapshot)?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> bool {
        match self.persist(&Snapshot::default()) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to clear store");
                false
            }
        }
    }

    pub fn get_image(&self, id: &str) -> Option<String> {
        self.load_or_empty("image").images.remove(id)
    }

    pub fn images(&self) -> BTreeMap<String, String> {
        self.load_or_empty("images").images
    }

    pub fn put_image(&mut self, id: &str, data_url: &str) -> bool {
        let result = self.load().and_then(|mut snapshot| {
            snapshot.images.insert(id.to_string(), data_url.to_string());
            self.persist(&snapshot)
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, id, "Failed to save image");
                false
            }
        }
    }

    pub fn stats(&self) -> Statistics {
        self.stats_at(&Local::now())
    }

    /// Counts since local midnight, the last 7x24 hours and the first of the month.
    pub fn stats_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Statistics {
        let records = self.list();
        let today = local_midnight(now, now.date_naive());
        let month = local_midnight(now, now.date_naive().with_day(1).unwrap_or(now.date_naive()));
        let week = now.with_timezone(&Utc) - Duration::days(7);

        let since = |start: DateTime<Utc>| records.iter().filter(|r| r.created_at >= start).count();

        Statistics {
            total_applications: records.len(),
            today_applications: since(today),
            this_week_applications: since(week),
            this_month_applications: since(month),
            most_recent_application: records.first().cloned(),
        }
    }

    /// Case-insensitive substring match on name, department, invitee and plate.
    pub fn search(&self, query: &str) -> Vec<VisitorRecord> {
        let needle = query.trim().to_lowercase();
        let records = self.list();
        if needle.is_empty() {
            return records;
        }
        records.into_iter().filter(|r| r.matches(&needle)).collect()
    }

    pub fn export_snapshot(&self) -> String {
        let snapshot = self.load_or_empty("snapshot for export");
        serde_json::to_string_pretty(&snapshot).unwrap_or_else(|e| {
            error!(error = %e, "Failed to export snapshot");
            "{}".to_string()
        })
    }

    /// Replace the store with `text`. Nothing is written unless every record checks out.
    pub fn import_snapshot(&mut self, text: &str) -> Result<usize, StorageError> {
        let snapshot = parse_import(text)?;
        self.persist(&snapshot)?;
        debug!(records = snapshot.applications.len(), "Imported snapshot");
        Ok(snapshot.applications.len())
    }

    /// SHA-256 of the persisted blob.
    pub fn revision(&self) -> Result<String, StorageError> {
        Ok(snapshot_revision(self.read_raw()?.as_deref()))
    }

    pub fn storage_usage(&self) -> StorageUsage {
        let total = self.backend.quota();
        let used = match self.read_raw() {
            Ok(raw) => raw.map_or(0, |text| text.len()),
            Err(e) => {
                error!(error = %e, "Failed to read storage usage");
                return StorageUsage::default();
            }
        };
        let percentage = if total == 0 { 0.0 } else { used as f64 / total as f64 * 100.0 };
        StorageUsage { used, total, percentage }
    }

    /// Probe the backend with a throwaway key.
    pub fn is_available(&mut self) -> bool {
        let result = self
            .backend
            .set(PROBE_KEY, "test")
            .and_then(|()| self.backend.remove(PROBE_KEY));
        if let Err(e) = &result {
            error!(error = %e, "Storage unavailable");
        }
        result.is_ok()
    }

    pub fn cleanup_expired(&mut self, days_to_keep: i64) -> usize {
        self.cleanup_expired_at(Utc::now(), days_to_keep)
    }

    /// Drop records older than the cut-off, with their images. Returns how many went.
    pub fn cleanup_expired_at(&mut self, now: DateTime<Utc>, days_to_keep: i64) -> usize {
        let cutoff = match Duration::try_days(days_to_keep)
            .filter(|_| days_to_keep >= 0)
            .and_then(|keep| now.checked_sub_signed(keep))
        {
            Some(cutoff) => cutoff,
            None => {
                warn!(days_to_keep, "Retention period out of range, nothing removed");
                return 0;
            }
        };
        let mut snapshot = match self.load() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to read snapshot for cleanup");
                return 0;
            }
        };

        let before = snapshot.applications.len();
        snapshot.applications.retain(|r| r.created_at >= cutoff);
        let removed = before - snapshot.applications.len();
        if removed == 0 {
            return 0;
        }

        let Snapshot { applications, images } = &mut snapshot;
        images.retain(|id, _| applications.iter().any(|r| &r.id == id));

        match self.persist(&snapshot) {
            Ok(()) => removed,
            Err(e) => {
                error!(error = %e, "Failed to persist cleanup");
                0
            }
        }
    }
}

/// Midnight of `date` in `now`'s zone, as UTC.
fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>, date: chrono::NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    now.timezone()
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
