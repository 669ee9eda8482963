//! Visitor Records - the durable shape of one application

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw form input as gathered by the application view.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorForm {
    pub applicant_name: String,
    pub department: String,
    pub invitee: String,
    pub license_plate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl VisitorForm {
    pub fn new(
        applicant_name: impl Into<String>,
        department: impl Into<String>,
        invitee: impl Into<String>,
        license_plate: impl Into<String>,
    ) -> Self {
        Self {
            applicant_name: applicant_name.into(),
            department: department.into(),
            invitee: invitee.into(),
            license_plate: license_plate.into(),
            ..Self::default()
        }
    }

    /// Plate input is upper-cased as typed; nothing else is touched.
    pub fn normalized(mut self) -> Self {
        self.license_plate = self.license_plate.to_uppercase();
        self
    }
}

/// One submitted application.
///
/// `id` and `created_at` are fixed at creation. Updates replace the whole
/// record under the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRecord {
    pub id: String,
    pub applicant_name: String,
    pub department: String,
    pub invitee: String,
    pub license_plate: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl VisitorRecord {
    /// Create a record with a fresh identifier.
    pub fn from_form(form: VisitorForm, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            applicant_name: form.applicant_name,
            department: form.department,
            invitee: form.invitee,
            license_plate: form.license_plate,
            created_at,
            phone: form.phone,
            visit_date: form.visit_date,
            visit_time: form.visit_time,
            purpose: form.purpose,
        }
    }

    /// The fields a permit is rendered from.
    pub fn form(&self) -> VisitorForm {
        VisitorForm {
            applicant_name: self.applicant_name.clone(),
            department: self.department.clone(),
            invitee: self.invitee.clone(),
            license_plate: self.license_plate.clone(),
            phone: self.phone.clone(),
            visit_date: self.visit_date.clone(),
            visit_time: self.visit_time.clone(),
            purpose: self.purpose.clone(),
        }
    }

    /// Default file name for a downloaded permit, e.g. `车辆通行证_浙F12345_2025-10-3.png`.
    pub fn permit_filename(&self) -> String {
        let date = self.created_at.with_timezone(&Local).format("%Y-%-m-%-d");
        format!("车辆通行证_{}_{}.png", self.license_plate, date)
    }

    pub(crate) fn matches(&self, lower_query: &str) -> bool {
        [
            &self.applicant_name,
            &self.department,
            &self.invitee,
            &self.license_plate,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(lower_query))
    }
}

/// Counts over the record list relative to a given instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_applications: usize,
    pub today_applications: usize,
    pub this_week_applications: usize,
    pub this_month_applications: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_recent_application: Option<VisitorRecord>,
}

/// Byte usage of the persisted snapshot against the store quota.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageUsage {
    pub used: usize,
    pub total: usize,
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalized_uppercases_plate_only() {
        let form = VisitorForm::new("alice", "ops", "bob", "浙f12a45").normalized();
        assert_eq!(form.license_plate, "浙F12A45");
        assert_eq!(form.applicant_name, "alice");
    }

    #[test]
    fn test_from_form_assigns_unique_ids() {
        let now = Utc::now();
        let a = VisitorRecord::from_form(VisitorForm::new("a", "b", "c", "京A12345"), now);
        let b = VisitorRecord::from_form(VisitorForm::new("a", "b", "c", "京A12345"), now);
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, now);
    }

    #[test]
    fn test_serializes_camel_case() {
        let created = Utc.with_ymd_and_hms(2025, 10, 3, 8, 0, 0).unwrap();
        let record = VisitorRecord::from_form(VisitorForm::new("张三", "技术部", "李四", "浙F12345"), created);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["applicantName"], "张三");
        assert_eq!(value["licensePlate"], "浙F12345");
        assert!(value.get("phone").is_none());
    }

    #[test]
    fn test_permit_filename_contains_plate() {
        let created = Utc.with_ymd_and_hms(2025, 10, 3, 12, 0, 0).unwrap();
        let record = VisitorRecord::from_form(VisitorForm::new("a", "b", "c", "浙F12345"), created);
        let name = record.permit_filename();
        assert!(name.starts_with("车辆通行证_浙F12345_2025-10-"));
        assert!(name.ends_with(".png"));
    }
}
