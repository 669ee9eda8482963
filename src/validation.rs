//! Validation System - Field Rules
//!
//! Rules produce structured violations.
//! The validator folds them into one error per field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::VisitorForm;

/// Region prefixes accepted as the first plate character, besides `A-Z`.
pub const REGION_PREFIXES: &str = "京津沪渝冀豫云辽黑湘皖鲁新苏浙赣鄂桂甘晋蒙陕吉闽贵粤青藏川宁琼使领";

/// Special characters accepted as the last plate character, besides `A-Z0-9`.
pub const PLATE_SUFFIXES: &str = "挂学警港澳";

pub const PLATE_LENGTH: usize = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    ApplicantName,
    Department,
    Invitee,
    LicensePlate,
}

impl Field {
    pub const REQUIRED: [Field; 4] = [
        Field::ApplicantName,
        Field::Department,
        Field::Invitee,
        Field::LicensePlate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::ApplicantName => "applicantName",
            Field::Department => "department",
            Field::Invitee => "invitee",
            Field::LicensePlate => "licensePlate",
        }
    }

    fn value<'a>(&self, form: &'a VisitorForm) -> &'a str {
        match self {
            Field::ApplicantName => &form.applicant_name,
            Field::Department => &form.department,
            Field::Invitee => &form.invitee,
            Field::LicensePlate => &form.license_plate,
        }
    }

    fn missing_message(&self) -> &'static str {
        match self {
            Field::ApplicantName => "请输入申请人姓名",
            Field::Department => "请输入申请部门",
            Field::Invitee => "请输入邀请人员",
            Field::LicensePlate => "请输入车牌号",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field name to message, one entry per failing field. Empty means valid.
pub type FieldErrors = BTreeMap<Field, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub rule: String,
    pub field: Field,
    pub message: String,
}

/// Field rule trait - produces violations
pub trait FieldRule {
    fn name(&self) -> &'static str;
    fn check(&self, form: &VisitorForm) -> Vec<FieldViolation>;
}

/// Errors raised when persisted or imported data fails its shape checks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid snapshot format: {0}")]
    MalformedSnapshot(String),

    #[error("Record {index} is missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Record {index} has an unparseable timestamp: {value}")]
    InvalidTimestamp { index: usize, value: String },

    #[error("Record {index} repeats id '{id}'")]
    DuplicateId { index: usize, id: String },
}

// --- Concrete Rules ---

pub struct RequiredFieldsRule;

impl FieldRule for RequiredFieldsRule {
    fn name(&self) -> &'static str { "required" }

    fn check(&self, form: &VisitorForm) -> Vec<FieldViolation> {
        Field::REQUIRED
            .iter()
            .filter(|field| field.value(form).trim().is_empty())
            .map(|field| FieldViolation {
                rule: self.name().to_string(),
                field: *field,
                message: field.missing_message().to_string(),
            })
            .collect()
    }
}

pub struct PlatePatternRule;

impl FieldRule for PlatePatternRule {
    fn name(&self) -> &'static str { "plate_pattern" }

    fn check(&self, form: &VisitorForm) -> Vec<FieldViolation> {
        let plate = &form.license_plate;
        // An empty plate is reported by the required rule.
        if plate.trim().is_empty() || is_valid_plate(plate) {
            return vec![];
        }
        vec![FieldViolation {
            rule: self.name().to_string(),
            field: Field::LicensePlate,
            message: "请输入正确的车牌号格式".to_string(),
        }]
    }
}

/// Region prefix, one letter, four letters/digits, then a letter, digit or special suffix.
pub fn is_valid_plate(plate: &str) -> bool {
    let chars: Vec<char> = plate.chars().collect();
    if chars.len() != PLATE_LENGTH {
        return false;
    }

    let upper = |c: char| c.is_ascii_uppercase();
    let upper_or_digit = |c: char| c.is_ascii_uppercase() || c.is_ascii_digit();

    (upper(chars[0]) || REGION_PREFIXES.contains(chars[0]))
        && upper(chars[1])
        && chars[2..6].iter().all(|c| upper_or_digit(*c))
        && (upper_or_digit(chars[6]) || PLATE_SUFFIXES.contains(chars[6]))
}

/// Validator orchestrates rules; the first violation per field wins.
pub struct Validator {
    rules: Vec<Box<dyn FieldRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(PlatePatternRule),
            ],
        }
    }

    pub fn validate(&self, form: &VisitorForm) -> FieldErrors {
        let mut errors = FieldErrors::new();

        for rule in &self.rules {
            for violation in rule.check(form) {
                errors.entry(violation.field).or_insert(violation.message);
            }
        }

        errors
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate with the default rule set.
pub fn validate(form: &VisitorForm) -> FieldErrors {
    Validator::new().validate(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_plates() {
        for plate in ["浙F12345", "京AB1234", "粤B1234挂", "使A0000D", "AB12345", "沪C1234港"] {
            assert!(is_valid_plate(plate), "{plate} should be valid");
        }
    }

    #[test]
    fn test_invalid_plates() {
        for plate in ["AB123", "浙f12345", "浙F1234", "浙F123456", "台F12345", "浙112345", "浙F1234挂挂", "浙F 2345"] {
            assert!(!is_valid_plate(plate), "{plate} should be invalid");
        }
    }

    #[test]
    fn test_well_formed_form_has_no_errors() {
        let form = VisitorForm::new("张三", "技术部", "李四", "浙F12345");
        assert!(validate(&form).is_empty());
    }

    #[test]
    fn test_whitespace_only_fields_fail() {
        let form = VisitorForm::new("  ", "\t", "李四", "浙F12345");
        let errors = validate(&form);
        assert_eq!(
            errors.keys().copied().collect::<Vec<_>>(),
            vec![Field::ApplicantName, Field::Department]
        );
    }

    #[test]
    fn test_empty_plate_reports_required_message_only() {
        let form = VisitorForm::new("张三", "技术部", "李四", "");
        let errors = validate(&form);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[&Field::LicensePlate], "请输入车牌号");
    }

    #[test]
    fn test_bad_plate_reports_pattern_message() {
        let form = VisitorForm::new("张三", "技术部", "李四", "AB123");
        let errors = validate(&form);
        assert_eq!(errors[&Field::LicensePlate], "请输入正确的车牌号格式");
    }

    #[test]
    fn test_field_keys_serialize_camel_case() {
        let errors = validate(&VisitorForm::default());
        let json = serde_json::to_value(&errors).unwrap();
        assert!(json.get("applicantName").is_some());
        assert!(json.get("licensePlate").is_some());
    }
}
