//! The jurisdiction capability interface and shared validators.

use serde::Serialize;
use thiserror::Error;

/// A jurisdiction rule rejected an input before it was enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} is too long (max {max} characters, got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{field} must be exactly {expected} characters (got {actual})")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} must contain only letters and digits")]
    NotAlphanumeric { field: &'static str },

    #[error("{value:?} is not a valid {field}")]
    NotAllowed { field: &'static str, value: String },
}

/// Regulatory switches that differ between jurisdictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegulatoryFlags {
    pub requires_patient_license_number: bool,
    pub supports_medical: bool,
    pub supports_recreational: bool,
    pub max_plants_per_batch: Option<u32>,
    pub requires_two_person_destruction_signoff: bool,
    pub requires_sub_location_tracking: bool,
}

/// Per-state validation rules and regulator API metadata.
///
/// Implementations are plain data behind a trait: no IO, no clocks. The
/// provided validators are driven by `package_label_length` and
/// `max_batch_name_length`, which is enough for every Metrc state seen so far.
pub trait JurisdictionRules: Send + Sync + core::fmt::Debug {
    /// Upper-case two-letter code, e.g. `CO`.
    fn state_code(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn item_categories(&self) -> &'static [&'static str];

    fn waste_types(&self) -> &'static [&'static str];

    fn waste_methods(&self) -> &'static [&'static str];

    fn required_lab_tests(&self) -> &'static [&'static str];

    fn flags(&self) -> RegulatoryFlags;

    /// Regulator API calls allowed per minute, per license.
    fn api_rate_limit_per_minute(&self) -> u32;

    fn api_base_url(&self, use_sandbox: bool) -> &'static str;

    /// Exact length of a package/plant tag label.
    fn package_label_length(&self) -> usize {
        24
    }

    fn max_batch_name_length(&self) -> usize {
        50
    }

    fn validate_batch_name(&self, name: &str) -> Result<(), RuleViolation> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RuleViolation::Required { field: "batch name" });
        }
        let actual = name.chars().count();
        let max = self.max_batch_name_length();
        if actual > max {
            return Err(RuleViolation::TooLong {
                field: "batch name",
                max,
                actual,
            });
        }
        Ok(())
    }

    fn validate_package_label(&self, label: &str) -> Result<(), RuleViolation> {
        validate_fixed_alphanumeric("package label", label, self.package_label_length())
    }

    fn validate_item_category(&self, category: &str) -> Result<(), RuleViolation> {
        ensure_listed("item category", category, self.item_categories())
    }

    fn validate_waste_method(&self, method: &str) -> Result<(), RuleViolation> {
        ensure_listed("waste method", method, self.waste_methods())
    }

    fn validate_waste_type(&self, waste_type: &str) -> Result<(), RuleViolation> {
        ensure_listed("waste type", waste_type, self.waste_types())
    }
}

pub(crate) fn validate_fixed_alphanumeric(
    field: &'static str,
    value: &str,
    expected: usize,
) -> Result<(), RuleViolation> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RuleViolation::Required { field });
    }
    let actual = value.chars().count();
    if actual != expected {
        return Err(RuleViolation::WrongLength {
            field,
            expected,
            actual,
        });
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RuleViolation::NotAlphanumeric { field });
    }
    Ok(())
}

// Regulator enumerations are matched case-insensitively; Metrc echoes them back
// with inconsistent casing.
fn ensure_listed(
    field: &'static str,
    value: &str,
    allowed: &[&str],
) -> Result<(), RuleViolation> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RuleViolation::Required { field });
    }
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
        Ok(())
    } else {
        Err(RuleViolation::NotAllowed {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_alphanumeric_reports_the_first_problem() {
        assert_eq!(
            validate_fixed_alphanumeric("tag", "", 4),
            Err(RuleViolation::Required { field: "tag" })
        );
        assert_eq!(
            validate_fixed_alphanumeric("tag", "ABC", 4),
            Err(RuleViolation::WrongLength {
                field: "tag",
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            validate_fixed_alphanumeric("tag", "AB-C", 4),
            Err(RuleViolation::NotAlphanumeric { field: "tag" })
        );
        assert!(validate_fixed_alphanumeric("tag", "AB1C", 4).is_ok());
    }

    #[test]
    fn listed_values_ignore_case() {
        assert!(ensure_listed("waste method", "compost", &["Compost"]).is_ok());
        assert!(matches!(
            ensure_listed("waste method", "burn", &["Compost"]),
            Err(RuleViolation::NotAllowed { .. })
        ));
    }
}
