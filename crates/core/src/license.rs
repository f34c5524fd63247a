//! Regulator license and jurisdiction code value objects.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A regulator-issued facility license number.
///
/// Licenses partition both rate limits and credentials, so every comparison
/// must be on the normalized (trimmed, upper-case) form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseNumber(String);

impl LicenseNumber {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(DomainError::validation("license number is required"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for LicenseNumber {}

impl core::fmt::Display for LicenseNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LicenseNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LicenseNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LicenseNumber> for String {
    fn from(value: LicenseNumber) -> Self {
        value.0
    }
}

/// Two-letter jurisdiction code (e.g. `CO`, `MI`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateCode(String);

impl StateCode {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.len() != 2 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "state code must be two letters, got {raw:?}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for StateCode {}

impl core::fmt::Display for StateCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StateCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StateCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StateCode> for String {
    fn from(value: StateCode) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn license_number_is_normalized() {
        let license = LicenseNumber::parse("  403r-x0001 ").unwrap();
        assert_eq!(license.as_str(), "403R-X0001");
    }

    #[test]
    fn blank_license_is_rejected() {
        assert!(matches!(
            LicenseNumber::parse("   "),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn state_code_requires_two_letters() {
        assert_eq!(StateCode::parse("co").unwrap().as_str(), "CO");
        assert!(StateCode::parse("C").is_err());
        assert!(StateCode::parse("C0").is_err());
        assert!(StateCode::parse("COL").is_err());
    }

    #[test]
    fn serde_applies_normalization() {
        let license: LicenseNumber = serde_json::from_str("\"lic-1\"").unwrap();
        assert_eq!(license.as_str(), "LIC-1");
        assert!(serde_json::from_str::<LicenseNumber>("\"\"").is_err());
    }

    proptest! {
        /// Property: normalization is idempotent and case-insensitive.
        #[test]
        fn license_parse_is_case_insensitive(raw in "[A-Za-z0-9-]{1,24}") {
            let lower = LicenseNumber::parse(&raw.to_ascii_lowercase()).unwrap();
            let upper = LicenseNumber::parse(&raw.to_ascii_uppercase()).unwrap();
            prop_assert_eq!(&lower, &upper);
            prop_assert_eq!(LicenseNumber::parse(lower.as_str()).unwrap(), lower);
        }
    }
}
