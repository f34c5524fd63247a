//! Colorado (Metrc) rule set.

use crate::rules::{JurisdictionRules, RegulatoryFlags};

const ITEM_CATEGORIES: &[&str] = &[
    "Buds",
    "Shake/Trim",
    "Immature Plants",
    "Seeds",
    "Concentrate",
    "Concentrate (Each)",
    "Infused Edible",
    "Infused Non-Edible",
    "Vape Cartridge",
    "Pre-Roll Flower",
    "Pre-Roll Infused",
];

const WASTE_TYPES: &[&str] = &["Plant Material", "Product Material", "Mixed Waste"];

const WASTE_METHODS: &[&str] = &[
    "Compost",
    "Grinder",
    "Incinerator",
    "Mixed with non-cannabis waste",
];

const REQUIRED_LAB_TESTS: &[&str] = &[
    "Potency",
    "Microbial Contaminants",
    "Residual Solvents",
    "Pesticides",
    "Heavy Metals",
    "Mycotoxins",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct ColoradoRules;

impl JurisdictionRules for ColoradoRules {
    fn state_code(&self) -> &'static str {
        "CO"
    }

    fn name(&self) -> &'static str {
        "Colorado"
    }

    fn item_categories(&self) -> &'static [&'static str] {
        ITEM_CATEGORIES
    }

    fn waste_types(&self) -> &'static [&'static str] {
        WASTE_TYPES
    }

    fn waste_methods(&self) -> &'static [&'static str] {
        WASTE_METHODS
    }

    fn required_lab_tests(&self) -> &'static [&'static str] {
        REQUIRED_LAB_TESTS
    }

    fn flags(&self) -> RegulatoryFlags {
        RegulatoryFlags {
            requires_patient_license_number: false,
            supports_medical: true,
            supports_recreational: true,
            max_plants_per_batch: Some(100),
            requires_two_person_destruction_signoff: false,
            requires_sub_location_tracking: false,
        }
    }

    fn api_rate_limit_per_minute(&self) -> u32 {
        60
    }

    fn api_base_url(&self, use_sandbox: bool) -> &'static str {
        if use_sandbox {
            "https://sandbox-api-co.metrc.com"
        } else {
            "https://api-co.metrc.com"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleViolation;

    #[test]
    fn batch_name_limits() {
        let rules = ColoradoRules;
        assert_eq!(
            rules.validate_batch_name("  "),
            Err(RuleViolation::Required { field: "batch name" })
        );
        assert!(rules.validate_batch_name("Blue Dream 2026-10").is_ok());
        assert!(matches!(
            rules.validate_batch_name(&"x".repeat(51)),
            Err(RuleViolation::TooLong { max: 50, actual: 51, .. })
        ));
    }

    #[test]
    fn sandbox_url_is_distinct() {
        let rules = ColoradoRules;
        assert_ne!(rules.api_base_url(true), rules.api_base_url(false));
        assert!(rules.api_base_url(true).contains("sandbox"));
    }

    #[test]
    fn waste_method_must_be_listed() {
        let rules = ColoradoRules;
        assert!(rules.validate_waste_method("grinder").is_ok());
        assert!(rules.validate_waste_method("Landfill").is_err());
    }
}
