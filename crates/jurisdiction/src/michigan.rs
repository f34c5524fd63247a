//! Michigan (Metrc) rule set.

use crate::rules::{JurisdictionRules, RegulatoryFlags};

const ITEM_CATEGORIES: &[&str] = &[
    "Buds",
    "Shake/Trim",
    "Immature Plants",
    "Seeds",
    "Concentrate",
    "Infused Edible",
    "Infused Liquid",
    "Infused Topical",
    "Vape Cartridge",
    "Pre-Roll",
    "Kief",
];

const WASTE_TYPES: &[&str] = &["Plant Waste", "Product Waste", "Mixed Waste"];

const WASTE_METHODS: &[&str] = &[
    "Compost",
    "Grinder",
    "Incinerator",
    "Landfill (rendered unusable)",
];

const REQUIRED_LAB_TESTS: &[&str] = &[
    "Potency",
    "Microbial",
    "Residual Solvents",
    "Pesticides",
    "Heavy Metals",
    "Mycotoxins",
    "Water Activity",
    "Foreign Matter",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct MichiganRules;

impl JurisdictionRules for MichiganRules {
    fn state_code(&self) -> &'static str {
        "MI"
    }

    fn name(&self) -> &'static str {
        "Michigan"
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
            requires_patient_license_number: true,
            supports_medical: true,
            supports_recreational: true,
            max_plants_per_batch: Some(100),
            requires_two_person_destruction_signoff: true,
            requires_sub_location_tracking: true,
        }
    }

    fn api_rate_limit_per_minute(&self) -> u32 {
        50
    }

    fn api_base_url(&self, use_sandbox: bool) -> &'static str {
        if use_sandbox {
            "https://sandbox-api-mi.metrc.com"
        } else {
            "https://api-mi.metrc.com"
        }
    }

    fn max_batch_name_length(&self) -> usize {
        64
    }
}
