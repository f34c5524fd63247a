//! Registry resolving a state code to its rule set.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use harvestry_core::StateCode;

use crate::colorado::ColoradoRules;
use crate::michigan::MichiganRules;
use crate::rules::JurisdictionRules;

/// No rule set is registered for the requested state code.
///
/// This is a configuration gap (a license points at a state nobody has
/// implemented), so callers must surface it rather than skip the license.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported jurisdiction: {state_code:?}")]
pub struct UnsupportedJurisdiction {
    pub state_code: String,
}

/// Registry of jurisdiction rule sets keyed by upper-case state code.
#[derive(Debug, Clone, Default)]
pub struct JurisdictionRulesFactory {
    rules: BTreeMap<String, Arc<dyn JurisdictionRules>>,
}

impl JurisdictionRulesFactory {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every built-in jurisdiction.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(ColoradoRules);
        factory.register(MichiganRules);
        factory
    }

    /// Register (or replace) the rule set for `rules.state_code()`.
    pub fn register<R>(&mut self, rules: R) -> &mut Self
    where
        R: JurisdictionRules + 'static,
    {
        let code = rules.state_code().to_ascii_uppercase();
        debug!(state_code = %code, name = rules.name(), "registered jurisdiction rules");
        self.rules.insert(code, Arc::new(rules));
        self
    }

    pub fn get_rules(
        &self,
        state_code: &str,
    ) -> Result<Arc<dyn JurisdictionRules>, UnsupportedJurisdiction> {
        let key = state_code.trim().to_ascii_uppercase();
        self.rules
            .get(&key)
            .cloned()
            .ok_or(UnsupportedJurisdiction { state_code: key })
    }

    pub fn rules_for(
        &self,
        state: &StateCode,
    ) -> Result<Arc<dyn JurisdictionRules>, UnsupportedJurisdiction> {
        self.get_rules(state.as_str())
    }

    pub fn has_rules(&self, state_code: &str) -> bool {
        self.rules.contains_key(&state_code.trim().to_ascii_uppercase())
    }

    /// Supported state codes in ascending order.
    pub fn supported_states(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleViolation;
    use proptest::prelude::*;

    const VALID_LABEL: &str = "1A4060300001234000012345";

    #[test]
    fn unknown_state_is_unsupported() {
        let factory = JurisdictionRulesFactory::with_defaults();
        let err = factory.get_rules("ZZ").unwrap_err();
        assert_eq!(err.state_code, "ZZ");
        assert!(!factory.has_rules("zz"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let factory = JurisdictionRulesFactory::with_defaults();
        assert_eq!(factory.get_rules("co").unwrap().state_code(), "CO");
        assert_eq!(factory.get_rules(" Mi ").unwrap().state_code(), "MI");
        assert!(factory.has_rules("mi"));
    }

    #[test]
    fn supported_states_are_ordered() {
        let factory = JurisdictionRulesFactory::with_defaults();
        assert_eq!(factory.supported_states(), vec!["CO", "MI"]);
        assert!(JurisdictionRulesFactory::new().supported_states().is_empty());
    }

    #[test]
    fn rules_for_accepts_state_code_value() {
        let factory = JurisdictionRulesFactory::with_defaults();
        let state = StateCode::parse("co").unwrap();
        assert_eq!(factory.rules_for(&state).unwrap().name(), "Colorado");
    }

    #[test]
    fn package_labels_for_reference_jurisdictions() {
        let factory = JurisdictionRulesFactory::with_defaults();
        for code in ["CO", "MI"] {
            let rules = factory.get_rules(code).unwrap();

            assert!(matches!(
                rules.validate_package_label("1A406030000123400001"),
                Err(RuleViolation::WrongLength { expected: 24, actual: 20, .. })
            ));
            assert_eq!(
                rules.validate_package_label("1A4060300001234000-12345"),
                Err(RuleViolation::NotAlphanumeric { field: "package label" })
            );
            assert!(rules.validate_package_label(VALID_LABEL).is_ok());
            assert_eq!(
                rules.validate_package_label(""),
                Err(RuleViolation::Required { field: "package label" })
            );
        }
    }

    proptest! {
        /// Property: any 24-character alphanumeric label passes, any other length fails.
        #[test]
        fn label_validity_tracks_length(label in "[A-Z0-9]{1,40}") {
            let factory = JurisdictionRulesFactory::with_defaults();
            let rules = factory.get_rules("CO").unwrap();
            let ok = rules.validate_package_label(&label).is_ok();
            prop_assert_eq!(ok, label.len() == 24);
        }
    }
}
