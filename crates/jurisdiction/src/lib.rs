//! Jurisdiction rule sets (pure, side-effect free).
//!
//! Regulatory rules vary by state and change independently of sync mechanics.
//! Each state implements [`JurisdictionRules`]; the dispatcher only ever sees the
//! trait object resolved through [`JurisdictionRulesFactory`].

pub mod colorado;
pub mod factory;
pub mod michigan;
pub mod rules;

pub use colorado::ColoradoRules;
pub use factory::{JurisdictionRulesFactory, UnsupportedJurisdiction};
pub use michigan::MichiganRules;
pub use rules::{JurisdictionRules, RegulatoryFlags, RuleViolation};
