//! Deterministic fingerprint of a logical regulator operation.

use sha2::{Digest, Sha256};

use harvestry_core::{HarvestryEntityId, LicenseNumber};

use crate::endpoint::{EntityType, OperationType};

/// Lowercase hex SHA-256 of `license|entity_type|entity_id|operation[|discriminator]`.
///
/// Re-enqueueing the same logical operation (for example after a crash before
/// the original item's status was persisted) always yields the same key, so
/// stores can dedupe on it. The discriminator separates operations that are
/// legitimately repeated against one entity, such as successive adjustments.
pub fn idempotency_key(
    license: &LicenseNumber,
    entity_type: EntityType,
    entity_id: HarvestryEntityId,
    operation_type: OperationType,
    discriminator: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(license.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(entity_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(entity_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(operation_type.as_str().as_bytes());
    if let Some(discriminator) = discriminator {
        hasher.update(b"|");
        hasher.update(discriminator.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_license_casing() {
        let entity = HarvestryEntityId::new();
        let a = idempotency_key(
            &LicenseNumber::parse("lic-1").unwrap(),
            EntityType::Package,
            entity,
            OperationType::Create,
            None,
        );
        let b = idempotency_key(
            &LicenseNumber::parse("LIC-1").unwrap(),
            EntityType::Package,
            entity,
            OperationType::Create,
            None,
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn every_component_changes_the_key() {
        let license = LicenseNumber::parse("LIC-1").unwrap();
        let entity = HarvestryEntityId::new();
        let base = idempotency_key(&license, EntityType::Package, entity, OperationType::Adjust, None);

        let other_op = idempotency_key(&license, EntityType::Package, entity, OperationType::Finish, None);
        let other_entity =
            idempotency_key(&license, EntityType::Package, HarvestryEntityId::new(), OperationType::Adjust, None);
        let discriminated =
            idempotency_key(&license, EntityType::Package, entity, OperationType::Adjust, Some("adj-2"));

        assert_ne!(base, other_op);
        assert_ne!(base, other_entity);
        assert_ne!(base, discriminated);
    }
}
