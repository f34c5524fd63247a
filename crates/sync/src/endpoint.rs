//! Entity/operation vocabulary and the regulator endpoint table.
//!
//! The table is part of the wire contract with the regulator: paths are
//! reproduced exactly and must not be "tidied".

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Regulator-side record type an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    PlantBatch,
    Plant,
    Harvest,
    Package,
    Item,
    Strain,
    Location,
    Transfer,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::PlantBatch => "PlantBatch",
            EntityType::Plant => "Plant",
            EntityType::Harvest => "Harvest",
            EntityType::Package => "Package",
            EntityType::Item => "Item",
            EntityType::Strain => "Strain",
            EntityType::Location => "Location",
            EntityType::Transfer => "Transfer",
        }
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PlantBatch" => EntityType::PlantBatch,
            "Plant" => EntityType::Plant,
            "Harvest" => EntityType::Harvest,
            "Package" => EntityType::Package,
            "Item" => EntityType::Item,
            "Strain" => EntityType::Strain,
            "Location" => EntityType::Location,
            "Transfer" => EntityType::Transfer,
            other => return Err(format!("unknown entity type: {other}")),
        })
    }
}

/// What to do with the target record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Read,
    Create,
    Update,
    Delete,
    ChangePhase,
    Move,
    Harvest,
    Package,
    RecordWaste,
    Finish,
    Adjust,
    Remediate,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Read => "Read",
            OperationType::Create => "Create",
            OperationType::Update => "Update",
            OperationType::Delete => "Delete",
            OperationType::ChangePhase => "ChangePhase",
            OperationType::Move => "Move",
            OperationType::Harvest => "Harvest",
            OperationType::Package => "Package",
            OperationType::RecordWaste => "RecordWaste",
            OperationType::Finish => "Finish",
            OperationType::Adjust => "Adjust",
            OperationType::Remediate => "Remediate",
        }
    }

    pub fn http_method(&self) -> HttpMethod {
        match self {
            OperationType::Read => HttpMethod::Get,
            OperationType::Update => HttpMethod::Put,
            OperationType::Delete => HttpMethod::Delete,
            OperationType::Create
            | OperationType::ChangePhase
            | OperationType::Move
            | OperationType::Harvest
            | OperationType::Package
            | OperationType::RecordWaste
            | OperationType::Finish
            | OperationType::Adjust
            | OperationType::Remediate => HttpMethod::Post,
        }
    }
}

impl core::fmt::Display for OperationType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Read" => OperationType::Read,
            "Create" => OperationType::Create,
            "Update" => OperationType::Update,
            "Delete" => OperationType::Delete,
            "ChangePhase" => OperationType::ChangePhase,
            "Move" => OperationType::Move,
            "Harvest" => OperationType::Harvest,
            "Package" => OperationType::Package,
            "RecordWaste" => OperationType::RecordWaste,
            "Finish" => OperationType::Finish,
            "Adjust" => OperationType::Adjust,
            "Remediate" => OperationType::Remediate,
            other => return Err(format!("unknown operation type: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl core::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

/// A resolved regulator call: verb plus path relative to the jurisdiction base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("no regulator endpoint for {entity_type}/{operation_type}")]
    Unsupported {
        entity_type: EntityType,
        operation_type: OperationType,
    },

    #[error("{entity_type}/{operation_type} requires an external id from a prior sync")]
    MissingExternalId {
        entity_type: EntityType,
        operation_type: OperationType,
    },
}

impl EndpointError {
    /// Error code recorded on the queue item.
    pub fn code(&self) -> &'static str {
        match self {
            EndpointError::Unsupported { .. } => "UNSUPPORTED",
            EndpointError::MissingExternalId { .. } => "MISSING_EXTERNAL_ID",
        }
    }
}

/// Map an operation to its regulator endpoint.
///
/// `external_id` is only consulted for routes that address an existing
/// regulator record (`Transfer/Delete`).
pub fn resolve_endpoint(
    entity_type: EntityType,
    operation_type: OperationType,
    external_id: Option<i64>,
) -> Result<Endpoint, EndpointError> {
    use EntityType as E;
    use OperationType as O;

    let path = match (entity_type, operation_type) {
        (E::PlantBatch, O::Create) => "plantbatches/v1/createplantings",
        (E::PlantBatch, O::ChangePhase) => "plantbatches/v1/changegrowthphase",
        (E::Plant, O::Move) => "plants/v1/moveplants",
        (E::Plant, O::Delete) => "plants/v1/destroyplants",
        (E::Plant, O::Harvest) => "plants/v1/harvestplants",
        (E::Harvest, O::Package) => "harvests/v1/createpackages",
        (E::Harvest, O::RecordWaste) => "harvests/v1/waste",
        (E::Harvest, O::Finish) => "harvests/v1/finish",
        (E::Package, O::Create) => "packages/v1/create",
        (E::Package, O::Adjust) => "packages/v1/adjust",
        (E::Package, O::Remediate) => "packages/v1/remediate",
        (E::Package, O::Finish) => "packages/v1/finish",
        (E::Package, O::Move) => "packages/v1/change/locations",
        (E::Item, O::Create) => "items/v1/create",
        (E::Item, O::Update) => "items/v1/update",
        (E::Strain, O::Create) => "strains/v1/create",
        (E::Strain, O::Update) => "strains/v1/update",
        (E::Location, O::Create) => "locations/v1/create",
        (E::Transfer, O::Create) | (E::Transfer, O::Update) => "transfers/v1/templates",
        (E::Transfer, O::Delete) => {
            let id = external_id.ok_or(EndpointError::MissingExternalId {
                entity_type,
                operation_type,
            })?;
            return Ok(Endpoint {
                method: operation_type.http_method(),
                path: format!("transfers/v1/templates/{id}"),
            });
        }
        _ => {
            return Err(EndpointError::Unsupported {
                entity_type,
                operation_type,
            });
        }
    };

    Ok(Endpoint {
        method: operation_type.http_method(),
        path: path.to_string(),
    })
}
