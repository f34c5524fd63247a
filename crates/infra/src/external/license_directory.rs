use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use harvestry_core::{LicenseNumber, StateCode};

/// A license with sync work due, as reported by the license directory.
///
/// The vendor/user keys are still encrypted here; they are only decrypted
/// right before a dispatch.
#[derive(Clone, PartialEq, Eq)]
pub struct DueLicense {
    pub license_number: LicenseNumber,
    pub state_code: StateCode,
    pub use_sandbox: bool,
    pub encrypted_vendor_key: String,
    pub encrypted_user_key: String,
}

impl core::fmt::Debug for DueLicense {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DueLicense")
            .field("license_number", &self.license_number)
            .field("state_code", &self.state_code)
            .field("use_sandbox", &self.use_sandbox)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum LicenseDirectoryError {
    #[error("license directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of licenses due for sync.
#[async_trait]
pub trait LicenseDirectory: Send + Sync {
    async fn licenses_due_for_sync(&self) -> Result<Vec<DueLicense>, LicenseDirectoryError>;
}

/// Fixed license list (tests/dev, single-site deployments).
#[derive(Debug, Default)]
pub struct StaticLicenseDirectory {
    licenses: RwLock<Vec<DueLicense>>,
}

impl StaticLicenseDirectory {
    pub fn new(licenses: Vec<DueLicense>) -> Self {
        Self {
            licenses: RwLock::new(licenses),
        }
    }

    pub fn replace(&self, licenses: Vec<DueLicense>) -> Result<(), LicenseDirectoryError> {
        let mut guard = self
            .licenses
            .write()
            .map_err(|_| LicenseDirectoryError::Unavailable("lock poisoned".to_string()))?;
        *guard = licenses;
        Ok(())
    }
}

#[async_trait]
impl LicenseDirectory for StaticLicenseDirectory {
    async fn licenses_due_for_sync(&self) -> Result<Vec<DueLicense>, LicenseDirectoryError> {
        let guard = self
            .licenses
            .read()
            .map_err(|_| LicenseDirectoryError::Unavailable("lock poisoned".to_string()))?;
        Ok(guard.clone())
    }
}
