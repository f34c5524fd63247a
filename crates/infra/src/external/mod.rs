//! External service ports: license directory, regulator API, credential decryption.

pub mod credentials;
pub mod license_directory;
pub mod regulator;

pub use credentials::{AesGcmCredentialDecryptor, CredentialDecryptor, CredentialError, LicenseCredentials};
pub use license_directory::{DueLicense, LicenseDirectory, LicenseDirectoryError, StaticLicenseDirectory};
pub use regulator::{
    ApiContext, ApiResponse, FailureClass, RegulatorApi, RegulatorError, classify, dispatch,
};
