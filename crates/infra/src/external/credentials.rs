//! Regulator API credential decryption.
//!
//! Stored keys are base64 of a version-tagged AES-256-GCM blob:
//!
//! ```text
//! 0x01 | nonce (12 bytes) | ciphertext || tag (16 bytes)
//! ```
//!
//! The license number is bound as additional authenticated data, so a blob
//! copied onto another license fails to decrypt. There is no plaintext
//! fallback: anything without the version tag is rejected.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use harvestry_core::LicenseNumber;

use super::license_directory::DueLicense;

const VERSION_AES_GCM: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = 1 + NONCE_LEN + TAG_LEN;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("credential is not valid base64")]
    Encoding,
    #[error("unsupported credential format")]
    InvalidFormat,
    #[error("credential decryption failed")]
    DecryptionFailed,
    #[error("credential encryption failed")]
    EncryptionFailed,
}

/// Plaintext regulator API keys for one license. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LicenseCredentials {
    pub vendor_key: String,
    pub user_key: String,
}

impl core::fmt::Debug for LicenseCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("LicenseCredentials { .. }")
    }
}

/// Turns stored (encrypted) license keys into plaintext at dispatch time.
///
/// Production deployments can back this with a KMS; the AES-GCM
/// implementation below covers locally held data keys.
pub trait CredentialDecryptor: Send + Sync {
    fn decrypt(&self, license: &LicenseNumber, encrypted: &str) -> Result<String, CredentialError>;

    fn decrypt_license(&self, license: &DueLicense) -> Result<LicenseCredentials, CredentialError> {
        Ok(LicenseCredentials {
            vendor_key: self.decrypt(&license.license_number, &license.encrypted_vendor_key)?,
            user_key: self.decrypt(&license.license_number, &license.encrypted_user_key)?,
        })
    }
}

/// AES-256-GCM decryptor holding a 32-byte data key.
pub struct AesGcmCredentialDecryptor {
    key: Zeroizing<Vec<u8>>,
}

impl core::fmt::Debug for AesGcmCredentialDecryptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("AesGcmCredentialDecryptor { .. }")
    }
}

impl AesGcmCredentialDecryptor {
    pub fn new(key: Vec<u8>) -> Result<Self, CredentialError> {
        let key = Zeroizing::new(key);
        if key.len() != KEY_LEN {
            return Err(CredentialError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        Ok(Self { key })
    }

    /// Key material as standard base64 (e.g. from a mounted secret).
    pub fn from_base64_key(encoded: &str) -> Result<Self, CredentialError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CredentialError::InvalidKey("not valid base64".to_string()))?;
        Self::new(bytes)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CredentialError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CredentialError::InvalidKey(e.to_string()))
    }

    /// Produce a stored credential blob for `license` (provisioning and tests).
    pub fn encrypt(&self, license: &LicenseNumber, plaintext: &str) -> Result<String, CredentialError> {
        let cipher = self.cipher()?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: license.as_str().as_bytes(),
                },
            )
            .map_err(|_| CredentialError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(VERSION_AES_GCM);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }
}

impl CredentialDecryptor for AesGcmCredentialDecryptor {
    fn decrypt(&self, license: &LicenseNumber, encrypted: &str) -> Result<String, CredentialError> {
        let blob = STANDARD
            .decode(encrypted.trim())
            .map_err(|_| CredentialError::Encoding)?;
        if blob.len() < MIN_ENCRYPTED_LEN || blob[0] != VERSION_AES_GCM {
            return Err(CredentialError::InvalidFormat);
        }

        let nonce = Nonce::from_slice(&blob[1..1 + NONCE_LEN]);
        let plaintext = Zeroizing::new(
            self.cipher()?
                .decrypt(
                    nonce,
                    Payload {
                        msg: &blob[1 + NONCE_LEN..],
                        aad: license.as_str().as_bytes(),
                    },
                )
                .map_err(|_| CredentialError::DecryptionFailed)?,
        );

        String::from_utf8(plaintext.to_vec()).map_err(|_| CredentialError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decryptor() -> AesGcmCredentialDecryptor {
        AesGcmCredentialDecryptor::new(vec![7u8; 32]).unwrap()
    }

    fn license(raw: &str) -> LicenseNumber {
        LicenseNumber::parse(raw).unwrap()
    }

    #[test]
    fn decrypts_what_was_encrypted_for_the_same_license() {
        let d = decryptor();
        let blob = d.encrypt(&license("LIC-1"), "vendor-secret").unwrap();
        assert_eq!(d.decrypt(&license("LIC-1"), &blob).unwrap(), "vendor-secret");
    }

    #[test]
    fn blob_is_bound_to_its_license() {
        let d = decryptor();
        let blob = d.encrypt(&license("LIC-1"), "vendor-secret").unwrap();
        assert_eq!(
            d.decrypt(&license("LIC-2"), &blob),
            Err(CredentialError::DecryptionFailed)
        );
    }

    #[test]
    fn plain_base64_is_not_accepted() {
        let d = decryptor();
        let plain = STANDARD.encode("vendor-secret-but-long-enough-to-pass-length");
        assert_eq!(d.decrypt(&license("LIC-1"), &plain), Err(CredentialError::InvalidFormat));
        assert_eq!(d.decrypt(&license("LIC-1"), "%%%"), Err(CredentialError::Encoding));
    }

    #[test]
    fn wrong_key_fails() {
        let blob = decryptor().encrypt(&license("LIC-1"), "x").unwrap();
        let other = AesGcmCredentialDecryptor::new(vec![9u8; 32]).unwrap();
        assert!(other.decrypt(&license("LIC-1"), &blob).is_err());
    }

    #[test]
    fn key_must_be_32_bytes() {
        assert!(AesGcmCredentialDecryptor::new(vec![0u8; 16]).is_err());
        let encoded = STANDARD.encode([1u8; 32]);
        assert!(AesGcmCredentialDecryptor::from_base64_key(&encoded).is_ok());
        assert!(AesGcmCredentialDecryptor::from_base64_key("not base64!").is_err());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = LicenseCredentials {
            vendor_key: "v".into(),
            user_key: "u".into(),
        };
        assert_eq!(format!("{creds:?}"), "LicenseCredentials { .. }");
    }
}
