//! Cipher metadata persisted alongside encrypted artifacts.

use crate::error::{CipherError, CipherResult};
use crate::key::{CipherKey, random_iv, random_salt};
use crate::{ALGORITHM, IV_LEN, SALT_LEN};
use serde::{Deserialize, Serialize};

/// Where the key of an encrypted artifact came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDerivation {
    /// PBKDF2-HMAC-SHA256 over a user password and the stored salt.
    Password,
    /// Random per-session key held only by the uploader.
    Random,
}

/// Parameters needed to decrypt an artifact, minus the key itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherMetadata {
    pub algorithm: String,
    #[serde(with = "b64_16")]
    pub salt: [u8; SALT_LEN],
    #[serde(with = "b64_16")]
    pub iv: [u8; IV_LEN],
    pub key_derivation: KeyDerivation,
    /// PBKDF2 rounds, present only for password-derived keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_iterations: Option<u32>,
}

impl CipherMetadata {
    /// Fresh salt and IV for a password-derived key.
    pub fn for_password(kdf_iterations: u32) -> Self {
        Self {
            algorithm: ALGORITHM.to_string(),
            salt: random_salt(),
            iv: random_iv(),
            key_derivation: KeyDerivation::Password,
            kdf_iterations: Some(kdf_iterations),
        }
    }

    /// Fresh IV for a random key. The salt is random filler.
    pub fn for_random_key() -> Self {
        Self {
            algorithm: ALGORITHM.to_string(),
            salt: random_salt(),
            iv: random_iv(),
            key_derivation: KeyDerivation::Random,
            kdf_iterations: None,
        }
    }

    /// Check the record describes something this crate can decrypt.
    pub fn validate(&self) -> CipherResult<()> {
        if self.algorithm != ALGORITHM {
            return Err(CipherError::InvalidMetadata(format!(
                "unsupported algorithm {:?}",
                self.algorithm
            )));
        }
        match (self.key_derivation, self.kdf_iterations) {
            (KeyDerivation::Password, Some(n)) if n > 0 => Ok(()),
            (KeyDerivation::Password, _) => Err(CipherError::InvalidMetadata(
                "password derivation requires kdf_iterations >= 1".to_string(),
            )),
            (KeyDerivation::Random, None) => Ok(()),
            (KeyDerivation::Random, Some(_)) => Err(CipherError::InvalidMetadata(
                "random keys carry no kdf_iterations".to_string(),
            )),
        }
    }

    /// Re-derive the key for a password-encrypted artifact.
    pub fn derive_key(&self, password: &str) -> CipherResult<CipherKey> {
        self.validate()?;
        let iterations = match (self.key_derivation, self.kdf_iterations) {
            (KeyDerivation::Password, Some(n)) => n,
            _ => {
                return Err(CipherError::InvalidKey(
                    "artifact was encrypted with a random key, not a password".to_string(),
                ));
            }
        };
        CipherKey::derive(password, &self.salt, iterations)
    }
}

/// Standard base64 for 16-byte fields, rejecting any other decoded length.
mod b64_16 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(deserializer)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(de::Error::custom)?;
        decoded
            .as_slice()
            .try_into()
            .map_err(|_| de::Error::custom(format!("expected 16 bytes, got {}", decoded.len())))
    }
}
