//! AES-256 key material.

use crate::error::{CipherError, CipherResult};
use crate::{IV_LEN, KEY_LEN, SALT_LEN};
use base64::Engine;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

/// A 256-bit key, wiped from memory on drop.
#[derive(Clone)]
pub struct CipherKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

impl CipherKey {
    /// Generate a random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self { bytes }
    }

    /// Derive a key with PBKDF2-HMAC-SHA256.
    pub fn derive(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> CipherResult<Self> {
        if iterations == 0 {
            return Err(CipherError::InvalidKey(
                "kdf iterations must be at least 1".to_string(),
            ));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut bytes[..]);
        Ok(Self { bytes })
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    /// Parse from standard base64.
    pub fn from_base64(s: &str) -> CipherResult<Self> {
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| CipherError::InvalidKey(format!("invalid base64: {e}")))?,
        );
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            CipherError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Encode as standard base64, for handing a random key to its owner.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes[..])
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(<redacted>)")
    }
}

/// Fresh random salt for key derivation.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Fresh random CBC initialization vector.
pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}
