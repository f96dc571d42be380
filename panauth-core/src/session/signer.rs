//! Recoverable secp256k1 signatures for the legacy device-session scheme.

use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::SessionError;
use crate::model::AccountId;

/// Application id baked into every canonical signing string.
pub const APP_ID: &str = "5dde4e1bdf9e4966b387ba58f4b3fdc3";

/// Holds one account's signing key.
///
/// Keys live only in memory: a lost key is replaced by a fresh one and a new
/// device session.
#[derive(Clone)]
pub struct DeviceSessionSigner {
    key: SigningKey,
}

impl DeviceSessionSigner {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Build a signer from a 32-byte secret scalar.
    pub fn from_slice(secret: &[u8]) -> Result<Self, SessionError> {
        let key = SigningKey::from_slice(secret).map_err(|e| SessionError::Signing {
            message: format!("invalid signing key: {}", e),
        })?;
        Ok(Self { key })
    }

    /// The string the server expects to be signed.
    pub fn canonical_string(device_id: &str, account: &AccountId) -> String {
        format!("{}:{}:{}:{}", APP_ID, device_id, account, 0)
    }

    /// Sign the canonical string and hex-encode `r || s || recovery_id`.
    ///
    /// The signature is low-S normalised.
    pub fn sign(&self, device_id: &str, account: &AccountId) -> Result<String, SessionError> {
        let hash = Sha256::digest(Self::canonical_string(device_id, account).as_bytes());
        let (signature, recovery_id) =
            self.key
                .sign_prehash_recoverable(&hash)
                .map_err(|e| SessionError::Signing {
                    message: e.to_string(),
                })?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte());
        Ok(hex::encode(bytes))
    }

    /// Uncompressed public key as hex of `X || Y` (no SEC1 prefix byte).
    pub fn public_key_hex(&self) -> String {
        let point = self.key.verifying_key().to_encoded_point(false);
        hex::encode(&point.as_bytes()[1..])
    }
}

impl std::fmt::Debug for DeviceSessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSessionSigner")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}
