//! Audit key material: per-field AES-256-GCM and an HMAC-SHA256 integrity key.
//!
//! Keys are derived once per process from host and process entropy plus a
//! random salt, and live only in memory.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use super::entry::EncryptedField;
use crate::error::AuditError;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const SALT_SIZE: usize = 16;

/// Placeholder returned when a field cannot be decrypted.
pub const DECRYPTION_FAILED: &str = "[DECRYPTION_FAILED]";

type HmacSha256 = Hmac<Sha256>;

pub struct AuditKeys {
    cipher: Aes256Gcm,
    mac_key: [u8; 32],
}

impl AuditKeys {
    /// Derive fresh keys for this process.
    pub fn derive(iterations: u32) -> Result<Self, AuditError> {
        let mut salt = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);
        let mut material = entropy_material();
        let mut nonce = [0u8; 32];
        rand::rng().fill_bytes(&mut nonce);
        material.extend_from_slice(&nonce);

        let started = std::time::Instant::now();
        let keys = Self::from_material(&material, &salt, iterations)?;
        log::debug!(
            "derived audit keys ({iterations} iterations) in {:?}",
            started.elapsed()
        );
        Ok(keys)
    }

    /// PBKDF2-HMAC-SHA256 to 64 bytes: encryption key, then MAC key.
    pub fn from_material(material: &[u8], salt: &[u8], iterations: u32) -> Result<Self, AuditError> {
        let mut okm = [0u8; 64];
        pbkdf2::pbkdf2_hmac::<Sha256>(material, salt, iterations.max(1), &mut okm);
        let (enc, mac) = okm.split_at(32);
        let cipher = Aes256Gcm::new_from_slice(enc)
            .map_err(|e| AuditError::Crypto(format!("invalid key length: {e:?}")))?;
        let mut mac_key = [0u8; 32];
        mac_key.copy_from_slice(mac);
        Ok(Self { cipher, mac_key })
    }

    /// Encrypt one field under a fresh IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedField, AuditError> {
        let mut iv = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut iv);
        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| AuditError::Crypto(format!("encrypt failed: {e:?}")))?;
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);
        Ok(EncryptedField {
            data: STANDARD.encode(&sealed),
            iv: STANDARD.encode(iv),
            tag: STANDARD.encode(tag),
        })
    }

    pub fn decrypt(&self, field: &EncryptedField) -> Result<String, AuditError> {
        let decode = |part: &str| {
            STANDARD
                .decode(part)
                .map_err(|e| AuditError::Crypto(format!("bad base64: {e}")))
        };
        let iv = decode(&field.iv)?;
        let tag = decode(&field.tag)?;
        if iv.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err(AuditError::Crypto("malformed envelope".into()));
        }
        let mut sealed = decode(&field.data)?;
        sealed.extend_from_slice(&tag);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
            .map_err(|e| AuditError::Crypto(format!("decrypt failed: {e:?}")))?;
        String::from_utf8(plain).map_err(|e| AuditError::Crypto(format!("not utf-8: {e}")))
    }

    /// Decrypt, or the [`DECRYPTION_FAILED`] sentinel.
    pub fn decrypt_or_sentinel(&self, field: &EncryptedField) -> String {
        self.decrypt(field)
            .unwrap_or_else(|_| DECRYPTION_FAILED.to_string())
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key).expect("HMAC can take key of any size")
    }

    /// Hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Host and process facts mixed into the key material.
fn entropy_material() -> Vec<u8> {
    let mut material = Vec::new();
    material.extend_from_slice(&std::process::id().to_le_bytes());
    if let Ok(now) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        material.extend_from_slice(&now.as_nanos().to_le_bytes());
    }
    for name in ["HOSTNAME", "USER", "HOME"] {
        if let Ok(value) = std::env::var(name) {
            material.extend_from_slice(value.as_bytes());
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        material.extend_from_slice(exe.to_string_lossy().as_bytes());
    }
    material
}
