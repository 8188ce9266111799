//! AES-256-GCM encryption for tenant tokens and secrets.
//!
//! The key is configured as a 64-hex-character string (32 raw bytes). The
//! ciphertext, nonce and authentication tag are stored as separate base64
//! columns so a blob can be validated without decrypting it.

use crate::error::{StoreError, StoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use codeflow_core::EncryptedBlob;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

#[derive(Clone)]
pub struct Crypto {
    key: [u8; 32],
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material, even in debug output.
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}

impl Crypto {
    /// Build from the configured 64-hex-character key.
    pub fn from_hex_key(hex_key: &str) -> StoreResult<Self> {
        if hex_key.len() != 64 {
            return Err(StoreError::Crypto(format!(
                "encryption key must be 64 hex characters, got {}",
                hex_key.len()
            )));
        }
        let decoded = hex::decode(hex_key)
            .map_err(|e| StoreError::Crypto(format!("encryption key is not valid hex: {}", e)))?;
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> StoreResult<EncryptedBlob> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut ct_and_tag = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| StoreError::Crypto("encryption failure".to_string()))?;

        let tag = ct_and_tag.split_off(ct_and_tag.len() - TAG_LEN);
        Ok(EncryptedBlob {
            ciphertext: general_purpose::STANDARD.encode(&ct_and_tag),
            iv: general_purpose::STANDARD.encode(nonce.as_slice()),
            tag: general_purpose::STANDARD.encode(&tag),
        })
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> StoreResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));
        let nonce_bytes = general_purpose::STANDARD
            .decode(&blob.iv)
            .map_err(|e| StoreError::Crypto(format!("bad iv: {}", e)))?;
        let mut payload = general_purpose::STANDARD
            .decode(&blob.ciphertext)
            .map_err(|e| StoreError::Crypto(format!("bad ciphertext: {}", e)))?;
        let mut tag = general_purpose::STANDARD
            .decode(&blob.tag)
            .map_err(|e| StoreError::Crypto(format!("bad tag: {}", e)))?;
        if tag.len() != TAG_LEN {
            return Err(StoreError::Crypto("bad tag length".to_string()));
        }
        payload.append(&mut tag);

        let nonce = Nonce::from_slice(&nonce_bytes);
        cipher
            .decrypt(nonce, payload.as_ref())
            .map_err(|_| StoreError::Crypto("decryption failure".to_string()))
    }

    pub fn decrypt_string(&self, blob: &EncryptedBlob) -> StoreResult<String> {
        let bytes = self.decrypt(blob)?;
        String::from_utf8(bytes)
            .map_err(|_| StoreError::Crypto("decrypted value is not utf-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn roundtrip() {
        let crypto = Crypto::from_hex_key(TEST_KEY).unwrap();
        let blob = crypto.encrypt(b"hunter2").unwrap();
        assert_eq!(crypto.decrypt(&blob).unwrap(), b"hunter2");
    }

    #[test]
    fn tampered_tag_rejected() {
        let crypto = Crypto::from_hex_key(TEST_KEY).unwrap();
        let mut blob = crypto.encrypt(b"hunter2").unwrap();
        blob.tag = general_purpose_flip(&blob.tag);
        assert!(crypto.decrypt(&blob).is_err());
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let crypto = Crypto::from_hex_key(TEST_KEY).unwrap();
        let mut blob = crypto.encrypt(b"some longer plaintext value").unwrap();
        blob.ciphertext = general_purpose_flip(&blob.ciphertext);
        assert!(crypto.decrypt(&blob).is_err());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(Crypto::from_hex_key("abcd").is_err());
        assert!(Crypto::from_hex_key(&"zz".repeat(32)).is_err());
    }

    fn general_purpose_flip(b64: &str) -> String {
        let mut bytes = general_purpose::STANDARD.decode(b64).unwrap();
        bytes[0] ^= 0x01;
        general_purpose::STANDARD.encode(bytes)
    }
}
