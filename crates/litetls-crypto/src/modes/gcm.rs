//! GCM (Galois/Counter Mode) authenticated encryption.
//!
//! AES-GCM as defined in NIST SP 800-38D, with a 96-bit nonce and a
//! 128-bit tag, backed by the `aes-gcm` crate.

use crate::provider::Aead;
use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use litetls_types::CryptoError;

/// GCM tag length in bytes.
pub const GCM_TAG_SIZE: usize = 16;
/// GCM nonce length in bytes.
pub const GCM_NONCE_SIZE: usize = 12;

enum GcmInner {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// A keyed AES-GCM instance.
pub struct AesGcm {
    inner: GcmInner,
}

impl AesGcm {
    /// Create an AES-GCM context from a 16- or 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let inner = match key.len() {
            16 => GcmInner::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            )),
            32 => GcmInner::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            )),
            got => {
                return Err(CryptoError::InvalidKeyLength {
                    expected: 16,
                    got,
                })
            }
        };
        Ok(Self { inner })
    }
}

impl Aead for AesGcm {
    fn tag_size(&self) -> usize {
        GCM_TAG_SIZE
    }

    fn nonce_size(&self) -> usize {
        GCM_NONCE_SIZE
    }

    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != GCM_NONCE_SIZE {
            return Err(CryptoError::InvalidIvLength);
        }
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let sealed = match &self.inner {
            GcmInner::Aes128(c) => c.encrypt(nonce, payload),
            GcmInner::Aes256(c) => c.encrypt(nonce, payload),
        };
        sealed.map_err(|_| CryptoError::InvalidArg)
    }

    fn decrypt(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != GCM_NONCE_SIZE {
            return Err(CryptoError::InvalidIvLength);
        }
        if ciphertext.len() < GCM_TAG_SIZE {
            return Err(CryptoError::AeadTagVerifyFail);
        }
        let nonce = Nonce::from_slice(nonce);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let opened = match &self.inner {
            GcmInner::Aes128(c) => c.decrypt(nonce, payload),
            GcmInner::Aes256(c) => c.decrypt(nonce, payload),
        };
        opened.map_err(|_| CryptoError::AeadTagVerifyFail)
    }
}
