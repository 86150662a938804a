//! The default [`CryptoProvider`], backed by the RustCrypto crates.

use std::sync::Arc;

use crate::aes::AesKey;
use crate::hash::new_digest;
use crate::hmac::Hmac;
use crate::modes::gcm::AesGcm;
use crate::provider::{
    Aead, AsymmetricKey, BlockCipher, CryptoProvider, Digest, KeyAgreement, Mac,
};
use litetls_types::{CipherAlgId, CryptoError, EccCurveId, HashAlgId};
use rand::RngCore;

/// Provider that dispatches to the modules of this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoProvider;

impl RustCryptoProvider {
    pub fn new() -> Self {
        Self
    }

    /// Shared handle, the form connections take.
    pub fn shared() -> Arc<dyn CryptoProvider> {
        Arc::new(Self)
    }
}

fn check_key_len(alg: CipherAlgId, key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != alg.key_size() {
        return Err(CryptoError::InvalidKeyLength {
            expected: alg.key_size(),
            got: key.len(),
        });
    }
    Ok(())
}

impl CryptoProvider for RustCryptoProvider {
    fn digest(&self, alg: HashAlgId) -> Result<Box<dyn Digest>, CryptoError> {
        Ok(new_digest(alg))
    }

    fn hmac(&self, alg: HashAlgId, key: &[u8]) -> Result<Box<dyn Mac>, CryptoError> {
        Ok(Box::new(Hmac::new(alg, key)?))
    }

    fn block_cipher(
        &self,
        alg: CipherAlgId,
        key: &[u8],
    ) -> Result<Box<dyn BlockCipher>, CryptoError> {
        if alg.is_aead() {
            return Err(CryptoError::NotSupported);
        }
        check_key_len(alg, key)?;
        Ok(Box::new(AesKey::new(key)?))
    }

    fn aead(&self, alg: CipherAlgId, key: &[u8]) -> Result<Box<dyn Aead>, CryptoError> {
        if !alg.is_aead() {
            return Err(CryptoError::NotSupported);
        }
        check_key_len(alg, key)?;
        Ok(Box::new(AesGcm::new(key)?))
    }

    fn generate_key_agreement(
        &self,
        curve: EccCurveId,
    ) -> Result<Box<dyn KeyAgreement>, CryptoError> {
        Ok(crate::ecdh::generate(curve))
    }

    fn public_key_from_certificate(
        &self,
        der: &[u8],
    ) -> Result<Arc<dyn AsymmetricKey>, CryptoError> {
        crate::x509::public_key_from_der(der)
    }

    fn fill_random(&self, buf: &mut [u8]) -> Result<(), CryptoError> {
        rand::rngs::OsRng
            .try_fill_bytes(buf)
            .map_err(|_| CryptoError::RandFail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_rejects_mismatched_cipher() {
        let p = RustCryptoProvider::new();
        assert!(p.block_cipher(CipherAlgId::Aes128Gcm, &[0u8; 16]).is_err());
        assert!(p.aead(CipherAlgId::Aes128Cbc, &[0u8; 16]).is_err());
        assert!(p.block_cipher(CipherAlgId::Aes256Cbc, &[0u8; 16]).is_err());
        assert!(p.block_cipher(CipherAlgId::Aes256Cbc, &[0u8; 32]).is_ok());
    }

    #[test]
    fn test_provider_random_differs() {
        let p = RustCryptoProvider::shared();
        let a = p.random_vec(32).unwrap();
        let b = p.random_vec(32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_provider_hash_helpers() {
        let p = RustCryptoProvider::new();
        let h = p.hash(HashAlgId::Sha1, b"abc").unwrap();
        assert_eq!(h[..4], [0xa9, 0x99, 0x3e, 0x36]);
        let m = p.hmac_once(HashAlgId::Sha256, b"k", b"m").unwrap();
        assert_eq!(m.len(), 32);
    }
}
