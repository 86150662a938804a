//! Trait-based provider mechanism for cryptographic capabilities.
//!
//! The TLS core never names a concrete primitive. It asks a
//! [`CryptoProvider`] (injected into each connection) for keyed contexts
//! implementing the small traits below, so the choice of backend is an
//! explicit configuration concern rather than a global.

use std::sync::Arc;

use litetls_types::{CipherAlgId, CryptoError, EccCurveId, HashAlgId};

/// A hash / message digest algorithm.
pub trait Digest: Send + Sync {
    /// The output size in bytes.
    fn output_size(&self) -> usize;

    /// The internal block size in bytes.
    fn block_size(&self) -> usize;

    /// Feed data into the hash state.
    fn update(&mut self, data: &[u8]);

    /// Finalize the hash into `out` and reset the state.
    /// The length of `out` must be at least `output_size()`.
    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError>;

    /// Copy the running state, so a digest can be taken mid-stream.
    fn box_clone(&self) -> Box<dyn Digest>;
}

/// A keyed Message Authentication Code (HMAC).
pub trait Mac: Send + Sync {
    /// The output size of the MAC in bytes.
    fn output_size(&self) -> usize;

    /// Feed data into the MAC computation.
    fn update(&mut self, data: &[u8]);

    /// Finalize into `out` and reset for reuse with the same key.
    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError>;

    /// Copy the running state.
    fn box_clone(&self) -> Box<dyn Mac>;
}

/// A keyed block cipher (raw single-block operations; chaining is done by
/// the caller).
pub trait BlockCipher: Send + Sync {
    /// Block size in bytes.
    fn block_size(&self) -> usize;

    /// Key size in bytes.
    fn key_size(&self) -> usize;

    /// Encrypt a single block in-place.
    fn encrypt_block(&self, block: &mut [u8]) -> Result<(), CryptoError>;

    /// Decrypt a single block in-place.
    fn decrypt_block(&self, block: &mut [u8]) -> Result<(), CryptoError>;
}

/// A keyed Authenticated Encryption with Associated Data algorithm.
pub trait Aead: Send + Sync {
    /// The length of the authentication tag in bytes.
    fn tag_size(&self) -> usize;

    /// The expected nonce size in bytes.
    fn nonce_size(&self) -> usize;

    /// Seal: returns ciphertext || tag.
    fn encrypt(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Open: `ciphertext` includes the appended tag.
    fn decrypt(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// An ephemeral key agreement (ECDH) key pair.
pub trait KeyAgreement: Send + Sync {
    /// Encoded public value to send to the peer.
    fn public_key(&self) -> &[u8];

    /// Compute the shared secret from the peer's public value.
    ///
    /// Implementations must reject peer values that are off the curve or
    /// that yield a non-contributory secret.
    fn compute_shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// A long-term asymmetric key (RSA in this crate).
pub trait AsymmetricKey: Send + Sync {
    /// Modulus length in bits.
    fn bit_len(&self) -> usize;

    /// Whether private operations are available.
    fn has_private(&self) -> bool;

    /// PKCS#1 v1.5 signature over an already computed digest.
    ///
    /// With `hash = None` the digest is signed without a DigestInfo
    /// prefix (the MD5||SHA-1 construction used before TLS 1.2).
    fn sign(&self, digest: &[u8], hash: Option<HashAlgId>) -> Result<Vec<u8>, CryptoError>;

    /// Verify a PKCS#1 v1.5 signature over a digest.
    fn verify(
        &self,
        digest: &[u8],
        signature: &[u8],
        hash: Option<HashAlgId>,
    ) -> Result<bool, CryptoError>;

    /// PKCS#1 v1.5 encryption.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// PKCS#1 v1.5 decryption. Returns `Ok(None)` when the padding is
    /// invalid, so callers can react without distinguishing error kinds.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Option<Vec<u8>>, CryptoError>;
}

/// A bundle of cryptographic capabilities handed to every connection.
pub trait CryptoProvider: Send + Sync {
    /// Create a fresh digest context.
    fn digest(&self, alg: HashAlgId) -> Result<Box<dyn Digest>, CryptoError>;

    /// Create an HMAC context keyed with `key`.
    fn hmac(&self, alg: HashAlgId, key: &[u8]) -> Result<Box<dyn Mac>, CryptoError>;

    /// Create a keyed block cipher for a CBC cipher id.
    fn block_cipher(&self, alg: CipherAlgId, key: &[u8]) -> Result<Box<dyn BlockCipher>, CryptoError>;

    /// Create a keyed AEAD for a GCM cipher id.
    fn aead(&self, alg: CipherAlgId, key: &[u8]) -> Result<Box<dyn Aead>, CryptoError>;

    /// Generate an ephemeral key pair on `curve`.
    fn generate_key_agreement(&self, curve: EccCurveId) -> Result<Box<dyn KeyAgreement>, CryptoError>;

    /// Extract the subject public key of a DER-encoded certificate.
    fn public_key_from_certificate(&self, der: &[u8]) -> Result<Arc<dyn AsymmetricKey>, CryptoError>;

    /// Fill `buf` with cryptographically secure random bytes.
    fn fill_random(&self, buf: &mut [u8]) -> Result<(), CryptoError>;

    /// One-shot digest helper.
    fn hash(&self, alg: HashAlgId, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut ctx = self.digest(alg)?;
        ctx.update(data);
        let mut out = vec![0u8; ctx.output_size()];
        ctx.finish(&mut out)?;
        Ok(out)
    }

    /// One-shot HMAC helper.
    fn hmac_once(&self, alg: HashAlgId, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut ctx = self.hmac(alg, key)?;
        ctx.update(data);
        let mut out = vec![0u8; ctx.output_size()];
        ctx.finish(&mut out)?;
        Ok(out)
    }

    /// Random bytes as a fresh vector.
    fn random_vec(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut out = vec![0u8; len];
        self.fill_random(&mut out)?;
        Ok(out)
    }
}
