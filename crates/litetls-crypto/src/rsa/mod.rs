//! RSA keys (PKCS#1 v1.5 signatures and encryption) behind the provider
//! [`AsymmetricKey`] trait.
//!
//! Private-key decryption always runs blinded. A padding failure is reported
//! as `Ok(None)` rather than an error so the TLS layer can substitute a
//! random premaster secret without a distinguishable code path.

use crate::provider::AsymmetricKey;
use litetls_types::{CryptoError, HashAlgId};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign};

/// An RSA public key with an optional private half.
#[derive(Clone)]
pub struct RsaKey {
    public: rsa::RsaPublicKey,
    private: Option<rsa::RsaPrivateKey>,
}

impl std::fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKey")
            .field("bits", &self.bit_len())
            .field("has_private", &self.private.is_some())
            .finish()
    }
}

impl RsaKey {
    /// Wrap an existing private key.
    pub fn from_private(private: rsa::RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    /// Parse a PEM private key, either PKCS#8 (`PRIVATE KEY`) or PKCS#1
    /// (`RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = rsa::RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::Decode(format!("rsa private key: {e}")))?;
        Ok(Self::from_private(private))
    }

    /// Parse a DER private key (PKCS#8 or PKCS#1).
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let private = rsa::RsaPrivateKey::from_pkcs8_der(der)
            .or_else(|_| rsa::RsaPrivateKey::from_pkcs1_der(der))
            .map_err(|e| CryptoError::Decode(format!("rsa private key: {e}")))?;
        Ok(Self::from_private(private))
    }

    /// Parse a DER `SubjectPublicKeyInfo`.
    pub fn from_public_key_der(der: &[u8]) -> Result<Self, CryptoError> {
        let public = rsa::RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::Decode(format!("rsa public key: {e}")))?;
        Ok(Self {
            public,
            private: None,
        })
    }

    /// Generate a fresh key pair.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private =
            rsa::RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| CryptoError::Rsa(e.to_string()))?;
        Ok(Self::from_private(private))
    }

    /// The public half only.
    pub fn public_key(&self) -> RsaKey {
        Self {
            public: self.public.clone(),
            private: None,
        }
    }

    fn private(&self) -> Result<&rsa::RsaPrivateKey, CryptoError> {
        self.private.as_ref().ok_or(CryptoError::RsaNoPrivateKey)
    }
}

fn sign_scheme(hash: Option<HashAlgId>) -> Result<Pkcs1v15Sign, CryptoError> {
    Ok(match hash {
        None => Pkcs1v15Sign::new_unprefixed(),
        Some(HashAlgId::Sha1) => Pkcs1v15Sign::new::<sha1::Sha1>(),
        Some(HashAlgId::Sha256) => Pkcs1v15Sign::new::<sha2::Sha256>(),
        Some(HashAlgId::Sha384) => Pkcs1v15Sign::new::<sha2::Sha384>(),
        Some(HashAlgId::Sha512) => Pkcs1v15Sign::new::<sha2::Sha512>(),
        Some(HashAlgId::Md5) => return Err(CryptoError::NotSupported),
    })
}

impl AsymmetricKey for RsaKey {
    fn bit_len(&self) -> usize {
        self.public.size() * 8
    }

    fn has_private(&self) -> bool {
        self.private.is_some()
    }

    fn sign(&self, digest: &[u8], hash: Option<HashAlgId>) -> Result<Vec<u8>, CryptoError> {
        let scheme = sign_scheme(hash)?;
        self.private()?
            .sign(scheme, digest)
            .map_err(|e| CryptoError::Rsa(e.to_string()))
    }

    fn verify(
        &self,
        digest: &[u8],
        signature: &[u8],
        hash: Option<HashAlgId>,
    ) -> Result<bool, CryptoError> {
        let scheme = sign_scheme(hash)?;
        Ok(self.public.verify(scheme, digest, signature).is_ok())
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::Rsa(e.to_string()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Option<Vec<u8>>, CryptoError> {
        let private = self.private()?;
        Ok(private
            .decrypt_blinded(&mut OsRng, Pkcs1v15Encrypt, ciphertext)
            .ok())
    }
}
