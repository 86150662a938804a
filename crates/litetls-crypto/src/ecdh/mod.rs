//! Ephemeral ECDH key agreement over P-256 (SEC1 uncompressed points) and
//! X25519 (RFC 7748), behind the provider [`KeyAgreement`] trait.

use crate::provider::KeyAgreement;
use litetls_types::{CryptoError, EccCurveId};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

/// Length of an uncompressed P-256 point.
pub const P256_POINT_SIZE: usize = 65;
/// Length of an X25519 public value.
pub const X25519_KEY_SIZE: usize = 32;

/// A P-256 ephemeral key pair.
pub struct P256KeyPair {
    secret: p256::ecdh::EphemeralSecret,
    public: Vec<u8>,
}

impl P256KeyPair {
    pub fn generate() -> Self {
        let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
        let public = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self { secret, public }
    }
}

impl KeyAgreement for P256KeyPair {
    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn compute_shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        // Only uncompressed points are negotiated (ec_point_formats).
        if peer_public_key.len() != P256_POINT_SIZE || peer_public_key[0] != 0x04 {
            return Err(CryptoError::EccInvalidPublicKey);
        }
        let peer = p256::PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::EccInvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

/// An X25519 ephemeral key pair.
pub struct X25519KeyPair {
    secret: x25519_dalek::StaticSecret,
    public: [u8; X25519_KEY_SIZE],
}

impl X25519KeyPair {
    pub fn generate() -> Self {
        let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }
}

impl KeyAgreement for X25519KeyPair {
    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn compute_shared_secret(&self, peer_public_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let peer: [u8; X25519_KEY_SIZE] = peer_public_key
            .try_into()
            .map_err(|_| CryptoError::EccInvalidPublicKey)?;
        let shared = self
            .secret
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(shared.as_bytes().to_vec())
    }
}

/// Generate an ephemeral key pair on `curve`.
pub fn generate(curve: EccCurveId) -> Box<dyn KeyAgreement> {
    match curve {
        EccCurveId::NistP256 => Box::new(P256KeyPair::generate()),
        EccCurveId::X25519 => Box::new(X25519KeyPair::generate()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p256_agreement() {
        let a = generate(EccCurveId::NistP256);
        let b = generate(EccCurveId::NistP256);
        assert_eq!(a.public_key().len(), P256_POINT_SIZE);
        assert_eq!(a.public_key()[0], 0x04);
        let s1 = a.compute_shared_secret(b.public_key()).unwrap();
        let s2 = b.compute_shared_secret(a.public_key()).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 32);
    }

    #[test]
    fn test_p256_rejects_off_curve_point() {
        let a = generate(EccCurveId::NistP256);
        let mut bad = vec![0x04u8];
        bad.extend_from_slice(&[0x01; 64]);
        assert!(a.compute_shared_secret(&bad).is_err());
        assert!(a.compute_shared_secret(&[0x04; 10]).is_err());
    }

    #[test]
    fn test_x25519_agreement() {
        let a = generate(EccCurveId::X25519);
        let b = generate(EccCurveId::X25519);
        let s1 = a.compute_shared_secret(b.public_key()).unwrap();
        let s2 = b.compute_shared_secret(a.public_key()).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_x25519_rejects_low_order_point() {
        let a = generate(EccCurveId::X25519);
        assert!(matches!(
            a.compute_shared_secret(&[0u8; 32]),
            Err(CryptoError::NonContributory)
        ));
        assert!(a.compute_shared_secret(&[9u8; 31]).is_err());
    }
}
