//! Certificate chains.
//!
//! Chains are kept as a list of DER blobs in wire order (end-entity first).
//! Parsing goes only as far as the subject public key; path validation and
//! trust decisions belong to the caller.

use std::sync::Arc;

use crate::provider::AsymmetricKey;
use crate::rsa::RsaKey;
use litetls_types::CryptoError;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

/// An ordered X.509 certificate chain, end-entity first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateChain {
    certs: Vec<Vec<u8>>,
}

impl CertificateChain {
    /// Build a chain from DER certificates. Each entry must parse.
    pub fn from_der(certs: Vec<Vec<u8>>) -> Result<Self, CryptoError> {
        for der in &certs {
            Certificate::from_der(der)
                .map_err(|e| CryptoError::Decode(format!("certificate: {e}")))?;
        }
        Ok(Self { certs })
    }

    /// Parse a PEM bundle (one or more `CERTIFICATE` blocks).
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let parsed = Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| CryptoError::Decode(format!("certificate pem: {e}")))?;
        if parsed.is_empty() {
            return Err(CryptoError::Decode("no certificate in pem input".into()));
        }
        let certs = parsed
            .iter()
            .map(|c| c.to_der())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CryptoError::Decode(format!("certificate: {e}")))?;
        Ok(Self { certs })
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// DER certificates in wire order.
    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs
    }

    /// The end-entity certificate.
    pub fn end_entity(&self) -> Option<&[u8]> {
        self.certs.first().map(Vec::as_slice)
    }

    /// The end-entity subject public key.
    pub fn end_entity_public_key(&self) -> Result<Arc<dyn AsymmetricKey>, CryptoError> {
        let der = self
            .end_entity()
            .ok_or_else(|| CryptoError::Decode("empty certificate chain".into()))?;
        public_key_from_der(der)
    }
}

/// Encoded `SubjectPublicKeyInfo` of a DER certificate.
pub fn subject_public_key_info(der: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cert =
        Certificate::from_der(der).map_err(|e| CryptoError::Decode(format!("certificate: {e}")))?;
    cert.tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| CryptoError::Decode(format!("subject public key info: {e}")))
}

/// Extract the (RSA) subject public key of a DER certificate.
pub fn public_key_from_der(der: &[u8]) -> Result<Arc<dyn AsymmetricKey>, CryptoError> {
    let spki = subject_public_key_info(der)?;
    Ok(Arc::new(RsaKey::from_public_key_der(&spki)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_CERT: &str = include_str!("../../tests/data/server.crt.pem");
    const SERVER_KEY: &str = include_str!("../../tests/data/server.key.pem");

    #[test]
    fn test_chain_from_pem() {
        let chain = CertificateChain::from_pem(SERVER_CERT).unwrap();
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_empty());
        let again = CertificateChain::from_der(chain.certs().to_vec()).unwrap();
        assert_eq!(chain, again);
    }

    #[test]
    fn test_end_entity_key_matches_private_key() {
        let chain = CertificateChain::from_pem(SERVER_CERT).unwrap();
        let public = chain.end_entity_public_key().unwrap();
        assert_eq!(public.bit_len(), 2048);
        assert!(!public.has_private());

        let private = RsaKey::from_pem(SERVER_KEY).unwrap();
        let digest = crate::hash::Sha256::digest(b"pin me");
        let sig = private
            .sign(&digest, Some(litetls_types::HashAlgId::Sha256))
            .unwrap();
        assert!(public
            .verify(&digest, &sig, Some(litetls_types::HashAlgId::Sha256))
            .unwrap());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(CertificateChain::from_der(vec![vec![0x30, 0x01, 0x00]]).is_err());
        assert!(CertificateChain::from_pem("not a certificate").is_err());
        assert!(CertificateChain::default().end_entity_public_key().is_err());
    }
}
