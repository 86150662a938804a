//! RSA signatures over ServerKeyExchange parameters and CertificateVerify.
//!
//! TLS 1.2 signs a single hash with a DigestInfo prefix and names the
//! scheme on the wire. Earlier versions sign MD5 || SHA-1 (36 bytes)
//! without a prefix. SSL 3.0 CertificateVerify uses its own MAC-like
//! handshake hash.

use std::sync::Arc;

use crate::crypt::transcript::HandshakeTranscript;
use crate::crypt::SignatureScheme;
use crate::handshake::codec::DigitallySigned;
use crate::TlsVersion;
use litetls_crypto::{AsymmetricKey, CryptoProvider};
use litetls_types::{AlertDescription, HashAlgId, TlsError};

/// Choose the TLS 1.2 signature scheme: the first of our hashes that the
/// peer listed. A peer that sent no list implicitly offers SHA-1
/// (RFC 5246 §7.4.1.4.1).
pub fn select_scheme(
    ours: &[HashAlgId],
    peer: Option<&[SignatureScheme]>,
) -> Result<SignatureScheme, TlsError> {
    let offered = |scheme: SignatureScheme| match peer {
        Some(list) => list.contains(&scheme),
        None => scheme == SignatureScheme::RSA_PKCS1_SHA1,
    };
    ours.iter()
        .filter_map(|h| SignatureScheme::rsa_pkcs1(*h))
        .find(|s| offered(*s))
        .ok_or_else(|| {
            TlsError::alert(
                AlertDescription::HandshakeFailure,
                "no common RSA signature algorithm",
            )
        })
}

/// Schemes we accept, as sent in signature_algorithms.
pub fn offered_schemes(hashes: &[HashAlgId]) -> Vec<SignatureScheme> {
    hashes
        .iter()
        .filter_map(|h| SignatureScheme::rsa_pkcs1(*h))
        .collect()
}

fn md5_sha1(provider: &dyn CryptoProvider, data: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut out = provider.hash(HashAlgId::Md5, data)?;
    out.extend_from_slice(&provider.hash(HashAlgId::Sha1, data)?);
    Ok(out)
}

fn signed_params(client_random: &[u8; 32], server_random: &[u8; 32], params: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(64 + params.len());
    data.extend_from_slice(client_random);
    data.extend_from_slice(server_random);
    data.extend_from_slice(params);
    data
}

/// Sign `client_random || server_random || params`.
pub fn sign_server_params(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    scheme: Option<SignatureScheme>,
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    params: &[u8],
) -> Result<DigitallySigned, TlsError> {
    let data = signed_params(client_random, server_random, params);
    sign(provider, key, scheme, &data)
}

/// Verify a ServerKeyExchange signature.
///
/// At TLS 1.2 the scheme must be one we offered (`illegal_parameter`
/// otherwise); a bad signature is `decrypt_error`.
#[allow(clippy::too_many_arguments)]
pub fn verify_server_params(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    version: TlsVersion,
    accepted: &[HashAlgId],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    params: &[u8],
    signed: &DigitallySigned,
) -> Result<(), TlsError> {
    let data = signed_params(client_random, server_random, params);
    verify(provider, key, version, accepted, &data, signed)
}

fn sign(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    scheme: Option<SignatureScheme>,
    data: &[u8],
) -> Result<DigitallySigned, TlsError> {
    let signature = match scheme {
        Some(scheme) => {
            let hash = scheme_hash(scheme)?;
            key.sign(&provider.hash(hash, data)?, Some(hash))?
        }
        None => key.sign(&md5_sha1(provider, data)?, None)?,
    };
    Ok(DigitallySigned { scheme, signature })
}

fn verify(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    version: TlsVersion,
    accepted: &[HashAlgId],
    data: &[u8],
    signed: &DigitallySigned,
) -> Result<(), TlsError> {
    let ok = match (version >= TlsVersion::Tls12, signed.scheme) {
        (true, Some(scheme)) => {
            let hash = scheme_hash(scheme)?;
            if !accepted.contains(&hash) {
                return Err(TlsError::alert(
                    AlertDescription::IllegalParameter,
                    format!("signature scheme 0x{:04x} was not offered", scheme.0),
                ));
            }
            key.verify(&provider.hash(hash, data)?, &signed.signature, Some(hash))?
        }
        (false, None) => key.verify(&md5_sha1(provider, data)?, &signed.signature, None)?,
        _ => {
            return Err(TlsError::alert(
                AlertDescription::InternalError,
                "signature layout does not match the version",
            ))
        }
    };
    if ok {
        Ok(())
    } else {
        Err(TlsError::alert(
            AlertDescription::DecryptError,
            "signature verification failed",
        ))
    }
}

fn scheme_hash(scheme: SignatureScheme) -> Result<HashAlgId, TlsError> {
    scheme.rsa_hash().ok_or_else(|| {
        TlsError::alert(
            AlertDescription::IllegalParameter,
            format!("unsupported signature scheme 0x{:04x}", scheme.0),
        )
    })
}

/// The value a CertificateVerify signs, for the versions without a
/// scheme: MD5 || SHA-1 of the transcript (TLS 1.0/1.1) or the SSL 3.0
/// handshake hash.
fn legacy_verify_digest(
    provider: &dyn CryptoProvider,
    version: TlsVersion,
    transcript: &HandshakeTranscript,
    master_secret: &[u8],
) -> Result<Vec<u8>, TlsError> {
    if version == TlsVersion::Ssl30 {
        transcript.ssl3_hash(provider, master_secret, None)
    } else {
        transcript.md5_sha1(provider)
    }
}

/// Sign a CertificateVerify over the transcript so far.
pub fn sign_certificate_verify(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    version: TlsVersion,
    scheme: Option<SignatureScheme>,
    transcript: &HandshakeTranscript,
    master_secret: &[u8],
) -> Result<DigitallySigned, TlsError> {
    let signature = match scheme {
        Some(scheme) => {
            let hash = scheme_hash(scheme)?;
            key.sign(&transcript.hash(provider, hash)?, Some(hash))?
        }
        None => key.sign(
            &legacy_verify_digest(provider, version, transcript, master_secret)?,
            None,
        )?,
    };
    Ok(DigitallySigned { scheme, signature })
}

/// Verify a client's CertificateVerify.
#[allow(clippy::too_many_arguments)]
pub fn verify_certificate_verify(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    version: TlsVersion,
    accepted: &[HashAlgId],
    transcript: &HandshakeTranscript,
    master_secret: &[u8],
    signed: &DigitallySigned,
) -> Result<(), TlsError> {
    let ok = match signed.scheme {
        Some(scheme) => {
            let hash = scheme_hash(scheme)?;
            if !accepted.contains(&hash) {
                return Err(TlsError::alert(
                    AlertDescription::IllegalParameter,
                    format!("signature scheme 0x{:04x} was not offered", scheme.0),
                ));
            }
            key.verify(&transcript.hash(provider, hash)?, &signed.signature, Some(hash))?
        }
        None => key.verify(
            &legacy_verify_digest(provider, version, transcript, master_secret)?,
            &signed.signature,
            None,
        )?,
    };
    if ok {
        Ok(())
    } else {
        Err(TlsError::alert(
            AlertDescription::DecryptError,
            "CertificateVerify signature mismatch",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litetls_crypto::rsa::RsaKey;
    use litetls_crypto::RustCryptoProvider;

    fn key() -> Arc<dyn AsymmetricKey> {
        Arc::new(RsaKey::generate(1024).unwrap())
    }

    #[test]
    fn test_select_scheme() {
        let ours = [HashAlgId::Sha256, HashAlgId::Sha1];
        let peer = [SignatureScheme::RSA_PKCS1_SHA1, SignatureScheme::RSA_PKCS1_SHA256];
        assert_eq!(
            select_scheme(&ours, Some(&peer)).unwrap(),
            SignatureScheme::RSA_PKCS1_SHA256
        );
        assert_eq!(
            select_scheme(&ours, None).unwrap(),
            SignatureScheme::RSA_PKCS1_SHA1
        );
        let err = select_scheme(&[HashAlgId::Sha384], Some(&peer)).unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::HandshakeFailure));
    }

    #[test]
    fn test_server_params_tls12() {
        let p = RustCryptoProvider::new();
        let k = key();
        let cr = [1u8; 32];
        let sr = [2u8; 32];
        let signed = sign_server_params(
            &p,
            &k,
            Some(SignatureScheme::RSA_PKCS1_SHA256),
            &cr,
            &sr,
            b"params",
        )
        .unwrap();
        let accepted = [HashAlgId::Sha256];
        verify_server_params(&p, &k, TlsVersion::Tls12, &accepted, &cr, &sr, b"params", &signed)
            .unwrap();

        let err = verify_server_params(
            &p, &k, TlsVersion::Tls12, &accepted, &cr, &sr, b"paramz", &signed,
        )
        .unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::DecryptError));

        let err = verify_server_params(
            &p,
            &k,
            TlsVersion::Tls12,
            &[HashAlgId::Sha1],
            &cr,
            &sr,
            b"params",
            &signed,
        )
        .unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::IllegalParameter));
    }

    #[test]
    fn test_server_params_legacy() {
        let p = RustCryptoProvider::new();
        let k = key();
        let cr = [7u8; 32];
        let sr = [8u8; 32];
        let signed = sign_server_params(&p, &k, None, &cr, &sr, b"dh").unwrap();
        assert!(signed.scheme.is_none());
        verify_server_params(&p, &k, TlsVersion::Tls10, &[], &cr, &sr, b"dh", &signed).unwrap();
        let err =
            verify_server_params(&p, &k, TlsVersion::Tls10, &[], &sr, &cr, b"dh", &signed)
                .unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::DecryptError));
    }

    #[test]
    fn test_certificate_verify_all_versions() {
        let p = RustCryptoProvider::new();
        let k = key();
        let mut transcript = HandshakeTranscript::new();
        transcript.update(b"client hello ... client key exchange");
        let ms = [9u8; 48];
        for (version, scheme) in [
            (TlsVersion::Ssl30, None),
            (TlsVersion::Tls10, None),
            (TlsVersion::Tls11, None),
            (TlsVersion::Tls12, Some(SignatureScheme::RSA_PKCS1_SHA384)),
        ] {
            let signed =
                sign_certificate_verify(&p, &k, version, scheme, &transcript, &ms).unwrap();
            verify_certificate_verify(
                &p,
                &k,
                version,
                &[HashAlgId::Sha384],
                &transcript,
                &ms,
                &signed,
            )
            .unwrap();
        }

        let signed = sign_certificate_verify(&p, &k, TlsVersion::Ssl30, None, &transcript, &ms)
            .unwrap();
        let err = verify_certificate_verify(
            &p,
            &k,
            TlsVersion::Ssl30,
            &[],
            &transcript,
            &[0u8; 48],
            &signed,
        )
        .unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::DecryptError));
    }
}
