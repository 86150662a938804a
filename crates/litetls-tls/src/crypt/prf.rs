//! Version-dependent pseudo-random functions.
//!
//! ```text
//! TLS 1.2:      PRF(secret, label, seed) = P_<hash>(secret, label + seed)
//! TLS 1.0/1.1:  PRF(secret, label, seed) = P_MD5(S1, label + seed) XOR
//!                                          P_SHA-1(S2, label + seed)
//! SSL 3.0:      MD5(secret + SHA1("A" + secret + seed)) +
//!               MD5(secret + SHA1("BB" + secret + seed)) + ...
//!
//! P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) ||
//!                        HMAC_hash(secret, A(2) + seed) || ...
//! A(0) = seed
//! A(i) = HMAC_hash(secret, A(i-1))
//! ```

use crate::TlsVersion;
use litetls_crypto::CryptoProvider;
use litetls_types::{HashAlgId, TlsError};

/// The PRF in effect for a negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prf {
    Ssl3,
    Tls10,
    Tls12(HashAlgId),
}

impl Prf {
    /// Select the PRF for `version`; `tls12_hash` is the suite PRF hash.
    pub fn for_version(version: TlsVersion, tls12_hash: HashAlgId) -> Self {
        match version {
            TlsVersion::Ssl30 => Prf::Ssl3,
            TlsVersion::Tls10 | TlsVersion::Tls11 => Prf::Tls10,
            TlsVersion::Tls12 => Prf::Tls12(tls12_hash),
        }
    }

    /// Derive `output_len` bytes. The SSL 3.0 construction has no label.
    pub fn derive(
        self,
        provider: &dyn CryptoProvider,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        output_len: usize,
    ) -> Result<Vec<u8>, TlsError> {
        match self {
            Prf::Ssl3 => ssl3_prf(provider, secret, seed, output_len),
            Prf::Tls10 => tls10_prf(provider, secret, label, seed, output_len),
            Prf::Tls12(hash) => tls12_prf(provider, hash, secret, label, seed, output_len),
        }
    }
}

/// TLS 1.2 PRF: P_hash over `label + seed`.
pub fn tls12_prf(
    provider: &dyn CryptoProvider,
    hash: HashAlgId,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);
    p_hash(provider, hash, secret, &label_seed, output_len)
}

/// TLS 1.0/1.1 PRF. The secret is split into two halves that overlap by
/// one byte when its length is odd.
pub fn tls10_prf(
    provider: &dyn CryptoProvider,
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label.as_bytes());
    label_seed.extend_from_slice(seed);

    let half = secret.len().div_ceil(2);
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut out = p_hash(provider, HashAlgId::Md5, s1, &label_seed, output_len)?;
    let sha = p_hash(provider, HashAlgId::Sha1, s2, &label_seed, output_len)?;
    for (o, s) in out.iter_mut().zip(sha.iter()) {
        *o ^= s;
    }
    Ok(out)
}

/// SSL 3.0 key derivation (RFC 6101 §6.1 / §6.2.2).
pub fn ssl3_prf(
    provider: &dyn CryptoProvider,
    secret: &[u8],
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut out = Vec::with_capacity(output_len + 16);
    let mut round: u8 = 0;
    while out.len() < output_len {
        // "A", "BB", "CCC", ... 26 rounds cover 416 bytes.
        if round >= 26 {
            return Err(TlsError::InvalidConfig("ssl3 prf output too long".into()));
        }
        let label = vec![b'A' + round; round as usize + 1];

        let mut sha = provider.digest(HashAlgId::Sha1)?;
        sha.update(&label);
        sha.update(secret);
        sha.update(seed);
        let mut inner = [0u8; 20];
        sha.finish(&mut inner)?;

        let mut md5 = provider.digest(HashAlgId::Md5)?;
        md5.update(secret);
        md5.update(&inner);
        let mut block = [0u8; 16];
        md5.finish(&mut block)?;

        out.extend_from_slice(&block);
        round += 1;
    }
    out.truncate(output_len);
    Ok(out)
}

/// P_hash expansion function (RFC 5246 §5).
fn p_hash(
    provider: &dyn CryptoProvider,
    hash: HashAlgId,
    secret: &[u8],
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut mac = provider.hmac(hash, secret)?;
    let size = mac.output_size();
    let mut result = Vec::with_capacity(output_len + size);

    // A(0) = seed
    let mut a = seed.to_vec();
    let mut block = vec![0u8; size];

    while result.len() < output_len {
        // A(i) = HMAC_hash(secret, A(i-1))
        mac.update(&a);
        a.resize(size, 0);
        mac.finish(&mut a)?;

        // HMAC_hash(secret, A(i) + seed)
        mac.update(&a);
        mac.update(seed);
        mac.finish(&mut block)?;

        result.extend_from_slice(&block);
    }

    result.truncate(output_len);
    Ok(result)
}
