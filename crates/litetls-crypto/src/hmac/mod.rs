//! HMAC (RFC 2104) behind the provider [`Mac`] trait.
//!
//! HMAC(K, m) = H((K' XOR opad) || H((K' XOR ipad) || m))
//!
//! The construction itself comes from the `hmac` crate; this module only
//! selects the hash and adapts the interface.

use crate::provider::Mac;
use hmac::Mac as _;
use litetls_types::{CryptoError, HashAlgId};

#[derive(Clone)]
enum HmacInner {
    Md5(hmac::Hmac<md5::Md5>),
    Sha1(hmac::Hmac<sha1::Sha1>),
    Sha256(hmac::Hmac<sha2::Sha256>),
    Sha384(hmac::Hmac<sha2::Sha384>),
    Sha512(hmac::Hmac<sha2::Sha512>),
}

/// Keyed HMAC context.
#[derive(Clone)]
pub struct Hmac {
    alg: HashAlgId,
    inner: HmacInner,
}

impl Hmac {
    /// Create a new HMAC instance keyed with `key`.
    pub fn new(alg: HashAlgId, key: &[u8]) -> Result<Self, CryptoError> {
        let inner = match alg {
            HashAlgId::Md5 => HmacInner::Md5(
                hmac::Hmac::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            HashAlgId::Sha1 => HmacInner::Sha1(
                hmac::Hmac::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            HashAlgId::Sha256 => HmacInner::Sha256(
                hmac::Hmac::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            HashAlgId::Sha384 => HmacInner::Sha384(
                hmac::Hmac::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            HashAlgId::Sha512 => HmacInner::Sha512(
                hmac::Hmac::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
        };
        Ok(Self { alg, inner })
    }

    /// One-shot HMAC computation.
    pub fn mac(alg: HashAlgId, key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut ctx = Self::new(alg, key)?;
        Mac::update(&mut ctx, data);
        let mut out = vec![0u8; alg.output_size()];
        Mac::finish(&mut ctx, &mut out)?;
        Ok(out)
    }
}

impl Mac for Hmac {
    fn output_size(&self) -> usize {
        self.alg.output_size()
    }

    fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HmacInner::Md5(m) => m.update(data),
            HmacInner::Sha1(m) => m.update(data),
            HmacInner::Sha256(m) => m.update(data),
            HmacInner::Sha384(m) => m.update(data),
            HmacInner::Sha512(m) => m.update(data),
        }
    }

    fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
        let size = self.alg.output_size();
        if out.len() < size {
            return Err(CryptoError::InvalidArg);
        }
        let tag = match &mut self.inner {
            HmacInner::Md5(m) => m.finalize_reset().into_bytes().to_vec(),
            HmacInner::Sha1(m) => m.finalize_reset().into_bytes().to_vec(),
            HmacInner::Sha256(m) => m.finalize_reset().into_bytes().to_vec(),
            HmacInner::Sha384(m) => m.finalize_reset().into_bytes().to_vec(),
            HmacInner::Sha512(m) => m.finalize_reset().into_bytes().to_vec(),
        };
        out[..size].copy_from_slice(&tag);
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn Mac> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_hmac_sha256_rfc4231_case1() {
        let key = vec![0x0b; 20];
        let out = Hmac::mac(HashAlgId::Sha256, &key, b"Hi There").unwrap();
        assert_eq!(
            out,
            hex("b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7")
        );
    }

    #[test]
    fn test_hmac_md5_rfc2202_case2() {
        let out = Hmac::mac(HashAlgId::Md5, b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(out, hex("750c783e6ab0b503eaa86e310a5db738"));
    }

    #[test]
    fn test_hmac_reuse_after_finish() {
        let mut ctx = Hmac::new(HashAlgId::Sha1, b"key").unwrap();
        ctx.update(b"data");
        let mut a = [0u8; 20];
        ctx.finish(&mut a).unwrap();
        ctx.update(b"data");
        let mut b = [0u8; 20];
        ctx.finish(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hmac_clone_mid_stream() {
        let mut ctx = Hmac::new(HashAlgId::Sha384, b"k").unwrap();
        ctx.update(b"prefix");
        let mut copy = ctx.box_clone();
        ctx.update(b"-a");
        copy.update(b"-a");
        let mut a = [0u8; 48];
        let mut b = [0u8; 48];
        ctx.finish(&mut a).unwrap();
        copy.finish(&mut b).unwrap();
        assert_eq!(a, b);
    }
}
