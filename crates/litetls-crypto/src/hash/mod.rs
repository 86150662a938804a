//! Unified hash module.
//!
//! Wraps the RustCrypto digest implementations behind the provider
//! [`Digest`] trait. Every wrapper is `Clone`, so the running state can be
//! copied mid-stream (needed by the SSL 3.0 MAC and handshake hashes).

pub use crate::provider::Digest;

use litetls_types::{CryptoError, HashAlgId};
use sha2::Digest as _;

macro_rules! digest_wrapper {
    ($name:ident, $inner:ty, $alg:expr) => {
        #[doc = concat!("Provider wrapper around `", stringify!($inner), "`.")]
        #[derive(Clone, Default)]
        pub struct $name($inner);

        impl $name {
            pub fn new() -> Self {
                Self(<$inner>::new())
            }

            /// One-shot digest.
            pub fn digest(data: &[u8]) -> Vec<u8> {
                <$inner>::digest(data).to_vec()
            }
        }

        impl Digest for $name {
            fn output_size(&self) -> usize {
                $alg.output_size()
            }

            fn block_size(&self) -> usize {
                $alg.block_size()
            }

            fn update(&mut self, data: &[u8]) {
                sha2::Digest::update(&mut self.0, data);
            }

            fn finish(&mut self, out: &mut [u8]) -> Result<(), CryptoError> {
                let size = $alg.output_size();
                if out.len() < size {
                    return Err(CryptoError::InvalidArg);
                }
                let result = self.0.finalize_reset();
                out[..size].copy_from_slice(&result);
                Ok(())
            }

            fn box_clone(&self) -> Box<dyn Digest> {
                Box::new(self.clone())
            }
        }
    };
}

digest_wrapper!(Md5, md5::Md5, HashAlgId::Md5);
digest_wrapper!(Sha1, sha1::Sha1, HashAlgId::Sha1);
digest_wrapper!(Sha256, sha2::Sha256, HashAlgId::Sha256);
digest_wrapper!(Sha384, sha2::Sha384, HashAlgId::Sha384);
digest_wrapper!(Sha512, sha2::Sha512, HashAlgId::Sha512);

/// Create a boxed digest for `alg`.
pub fn new_digest(alg: HashAlgId) -> Box<dyn Digest> {
    match alg {
        HashAlgId::Md5 => Box::new(Md5::new()),
        HashAlgId::Sha1 => Box::new(Sha1::new()),
        HashAlgId::Sha256 => Box::new(Sha256::new()),
        HashAlgId::Sha384 => Box::new(Sha384::new()),
        HashAlgId::Sha512 => Box::new(Sha512::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_sha256_empty() {
        let mut d = new_digest(HashAlgId::Sha256);
        let mut out = vec![0u8; d.output_size()];
        d.finish(&mut out).unwrap();
        assert_eq!(
            to_hex(&out),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_md5_abc() {
        assert_eq!(to_hex(&Md5::digest(b"abc")), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_box_clone_mid_stream() {
        let mut d = new_digest(HashAlgId::Sha1);
        d.update(b"hello ");
        let mut copy = d.box_clone();
        d.update(b"world");
        copy.update(b"world");
        let mut a = vec![0u8; 20];
        let mut b = vec![0u8; 20];
        d.finish(&mut a).unwrap();
        copy.finish(&mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Sha1::digest(b"hello world"));
    }

    #[test]
    fn test_finish_resets_state() {
        let mut d = Sha384::new();
        Digest::update(&mut d, b"abc");
        let mut first = vec![0u8; 48];
        d.finish(&mut first).unwrap();
        Digest::update(&mut d, b"abc");
        let mut second = vec![0u8; 48];
        d.finish(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_finish_short_buffer() {
        let mut d = Sha256::new();
        let mut out = [0u8; 8];
        assert!(d.finish(&mut out).is_err());
    }
}
