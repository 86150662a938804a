#![doc = "Cryptographic capabilities for litetls: provider traits and the default RustCrypto-backed provider."]
#![forbid(unsafe_code)]

// Core traits
pub mod provider;

// Hash and MAC
pub mod hash;
pub mod hmac;

// Symmetric ciphers and modes
pub mod aes;
pub mod modes;

// Asymmetric algorithms
pub mod ecdh;
pub mod rsa;

// Certificates
pub mod x509;

mod default_provider;

pub use default_provider::RustCryptoProvider;
pub use provider::{
    Aead, AsymmetricKey, BlockCipher, CryptoProvider, Digest, KeyAgreement, Mac,
};
pub use x509::CertificateChain;
