/// Hash algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgId {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgId {
    /// Digest output size in bytes.
    pub fn output_size(self) -> usize {
        match self {
            HashAlgId::Md5 => 16,
            HashAlgId::Sha1 => 20,
            HashAlgId::Sha256 => 32,
            HashAlgId::Sha384 => 48,
            HashAlgId::Sha512 => 64,
        }
    }

    /// Internal block size in bytes.
    pub fn block_size(self) -> usize {
        match self {
            HashAlgId::Md5 | HashAlgId::Sha1 | HashAlgId::Sha256 => 64,
            HashAlgId::Sha384 | HashAlgId::Sha512 => 128,
        }
    }
}

/// Symmetric cipher algorithm identifiers (algorithm + mode combination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgId {
    Aes128Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
}

impl CipherAlgId {
    /// Key size in bytes.
    pub fn key_size(self) -> usize {
        match self {
            CipherAlgId::Aes128Cbc | CipherAlgId::Aes128Gcm => 16,
            CipherAlgId::Aes256Cbc | CipherAlgId::Aes256Gcm => 32,
        }
    }

    /// Whether this is an AEAD mode.
    pub fn is_aead(self) -> bool {
        matches!(self, CipherAlgId::Aes128Gcm | CipherAlgId::Aes256Gcm)
    }
}

/// Elliptic curve identifiers usable for ephemeral key agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EccCurveId {
    NistP256,
    X25519,
}
