//! Cipher suite parameters and the key schedule.
//!
//! Bridges negotiated identifiers with the primitives reached through the
//! injected `CryptoProvider`.

pub mod key_schedule;
pub mod keylog;
pub mod prf;
pub mod transcript;

use crate::{CipherSuite, TlsVersion};
use litetls_types::{CipherAlgId, EccCurveId, HashAlgId};

/// Key exchange family of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeAlg {
    /// Client encrypts the premaster secret under the server's RSA key.
    Rsa,
    /// Ephemeral finite-field DH signed with the server's RSA key.
    DheRsa,
    /// Ephemeral ECDH signed with the server's RSA key.
    EcdheRsa,
    /// SRP, password only (RFC 5054).
    Srp,
    /// SRP with the server parameters signed by an RSA key.
    SrpRsa,
    /// Unauthenticated ephemeral DH.
    DhAnon,
    /// Unauthenticated ephemeral ECDH.
    EcdhAnon,
}

impl KeyExchangeAlg {
    pub const ALL: [KeyExchangeAlg; 7] = [
        KeyExchangeAlg::Rsa,
        KeyExchangeAlg::DheRsa,
        KeyExchangeAlg::EcdheRsa,
        KeyExchangeAlg::Srp,
        KeyExchangeAlg::SrpRsa,
        KeyExchangeAlg::DhAnon,
        KeyExchangeAlg::EcdhAnon,
    ];

    /// Settings name.
    pub fn name(self) -> &'static str {
        match self {
            KeyExchangeAlg::Rsa => "rsa",
            KeyExchangeAlg::DheRsa => "dhe_rsa",
            KeyExchangeAlg::EcdheRsa => "ecdhe_rsa",
            KeyExchangeAlg::Srp => "srp_sha",
            KeyExchangeAlg::SrpRsa => "srp_sha_rsa",
            KeyExchangeAlg::DhAnon => "dh_anon",
            KeyExchangeAlg::EcdhAnon => "ecdh_anon",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Whether the server sends a Certificate message.
    pub fn requires_certificate(self) -> bool {
        matches!(
            self,
            KeyExchangeAlg::Rsa
                | KeyExchangeAlg::DheRsa
                | KeyExchangeAlg::EcdheRsa
                | KeyExchangeAlg::SrpRsa
        )
    }

    /// Whether the ServerKeyExchange parameters carry a signature.
    pub fn signs_server_params(self) -> bool {
        matches!(
            self,
            KeyExchangeAlg::DheRsa | KeyExchangeAlg::EcdheRsa | KeyExchangeAlg::SrpRsa
        )
    }

    pub fn is_srp(self) -> bool {
        matches!(self, KeyExchangeAlg::Srp | KeyExchangeAlg::SrpRsa)
    }

    pub fn is_anonymous(self) -> bool {
        matches!(self, KeyExchangeAlg::DhAnon | KeyExchangeAlg::EcdhAnon)
    }

    pub fn is_ecc(self) -> bool {
        matches!(self, KeyExchangeAlg::EcdheRsa | KeyExchangeAlg::EcdhAnon)
    }

    pub fn is_ffdh(self) -> bool {
        matches!(self, KeyExchangeAlg::DheRsa | KeyExchangeAlg::DhAnon)
    }

    /// Whether a server may ask for a client certificate.
    pub fn allows_client_auth(self) -> bool {
        matches!(
            self,
            KeyExchangeAlg::Rsa | KeyExchangeAlg::DheRsa | KeyExchangeAlg::EcdheRsa
        )
    }
}

/// Record protection MAC of a suite. AEAD suites carry no separate MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlg {
    Sha1,
    Sha256,
    Sha384,
    Aead,
}

impl MacAlg {
    pub fn name(self) -> &'static str {
        match self {
            MacAlg::Sha1 => "sha1",
            MacAlg::Sha256 => "sha256",
            MacAlg::Sha384 => "sha384",
            MacAlg::Aead => "aead",
        }
    }

    pub fn hash(self) -> Option<HashAlgId> {
        match self {
            MacAlg::Sha1 => Some(HashAlgId::Sha1),
            MacAlg::Sha256 => Some(HashAlgId::Sha256),
            MacAlg::Sha384 => Some(HashAlgId::Sha384),
            MacAlg::Aead => None,
        }
    }

    pub fn output_len(self) -> usize {
        self.hash().map_or(0, HashAlgId::output_size)
    }
}

/// Settings name of a bulk cipher.
pub fn cipher_name(alg: CipherAlgId) -> &'static str {
    match alg {
        CipherAlgId::Aes128Cbc => "aes128",
        CipherAlgId::Aes256Cbc => "aes256",
        CipherAlgId::Aes128Gcm => "aes128gcm",
        CipherAlgId::Aes256Gcm => "aes256gcm",
    }
}

/// Static description of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteParams {
    pub suite: CipherSuite,
    pub name: &'static str,
    pub kx: KeyExchangeAlg,
    pub cipher: CipherAlgId,
    pub mac: MacAlg,
    /// PRF hash (TLS 1.2 only; older versions use their fixed PRF).
    pub prf_hash: HashAlgId,
    pub min_version: TlsVersion,
}

macro_rules! suite {
    ($id:ident, $kx:ident, $cipher:ident, $mac:ident, $prf:ident, $min:ident) => {
        CipherSuiteParams {
            suite: CipherSuite::$id,
            name: stringify!($id),
            kx: KeyExchangeAlg::$kx,
            cipher: CipherAlgId::$cipher,
            mac: MacAlg::$mac,
            prf_hash: HashAlgId::$prf,
            min_version: TlsVersion::$min,
        }
    };
}

/// Every implemented suite, in default preference order.
pub const CIPHER_SUITES: &[CipherSuiteParams] = &[
    suite!(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, EcdheRsa, Aes256Gcm, Aead, Sha384, Tls12),
    suite!(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, EcdheRsa, Aes128Gcm, Aead, Sha256, Tls12),
    suite!(TLS_DHE_RSA_WITH_AES_128_GCM_SHA256, DheRsa, Aes128Gcm, Aead, Sha256, Tls12),
    suite!(TLS_RSA_WITH_AES_256_GCM_SHA384, Rsa, Aes256Gcm, Aead, Sha384, Tls12),
    suite!(TLS_RSA_WITH_AES_128_GCM_SHA256, Rsa, Aes128Gcm, Aead, Sha256, Tls12),
    suite!(TLS_DH_ANON_WITH_AES_128_GCM_SHA256, DhAnon, Aes128Gcm, Aead, Sha256, Tls12),
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256, EcdheRsa, Aes128Cbc, Sha256, Sha256, Tls12),
    suite!(TLS_DHE_RSA_WITH_AES_128_CBC_SHA256, DheRsa, Aes128Cbc, Sha256, Sha256, Tls12),
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA256, Rsa, Aes256Cbc, Sha256, Sha256, Tls12),
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA256, Rsa, Aes128Cbc, Sha256, Sha256, Tls12),
    suite!(TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA, EcdheRsa, Aes256Cbc, Sha1, Sha256, Tls10),
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA, EcdheRsa, Aes128Cbc, Sha1, Sha256, Tls10),
    suite!(TLS_DHE_RSA_WITH_AES_256_CBC_SHA, DheRsa, Aes256Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_DHE_RSA_WITH_AES_128_CBC_SHA, DheRsa, Aes128Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA, Rsa, Aes256Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA, Rsa, Aes128Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_SRP_SHA_RSA_WITH_AES_256_CBC_SHA, SrpRsa, Aes256Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_SRP_SHA_RSA_WITH_AES_128_CBC_SHA, SrpRsa, Aes128Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_SRP_SHA_WITH_AES_256_CBC_SHA, Srp, Aes256Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_SRP_SHA_WITH_AES_128_CBC_SHA, Srp, Aes128Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_ECDH_ANON_WITH_AES_256_CBC_SHA, EcdhAnon, Aes256Cbc, Sha1, Sha256, Tls10),
    suite!(TLS_ECDH_ANON_WITH_AES_128_CBC_SHA, EcdhAnon, Aes128Cbc, Sha1, Sha256, Tls10),
    suite!(TLS_DH_ANON_WITH_AES_256_CBC_SHA, DhAnon, Aes256Cbc, Sha1, Sha256, Ssl30),
    suite!(TLS_DH_ANON_WITH_AES_128_CBC_SHA, DhAnon, Aes128Cbc, Sha1, Sha256, Ssl30),
];

impl CipherSuiteParams {
    pub fn lookup(suite: CipherSuite) -> Option<&'static CipherSuiteParams> {
        CIPHER_SUITES.iter().find(|p| p.suite == suite)
    }

    /// Whether the suite may be negotiated at `version`.
    pub fn supports_version(&self, version: TlsVersion) -> bool {
        version >= self.min_version
    }

    pub fn is_aead(&self) -> bool {
        self.cipher.is_aead()
    }

    pub fn key_len(&self) -> usize {
        self.cipher.key_size()
    }

    pub fn mac_len(&self) -> usize {
        self.mac.output_len()
    }

    /// IV bytes taken from the key block: the whole CBC IV, or the 4-byte
    /// GCM salt.
    pub fn fixed_iv_len(&self) -> usize {
        if self.is_aead() {
            4
        } else {
            16
        }
    }

    /// Explicit nonce carried in each AEAD record.
    pub fn record_iv_len(&self) -> usize {
        if self.is_aead() {
            8
        } else {
            0
        }
    }

    /// Total key block length.
    pub fn key_block_len(&self) -> usize {
        2 * (self.mac_len() + self.key_len() + self.fixed_iv_len())
    }

    /// Hash driving the TLS 1.2 PRF and transcript.
    pub fn handshake_hash(&self, version: TlsVersion) -> Option<HashAlgId> {
        (version == TlsVersion::Tls12).then_some(self.prf_hash)
    }
}

/// TLS named group identifiers (supported_groups).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const X25519: Self = Self(0x001D);
    pub const FFDHE2048: Self = Self(0x0100);

    pub fn curve(self) -> Option<EccCurveId> {
        match self {
            NamedGroup::SECP256R1 => Some(EccCurveId::NistP256),
            NamedGroup::X25519 => Some(EccCurveId::X25519),
            _ => None,
        }
    }

    pub fn from_curve(curve: EccCurveId) -> Self {
        match curve {
            EccCurveId::NistP256 => NamedGroup::SECP256R1,
            EccCurveId::X25519 => NamedGroup::X25519,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "secp256r1" => Some(NamedGroup::SECP256R1),
            "x25519" => Some(NamedGroup::X25519),
            _ => None,
        }
    }
}

/// TLS 1.2 signature scheme identifiers (hash, signature) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const RSA_PKCS1_SHA1: Self = Self(0x0201);
    pub const RSA_PKCS1_SHA256: Self = Self(0x0401);
    pub const RSA_PKCS1_SHA384: Self = Self(0x0501);
    pub const RSA_PKCS1_SHA512: Self = Self(0x0601);

    pub fn rsa_pkcs1(hash: HashAlgId) -> Option<Self> {
        match hash {
            HashAlgId::Sha1 => Some(Self::RSA_PKCS1_SHA1),
            HashAlgId::Sha256 => Some(Self::RSA_PKCS1_SHA256),
            HashAlgId::Sha384 => Some(Self::RSA_PKCS1_SHA384),
            HashAlgId::Sha512 => Some(Self::RSA_PKCS1_SHA512),
            HashAlgId::Md5 => None,
        }
    }

    /// Hash of an RSA PKCS#1 scheme; `None` for anything else.
    pub fn rsa_hash(self) -> Option<HashAlgId> {
        match self {
            Self::RSA_PKCS1_SHA1 => Some(HashAlgId::Sha1),
            Self::RSA_PKCS1_SHA256 => Some(HashAlgId::Sha256),
            Self::RSA_PKCS1_SHA384 => Some(HashAlgId::Sha384),
            Self::RSA_PKCS1_SHA512 => Some(HashAlgId::Sha512),
            _ => None,
        }
    }
}

/// Hash settings name to identifier.
pub fn hash_from_name(name: &str) -> Option<HashAlgId> {
    match name {
        "md5" => Some(HashAlgId::Md5),
        "sha1" => Some(HashAlgId::Sha1),
        "sha256" => Some(HashAlgId::Sha256),
        "sha384" => Some(HashAlgId::Sha384),
        "sha512" => Some(HashAlgId::Sha512),
        _ => None,
    }
}
