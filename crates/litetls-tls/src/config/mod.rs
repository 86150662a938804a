//! Handshake settings (builder pattern) and endpoint credentials.

use std::fmt;
use std::sync::Arc;

use crate::crypt::{CipherSuiteParams, KeyExchangeAlg, MacAlg, NamedGroup, CIPHER_SUITES};
use crate::handshake::srp::SrpVerifierDb;
use crate::{CipherSuite, TlsVersion};
use litetls_crypto::{AsymmetricKey, CertificateChain};
use litetls_types::{CipherAlgId, HashAlgId, TlsError};
use zeroize::Zeroize;

/// Callback receiving NSS key-log lines.
pub type KeyLogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Certificate type (RFC 6091 cert_type extension values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CertificateType(pub u8);

impl CertificateType {
    pub const X509: Self = Self(0);
    pub const OPENPGP: Self = Self(1);

    /// Whether certificates of this type can be sent and verified. Only
    /// X.509 chains are.
    pub fn is_supported(self) -> bool {
        self == Self::X509
    }
}

/// How the server reacts to a ClientHello at or above `tls_intolerant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntoleranceType {
    /// Send a fatal handshake_failure alert.
    #[default]
    Alert,
    /// Close the transport without an alert.
    Close,
    /// Reset the transport.
    Reset,
}

/// Negotiable handshake policy.
///
/// Built with [`HandshakeSettings::builder`]; validated once at the start
/// of every handshake.
#[derive(Clone)]
pub struct HandshakeSettings {
    /// Bulk ciphers in preference order.
    pub ciphers: Vec<CipherAlgId>,
    /// Record MACs in preference order. AEAD suites are always eligible.
    pub macs: Vec<MacAlg>,
    /// Key exchange methods in preference order.
    pub key_exchanges: Vec<KeyExchangeAlg>,
    pub certificate_types: Vec<CertificateType>,
    /// Smallest acceptable peer key (RSA modulus, DH prime, SRP group) in bits.
    pub min_key_size: usize,
    /// Largest acceptable peer key in bits.
    pub max_key_size: usize,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    pub use_extended_master_secret: bool,
    pub require_extended_master_secret: bool,
    pub use_encrypt_then_mac: bool,
    /// Client: include TLS_FALLBACK_SCSV (RFC 7507).
    pub send_fallback_scsv: bool,
    /// Hashes for TLS 1.2 RSA signatures, in preference order.
    pub rsa_sig_hashes: Vec<HashAlgId>,
    /// Curves for ECDHE, in preference order.
    pub ecc_curves: Vec<NamedGroup>,
    /// Finite-field group for DHE.
    pub dh_group: NamedGroup,
    /// Server ALPN protocols in preference order.
    pub alpn_protocols: Vec<Vec<u8>>,
    /// Server only: simulate intolerance of this version and above.
    pub tls_intolerant: Option<TlsVersion>,
    pub intolerance_type: IntoleranceType,
    /// Receives `CLIENT_RANDOM` lines for every derived master secret.
    pub key_log: Option<KeyLogCallback>,
}

impl fmt::Debug for HandshakeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeSettings")
            .field("ciphers", &self.ciphers)
            .field("macs", &self.macs)
            .field("key_exchanges", &self.key_exchanges)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("min_key_size", &self.min_key_size)
            .field("max_key_size", &self.max_key_size)
            .field("use_extended_master_secret", &self.use_extended_master_secret)
            .field("use_encrypt_then_mac", &self.use_encrypt_then_mac)
            .field("key_log", &self.key_log.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            ciphers: vec![
                CipherAlgId::Aes256Gcm,
                CipherAlgId::Aes128Gcm,
                CipherAlgId::Aes256Cbc,
                CipherAlgId::Aes128Cbc,
            ],
            macs: vec![MacAlg::Sha384, MacAlg::Sha256, MacAlg::Sha1],
            key_exchanges: KeyExchangeAlg::ALL.to_vec(),
            certificate_types: vec![CertificateType::X509],
            min_key_size: 1023,
            max_key_size: 8193,
            min_version: TlsVersion::Tls10,
            max_version: TlsVersion::Tls12,
            use_extended_master_secret: true,
            require_extended_master_secret: false,
            use_encrypt_then_mac: true,
            send_fallback_scsv: false,
            rsa_sig_hashes: vec![
                HashAlgId::Sha256,
                HashAlgId::Sha384,
                HashAlgId::Sha512,
                HashAlgId::Sha1,
            ],
            ecc_curves: vec![NamedGroup::X25519, NamedGroup::SECP256R1],
            dh_group: NamedGroup::FFDHE2048,
            alpn_protocols: Vec::new(),
            tls_intolerant: None,
            intolerance_type: IntoleranceType::Alert,
            key_log: None,
        }
    }
}

const MIN_KEY_SIZE_FLOOR: usize = 512;
const MAX_KEY_SIZE_CEILING: usize = 16384;

impl HandshakeSettings {
    pub fn builder() -> HandshakeSettingsBuilder {
        HandshakeSettingsBuilder::default()
    }

    /// Check the settings for internal consistency.
    pub fn validate(&self) -> Result<(), TlsError> {
        let bad = |msg: &str| Err(TlsError::InvalidConfig(msg.into()));
        if self.min_version > self.max_version {
            return bad("min_version is above max_version");
        }
        if self.min_key_size < MIN_KEY_SIZE_FLOOR || self.max_key_size > MAX_KEY_SIZE_CEILING {
            return bad("key size bounds out of range");
        }
        if self.min_key_size > self.max_key_size {
            return bad("min_key_size is above max_key_size");
        }
        if self.ciphers.is_empty() {
            return bad("no ciphers enabled");
        }
        if self.macs.is_empty() {
            return bad("no MACs enabled");
        }
        if self.key_exchanges.is_empty() {
            return bad("no key exchange methods enabled");
        }
        if self
            .certificate_types
            .iter()
            .any(|t| *t != CertificateType::X509 && *t != CertificateType::OPENPGP)
        {
            return bad("unknown certificate type");
        }
        if !self.certificate_types.contains(&CertificateType::X509) {
            return bad("x509 must be among the certificate types");
        }
        if self.require_extended_master_secret && !self.use_extended_master_secret {
            return bad("extended master secret required but disabled");
        }
        if self.ecc_curves.iter().any(|g| g.curve().is_none()) {
            return bad("unsupported elliptic curve");
        }
        if self.dh_group != NamedGroup::FFDHE2048 {
            return bad("unsupported finite-field group");
        }
        if self.rsa_sig_hashes.is_empty() || self.rsa_sig_hashes.contains(&HashAlgId::Md5) {
            return bad("invalid RSA signature hash list");
        }
        if self.alpn_protocols.iter().any(|p| p.is_empty() || p.len() > 255) {
            return bad("ALPN protocol names must be 1..=255 bytes");
        }
        Ok(())
    }

    /// Whether a suite is enabled by the cipher/MAC/key-exchange lists.
    pub fn suite_enabled(&self, params: &CipherSuiteParams) -> bool {
        self.ciphers.contains(&params.cipher)
            && (params.mac == MacAlg::Aead || self.macs.contains(&params.mac))
            && self.key_exchanges.contains(&params.kx)
    }

    /// Enabled suites in preference order: by cipher, then MAC, then key
    /// exchange, each in the order the settings list them.
    pub fn cipher_suites(&self) -> Vec<&'static CipherSuiteParams> {
        let mut out = Vec::new();
        for cipher in &self.ciphers {
            let macs: Vec<MacAlg> = if cipher.is_aead() {
                vec![MacAlg::Aead]
            } else {
                self.macs.clone()
            };
            for mac in &macs {
                for kx in &self.key_exchanges {
                    out.extend(
                        CIPHER_SUITES
                            .iter()
                            .filter(|p| p.cipher == *cipher && p.mac == *mac && p.kx == *kx),
                    );
                }
            }
        }
        out
    }

    /// Enabled suites usable somewhere in `min_version..=max_version`.
    pub fn suite_ids(&self) -> Vec<CipherSuite> {
        self.cipher_suites()
            .into_iter()
            .filter(|p| p.supports_version(self.max_version))
            .map(|p| p.suite)
            .collect()
    }
}

/// Builder for [`HandshakeSettings`].
#[derive(Default)]
pub struct HandshakeSettingsBuilder {
    settings: HandshakeSettings,
}

impl HandshakeSettingsBuilder {
    pub fn ciphers(mut self, ciphers: &[CipherAlgId]) -> Self {
        self.settings.ciphers = ciphers.to_vec();
        self
    }

    pub fn macs(mut self, macs: &[MacAlg]) -> Self {
        self.settings.macs = macs.to_vec();
        self
    }

    pub fn key_exchanges(mut self, kx: &[KeyExchangeAlg]) -> Self {
        self.settings.key_exchanges = kx.to_vec();
        self
    }

    pub fn certificate_types(mut self, types: &[CertificateType]) -> Self {
        self.settings.certificate_types = types.to_vec();
        self
    }

    pub fn min_key_size(mut self, bits: usize) -> Self {
        self.settings.min_key_size = bits;
        self
    }

    pub fn max_key_size(mut self, bits: usize) -> Self {
        self.settings.max_key_size = bits;
        self
    }

    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.settings.min_version = version;
        self
    }

    pub fn max_version(mut self, version: TlsVersion) -> Self {
        self.settings.max_version = version;
        self
    }

    pub fn use_extended_master_secret(mut self, enabled: bool) -> Self {
        self.settings.use_extended_master_secret = enabled;
        self
    }

    pub fn require_extended_master_secret(mut self, required: bool) -> Self {
        self.settings.require_extended_master_secret = required;
        self
    }

    pub fn use_encrypt_then_mac(mut self, enabled: bool) -> Self {
        self.settings.use_encrypt_then_mac = enabled;
        self
    }

    pub fn send_fallback_scsv(mut self, enabled: bool) -> Self {
        self.settings.send_fallback_scsv = enabled;
        self
    }

    pub fn rsa_sig_hashes(mut self, hashes: &[HashAlgId]) -> Self {
        self.settings.rsa_sig_hashes = hashes.to_vec();
        self
    }

    pub fn ecc_curves(mut self, curves: &[NamedGroup]) -> Self {
        self.settings.ecc_curves = curves.to_vec();
        self
    }

    pub fn dh_group(mut self, group: NamedGroup) -> Self {
        self.settings.dh_group = group;
        self
    }

    pub fn alpn(mut self, protocols: &[&[u8]]) -> Self {
        self.settings.alpn_protocols = protocols.iter().map(|p| p.to_vec()).collect();
        self
    }

    pub fn tls_intolerant(mut self, version: Option<TlsVersion>, kind: IntoleranceType) -> Self {
        self.settings.tls_intolerant = version;
        self.settings.intolerance_type = kind;
        self
    }

    pub fn key_log(mut self, callback: KeyLogCallback) -> Self {
        self.settings.key_log = Some(callback);
        self
    }

    pub fn build(self) -> HandshakeSettings {
        self.settings
    }
}

/// A certificate chain with the private key of its end-entity certificate.
#[derive(Clone)]
pub struct CertifiedKey {
    pub chain: CertificateChain,
    pub key: Arc<dyn AsymmetricKey>,
}

impl CertifiedKey {
    pub fn new(chain: CertificateChain, key: Arc<dyn AsymmetricKey>) -> Result<Self, TlsError> {
        if chain.is_empty() {
            return Err(TlsError::InvalidConfig("empty certificate chain".into()));
        }
        if !key.has_private() {
            return Err(TlsError::InvalidConfig("certificate key has no private part".into()));
        }
        Ok(Self { chain, key })
    }
}

impl fmt::Debug for CertifiedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertifiedKey")
            .field("chain_len", &self.chain.len())
            .field("key_bits", &self.key.bit_len())
            .finish()
    }
}

/// What the client authenticates with. Exactly one family per handshake.
#[derive(Clone)]
pub enum ClientCredentials {
    /// SRP username and password; offers only SRP suites.
    Srp { username: String, password: Vec<u8> },
    /// Certificate-authenticated server (RSA, DHE, ECDHE); the optional
    /// certified key answers a CertificateRequest.
    Certificate { client_auth: Option<CertifiedKey> },
    /// Anonymous (EC)DH; offers only anonymous suites.
    Anonymous,
}

impl ClientCredentials {
    /// Whether a suite's key exchange matches this credential family.
    pub fn permits(&self, kx: KeyExchangeAlg) -> bool {
        match self {
            ClientCredentials::Srp { .. } => kx.is_srp(),
            ClientCredentials::Certificate { .. } => {
                matches!(
                    kx,
                    KeyExchangeAlg::Rsa | KeyExchangeAlg::DheRsa | KeyExchangeAlg::EcdheRsa
                )
            }
            ClientCredentials::Anonymous => kx.is_anonymous(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCredentials::Srp { username, .. } => {
                f.debug_struct("Srp").field("username", username).finish_non_exhaustive()
            }
            ClientCredentials::Certificate { client_auth } => f
                .debug_struct("Certificate")
                .field("client_auth", client_auth)
                .finish(),
            ClientCredentials::Anonymous => f.write_str("Anonymous"),
        }
    }
}

impl Drop for ClientCredentials {
    fn drop(&mut self) {
        if let ClientCredentials::Srp { password, .. } = self {
            password.zeroize();
        }
    }
}

/// What the server can authenticate with. Any combination may be present;
/// suites are offered only when their credential is available.
#[derive(Clone, Default)]
pub struct ServerCredentials {
    /// Certificate and key for RSA, DHE_RSA, ECDHE_RSA and SRP_RSA suites.
    pub certified_key: Option<CertifiedKey>,
    /// Verifier database for SRP suites.
    pub verifier_db: Option<Arc<SrpVerifierDb>>,
    /// Permit anonymous suites.
    pub anonymous: bool,
    /// Ask certificate-authenticated clients for a certificate.
    pub request_client_cert: bool,
}

impl ServerCredentials {
    /// Whether a suite's key exchange can be served with these credentials.
    pub fn permits(&self, kx: KeyExchangeAlg) -> bool {
        let has_cert = self.certified_key.is_some();
        let has_srp = self.verifier_db.is_some();
        match kx {
            KeyExchangeAlg::Rsa | KeyExchangeAlg::DheRsa | KeyExchangeAlg::EcdheRsa => has_cert,
            KeyExchangeAlg::Srp => has_srp,
            KeyExchangeAlg::SrpRsa => has_srp && has_cert,
            KeyExchangeAlg::DhAnon | KeyExchangeAlg::EcdhAnon => self.anonymous,
        }
    }
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCredentials")
            .field("certified_key", &self.certified_key)
            .field("srp", &self.verifier_db.is_some())
            .field("anonymous", &self.anonymous)
            .field("request_client_cert", &self.request_client_cert)
            .finish()
    }
}
