#![forbid(unsafe_code)]
#![doc = "SSL 3.0 / TLS 1.0-1.2 handshake and record protocol for litetls."]

pub mod alert;
pub mod config;
pub mod connection;
pub mod crypt;
pub mod extensions;
pub mod handshake;
pub mod record;
pub mod session;
pub mod transport;

pub use config::{ClientCredentials, HandshakeSettings, ServerCredentials};
pub use connection::{Action, IoDirection, TlsConnection};
pub use handshake::HandshakePhase;
pub use session::{InMemorySessionCache, Session, SessionCache};
pub use transport::Transport;

/// Protocol version. Ordered from oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    Ssl30,
    Tls10,
    Tls11,
    Tls12,
}

impl TlsVersion {
    /// Wire encoding (major, minor) packed big-endian.
    pub fn wire(self) -> u16 {
        match self {
            TlsVersion::Ssl30 => 0x0300,
            TlsVersion::Tls10 => 0x0301,
            TlsVersion::Tls11 => 0x0302,
            TlsVersion::Tls12 => 0x0303,
        }
    }

    pub fn from_wire(v: u16) -> Option<Self> {
        match v {
            0x0300 => Some(TlsVersion::Ssl30),
            0x0301 => Some(TlsVersion::Tls10),
            0x0302 => Some(TlsVersion::Tls11),
            0x0303 => Some(TlsVersion::Tls12),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TlsVersion::Ssl30 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    // RSA key transport
    pub const TLS_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x002F);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0035);
    pub const TLS_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0x003C);
    pub const TLS_RSA_WITH_AES_256_CBC_SHA256: Self = Self(0x003D);
    pub const TLS_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0x009C);
    pub const TLS_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0x009D);

    // Ephemeral finite-field DH, RSA signed
    pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA: Self = Self(0x0033);
    pub const TLS_DHE_RSA_WITH_AES_256_CBC_SHA: Self = Self(0x0039);
    pub const TLS_DHE_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0x0067);
    pub const TLS_DHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0x009E);

    // Ephemeral ECDH, RSA signed
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA: Self = Self(0xC013);
    pub const TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA: Self = Self(0xC014);
    pub const TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256: Self = Self(0xC027);
    pub const TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02F);
    pub const TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384: Self = Self(0xC030);

    // SRP (RFC 5054)
    pub const TLS_SRP_SHA_WITH_AES_128_CBC_SHA: Self = Self(0xC01D);
    pub const TLS_SRP_SHA_RSA_WITH_AES_128_CBC_SHA: Self = Self(0xC01E);
    pub const TLS_SRP_SHA_WITH_AES_256_CBC_SHA: Self = Self(0xC020);
    pub const TLS_SRP_SHA_RSA_WITH_AES_256_CBC_SHA: Self = Self(0xC021);

    // Anonymous
    pub const TLS_DH_ANON_WITH_AES_128_CBC_SHA: Self = Self(0x0034);
    pub const TLS_DH_ANON_WITH_AES_256_CBC_SHA: Self = Self(0x003A);
    pub const TLS_DH_ANON_WITH_AES_128_GCM_SHA256: Self = Self(0x00A6);
    pub const TLS_ECDH_ANON_WITH_AES_128_CBC_SHA: Self = Self(0xC018);
    pub const TLS_ECDH_ANON_WITH_AES_256_CBC_SHA: Self = Self(0xC019);

    // Signalling values
    pub const TLS_EMPTY_RENEGOTIATION_INFO_SCSV: Self = Self(0x00FF);
    pub const TLS_FALLBACK_SCSV: Self = Self(0x5600);

    /// Whether this is a signalling value rather than a real suite.
    pub fn is_signalling(self) -> bool {
        self == Self::TLS_EMPTY_RENEGOTIATION_INFO_SCSV || self == Self::TLS_FALLBACK_SCSV
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match crypt::CipherSuiteParams::lookup(*self) {
            Some(p) => f.write_str(p.name),
            None => write!(f, "0x{:04X}", self.0),
        }
    }
}

/// The role of a TLS endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}
