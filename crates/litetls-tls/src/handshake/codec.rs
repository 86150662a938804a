//! Handshake message encoding/decoding (RFC 5246 §7.4, RFC 6101 §5.6,
//! RFC 5054 §2.8, RFC 4492 §5).
//!
//! Decoding consumes every byte exactly: a short field, an over-long field
//! or trailing bytes are all a [`DecodeError`], which the handshake turns
//! into a fatal `decode_error` alert.

use std::fmt;

use crate::crypt::{KeyExchangeAlg, NamedGroup, SignatureScheme};
use crate::extensions::{decode_extensions, encode_extensions, Extension, ExtensionContext};
use crate::{CipherSuite, TlsVersion};
use litetls_types::{AlertDescription, TlsError};

use super::HandshakeType;

/// Malformed or truncated wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl DecodeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for TlsError {
    fn from(e: DecodeError) -> Self {
        TlsError::alert(AlertDescription::DecodeError, e.0)
    }
}

// ---------------------------------------------------------------------------
// Reader / writer primitives
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError(format!("truncated {what}")));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    pub fn u8(&mut self, what: &str) -> Result<u8, DecodeError> {
        Ok(self.bytes(1, what)?[0])
    }

    pub fn u16(&mut self, what: &str) -> Result<u16, DecodeError> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self, what: &str) -> Result<usize, DecodeError> {
        let b = self.bytes(3, what)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    /// `opaque<0..2^8-1>`
    pub fn vec8(&mut self, what: &str) -> Result<&'a [u8], DecodeError> {
        let n = self.u8(what)? as usize;
        self.bytes(n, what)
    }

    /// `opaque<0..2^16-1>`
    pub fn vec16(&mut self, what: &str) -> Result<&'a [u8], DecodeError> {
        let n = self.u16(what)? as usize;
        self.bytes(n, what)
    }

    /// `opaque<0..2^24-1>`
    pub fn vec24(&mut self, what: &str) -> Result<&'a [u8], DecodeError> {
        let n = self.u24(what)?;
        self.bytes(n, what)
    }

    /// Require that every byte has been consumed.
    pub fn finish(&self, what: &str) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError(format!("{} trailing bytes in {what}", self.remaining())))
        }
    }
}

pub fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.push((v >> 16) as u8);
    out.push((v >> 8) as u8);
    out.push(v as u8);
}

pub fn put_vec8(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

pub fn put_vec16(out: &mut Vec<u8>, data: &[u8]) {
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
}

pub fn put_vec24(out: &mut Vec<u8>, data: &[u8]) {
    put_u24(out, data.len());
    out.extend_from_slice(data);
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Negotiated values some message layouts depend on. The same context
/// drives encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeContext {
    pub version: Option<TlsVersion>,
    pub kx: Option<KeyExchangeAlg>,
}

impl DecodeContext {
    pub fn new(version: TlsVersion, kx: KeyExchangeAlg) -> Self {
        Self {
            version: Some(version),
            kx: Some(kx),
        }
    }

    fn version(&self) -> Result<TlsVersion, DecodeError> {
        self.version
            .ok_or_else(|| DecodeError::new("message before version negotiation"))
    }

    fn kx(&self) -> Result<KeyExchangeAlg, DecodeError> {
        self.kx
            .ok_or_else(|| DecodeError::new("message before cipher suite negotiation"))
    }

    fn has_sig_scheme(&self) -> Result<bool, DecodeError> {
        Ok(self.version()? >= TlsVersion::Tls12)
    }
}

/// ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Highest version the client supports, as sent (may be unknown).
    pub client_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    /// `None` when the extensions block is absent altogether.
    pub extensions: Option<Vec<Extension>>,
}

/// ServerHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Option<Vec<Extension>>,
}

/// Certificate: DER certificates, end-entity first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateMsg {
    pub certificate_list: Vec<Vec<u8>>,
}

/// Key exchange parameters of a ServerKeyExchange (the signed part).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyParams {
    /// ServerDHParams.
    Dh { p: Vec<u8>, g: Vec<u8>, ys: Vec<u8> },
    /// ServerECDHParams with a named curve.
    Ecdh { group: NamedGroup, public: Vec<u8> },
    /// ServerSRPParams.
    Srp {
        n: Vec<u8>,
        g: Vec<u8>,
        salt: Vec<u8>,
        b: Vec<u8>,
    },
}

const EC_CURVE_TYPE_NAMED: u8 = 3;

impl ServerKeyParams {
    /// Wire bytes, as covered by the signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            ServerKeyParams::Dh { p, g, ys } => {
                put_vec16(&mut out, p);
                put_vec16(&mut out, g);
                put_vec16(&mut out, ys);
            }
            ServerKeyParams::Ecdh { group, public } => {
                out.push(EC_CURVE_TYPE_NAMED);
                put_u16(&mut out, group.0);
                put_vec8(&mut out, public);
            }
            ServerKeyParams::Srp { n, g, salt, b } => {
                put_vec16(&mut out, n);
                put_vec16(&mut out, g);
                put_vec8(&mut out, salt);
                put_vec16(&mut out, b);
            }
        }
        out
    }

    fn decode(r: &mut Reader<'_>, kx: KeyExchangeAlg) -> Result<Self, DecodeError> {
        if kx.is_ffdh() {
            Ok(ServerKeyParams::Dh {
                p: r.vec16("dh_p")?.to_vec(),
                g: r.vec16("dh_g")?.to_vec(),
                ys: r.vec16("dh_Ys")?.to_vec(),
            })
        } else if kx.is_ecc() {
            let curve_type = r.u8("curve_type")?;
            if curve_type != EC_CURVE_TYPE_NAMED {
                return Err(DecodeError(format!("unsupported curve_type {curve_type}")));
            }
            Ok(ServerKeyParams::Ecdh {
                group: NamedGroup(r.u16("named_curve")?),
                public: r.vec8("ec_point")?.to_vec(),
            })
        } else if kx.is_srp() {
            Ok(ServerKeyParams::Srp {
                n: r.vec16("srp_N")?.to_vec(),
                g: r.vec16("srp_g")?.to_vec(),
                salt: r.vec8("srp_s")?.to_vec(),
                b: r.vec16("srp_B")?.to_vec(),
            })
        } else {
            Err(DecodeError::new("ServerKeyExchange not used with RSA key exchange"))
        }
    }
}

/// A signature, with its algorithm when TLS 1.2 carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(scheme) = self.scheme {
            put_u16(out, scheme.0);
        }
        put_vec16(out, &self.signature);
    }

    fn decode(r: &mut Reader<'_>, with_scheme: bool) -> Result<Self, DecodeError> {
        let scheme = if with_scheme {
            Some(SignatureScheme(r.u16("signature algorithm")?))
        } else {
            None
        };
        Ok(Self {
            scheme,
            signature: r.vec16("signature")?.to_vec(),
        })
    }
}

/// ServerKeyExchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub params: ServerKeyParams,
    /// Present for signed key exchanges.
    pub signature: Option<DigitallySigned>,
}

/// CertificateRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    /// TLS 1.2 only.
    pub signature_algorithms: Option<Vec<SignatureScheme>>,
    /// Distinguished names, DER.
    pub certificate_authorities: Vec<Vec<u8>>,
}

/// `rsa_sign` client certificate type.
pub const CLIENT_CERT_TYPE_RSA_SIGN: u8 = 1;

/// ClientKeyExchange, by key exchange family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    /// RSA-encrypted premaster secret. SSL 3.0 omits the length prefix.
    Rsa(Vec<u8>),
    /// Client DH public value Yc.
    Dh(Vec<u8>),
    /// Client ECDH public point.
    Ecdh(Vec<u8>),
    /// Client SRP public value A.
    Srp(Vec<u8>),
}

/// A complete handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(CertificateMsg),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    CertificateVerify(DigitallySigned),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Handshake header
// ---------------------------------------------------------------------------

/// Split a buffer into the first complete handshake message.
///
/// Returns `(type byte, body, total_len)`, or `None` while the message is
/// still incomplete.
pub fn parse_handshake_header(data: &[u8]) -> Option<(u8, &[u8], usize)> {
    if data.len() < 4 {
        return None;
    }
    let length = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | (data[3] as usize);
    let total = 4 + length;
    if data.len() < total {
        return None;
    }
    Some((data[0], &data[4..total], total))
}

/// Wrap a handshake body with the 4-byte header.
pub fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.push(msg_type as u8);
    put_vec24(&mut out, body);
    out
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

impl HandshakeMessage {
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::HelloRequest => HandshakeType::HelloRequest,
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::CertificateRequest(_) => HandshakeType::CertificateRequest,
            HandshakeMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakeMessage::CertificateVerify(_) => HandshakeType::CertificateVerify,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeMessage::Finished(_) => HandshakeType::Finished,
        }
    }

    /// Encode as a complete handshake message (header + body).
    pub fn encode(&self, ctx: &DecodeContext) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            HandshakeMessage::HelloRequest | HandshakeMessage::ServerHelloDone => {}
            HandshakeMessage::ClientHello(ch) => {
                put_u16(&mut body, ch.client_version);
                body.extend_from_slice(&ch.random);
                put_vec8(&mut body, &ch.session_id);
                put_u16(&mut body, (ch.cipher_suites.len() * 2) as u16);
                for s in &ch.cipher_suites {
                    put_u16(&mut body, s.0);
                }
                put_vec8(&mut body, &ch.compression_methods);
                if let Some(exts) = &ch.extensions {
                    put_vec16(&mut body, &encode_extensions(exts));
                }
            }
            HandshakeMessage::ServerHello(sh) => {
                put_u16(&mut body, sh.server_version);
                body.extend_from_slice(&sh.random);
                put_vec8(&mut body, &sh.session_id);
                put_u16(&mut body, sh.cipher_suite.0);
                body.push(sh.compression_method);
                if let Some(exts) = &sh.extensions {
                    put_vec16(&mut body, &encode_extensions(exts));
                }
            }
            HandshakeMessage::Certificate(cert) => {
                let mut list = Vec::new();
                for der in &cert.certificate_list {
                    put_vec24(&mut list, der);
                }
                put_vec24(&mut body, &list);
            }
            HandshakeMessage::ServerKeyExchange(ske) => {
                body.extend_from_slice(&ske.params.encode());
                if let Some(sig) = &ske.signature {
                    sig.encode(&mut body);
                }
            }
            HandshakeMessage::CertificateRequest(cr) => {
                put_vec8(&mut body, &cr.certificate_types);
                if let Some(schemes) = &cr.signature_algorithms {
                    put_u16(&mut body, (schemes.len() * 2) as u16);
                    for s in schemes {
                        put_u16(&mut body, s.0);
                    }
                }
                let mut cas = Vec::new();
                for dn in &cr.certificate_authorities {
                    put_vec16(&mut cas, dn);
                }
                put_vec16(&mut body, &cas);
            }
            HandshakeMessage::CertificateVerify(sig) => sig.encode(&mut body),
            HandshakeMessage::ClientKeyExchange(cke) => match cke {
                ClientKeyExchange::Rsa(enc) => {
                    if ctx.version == Some(TlsVersion::Ssl30) {
                        body.extend_from_slice(enc);
                    } else {
                        put_vec16(&mut body, enc);
                    }
                }
                ClientKeyExchange::Dh(y) | ClientKeyExchange::Srp(y) => put_vec16(&mut body, y),
                ClientKeyExchange::Ecdh(point) => put_vec8(&mut body, point),
            },
            HandshakeMessage::Finished(verify_data) => body.extend_from_slice(verify_data),
        }
        wrap_handshake(self.handshake_type(), &body)
    }

    /// Decode a handshake body of type `msg_type`.
    pub fn decode(msg_type: u8, body: &[u8], ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let msg_type = HandshakeType::from_u8(msg_type)
            .ok_or_else(|| DecodeError(format!("unknown handshake type {msg_type}")))?;
        let mut r = Reader::new(body);
        let msg = match msg_type {
            HandshakeType::HelloRequest => HandshakeMessage::HelloRequest,
            HandshakeType::ServerHelloDone => HandshakeMessage::ServerHelloDone,
            HandshakeType::ClientHello => HandshakeMessage::ClientHello(decode_client_hello(&mut r)?),
            HandshakeType::ServerHello => HandshakeMessage::ServerHello(decode_server_hello(&mut r)?),
            HandshakeType::Certificate => {
                let mut list = Reader::new(r.vec24("certificate_list")?);
                let mut certificate_list = Vec::new();
                while !list.is_empty() {
                    let der = list.vec24("certificate")?;
                    if der.is_empty() {
                        return Err(DecodeError::new("empty certificate entry"));
                    }
                    certificate_list.push(der.to_vec());
                }
                HandshakeMessage::Certificate(CertificateMsg { certificate_list })
            }
            HandshakeType::ServerKeyExchange => {
                let kx = ctx.kx()?;
                let params = ServerKeyParams::decode(&mut r, kx)?;
                let signature = if kx.signs_server_params() {
                    Some(DigitallySigned::decode(&mut r, ctx.has_sig_scheme()?)?)
                } else {
                    None
                };
                HandshakeMessage::ServerKeyExchange(ServerKeyExchange { params, signature })
            }
            HandshakeType::CertificateRequest => {
                let certificate_types = r.vec8("certificate_types")?.to_vec();
                let signature_algorithms = if ctx.has_sig_scheme()? {
                    let mut list = Reader::new(r.vec16("supported_signature_algorithms")?);
                    if list.remaining() % 2 != 0 {
                        return Err(DecodeError::new("odd signature algorithm list"));
                    }
                    let mut schemes = Vec::new();
                    while !list.is_empty() {
                        schemes.push(SignatureScheme(list.u16("signature algorithm")?));
                    }
                    Some(schemes)
                } else {
                    None
                };
                let mut cas = Reader::new(r.vec16("certificate_authorities")?);
                let mut certificate_authorities = Vec::new();
                while !cas.is_empty() {
                    certificate_authorities.push(cas.vec16("distinguished name")?.to_vec());
                }
                HandshakeMessage::CertificateRequest(CertificateRequest {
                    certificate_types,
                    signature_algorithms,
                    certificate_authorities,
                })
            }
            HandshakeType::CertificateVerify => HandshakeMessage::CertificateVerify(
                DigitallySigned::decode(&mut r, ctx.has_sig_scheme()?)?,
            ),
            HandshakeType::ClientKeyExchange => {
                let version = ctx.version()?;
                let cke = match ctx.kx()? {
                    KeyExchangeAlg::Rsa => {
                        if version == TlsVersion::Ssl30 {
                            ClientKeyExchange::Rsa(r.rest().to_vec())
                        } else {
                            ClientKeyExchange::Rsa(r.vec16("EncryptedPreMasterSecret")?.to_vec())
                        }
                    }
                    KeyExchangeAlg::DheRsa | KeyExchangeAlg::DhAnon => {
                        ClientKeyExchange::Dh(r.vec16("dh_Yc")?.to_vec())
                    }
                    KeyExchangeAlg::EcdheRsa | KeyExchangeAlg::EcdhAnon => {
                        ClientKeyExchange::Ecdh(r.vec8("ecdh_Yc")?.to_vec())
                    }
                    KeyExchangeAlg::Srp | KeyExchangeAlg::SrpRsa => {
                        ClientKeyExchange::Srp(r.vec16("srp_A")?.to_vec())
                    }
                };
                HandshakeMessage::ClientKeyExchange(cke)
            }
            HandshakeType::Finished => {
                let expected = if ctx.version()? == TlsVersion::Ssl30 { 36 } else { 12 };
                HandshakeMessage::Finished(r.bytes(expected, "verify_data")?.to_vec())
            }
        };
        r.finish(msg_type.name())?;
        Ok(msg)
    }
}

fn decode_random(r: &mut Reader<'_>) -> Result<[u8; 32], DecodeError> {
    let mut random = [0u8; 32];
    random.copy_from_slice(r.bytes(32, "random")?);
    Ok(random)
}

fn decode_session_id(r: &mut Reader<'_>) -> Result<Vec<u8>, DecodeError> {
    let sid = r.vec8("session_id")?;
    if sid.len() > 32 {
        return Err(DecodeError::new("session_id longer than 32 bytes"));
    }
    Ok(sid.to_vec())
}

fn decode_client_hello(r: &mut Reader<'_>) -> Result<ClientHello, DecodeError> {
    let client_version = r.u16("client_version")?;
    let random = decode_random(r)?;
    let session_id = decode_session_id(r)?;

    let mut suites = Reader::new(r.vec16("cipher_suites")?);
    if suites.is_empty() || suites.remaining() % 2 != 0 {
        return Err(DecodeError::new("bad cipher_suites length"));
    }
    let mut cipher_suites = Vec::with_capacity(suites.remaining() / 2);
    while !suites.is_empty() {
        cipher_suites.push(CipherSuite(suites.u16("cipher suite")?));
    }

    let compression_methods = r.vec8("compression_methods")?.to_vec();
    if compression_methods.is_empty() {
        return Err(DecodeError::new("empty compression_methods"));
    }

    let extensions = if r.is_empty() {
        None
    } else {
        Some(decode_extensions(
            r.vec16("extensions")?,
            ExtensionContext::ClientHello,
        )?)
    };

    Ok(ClientHello {
        client_version,
        random,
        session_id,
        cipher_suites,
        compression_methods,
        extensions,
    })
}

fn decode_server_hello(r: &mut Reader<'_>) -> Result<ServerHello, DecodeError> {
    let server_version = r.u16("server_version")?;
    let random = decode_random(r)?;
    let session_id = decode_session_id(r)?;
    let cipher_suite = CipherSuite(r.u16("cipher_suite")?);
    let compression_method = r.u8("compression_method")?;
    let extensions = if r.is_empty() {
        None
    } else {
        Some(decode_extensions(
            r.vec16("extensions")?,
            ExtensionContext::ServerHello,
        )?)
    };
    Ok(ServerHello {
        server_version,
        random,
        session_id,
        cipher_suite,
        compression_method,
        extensions,
    })
}
