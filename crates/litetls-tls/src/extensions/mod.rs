//! Hello extensions (server_name, cert_type, supported_groups, ALPN,
//! encrypt_then_mac, extended_master_secret, renegotiation_info, ...).
//!
//! Extensions are decoded into the closed [`Extension`] enum. Unrecognised
//! types are kept as [`Extension::Unknown`] so they can be skipped (or
//! re-encoded) without failing the handshake.

use std::collections::HashSet;

use crate::config::CertificateType;
use crate::crypt::{NamedGroup, SignatureScheme};
use crate::handshake::codec::{put_u16, put_vec16, put_vec8, DecodeError, Reader};

/// TLS extension type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionType(pub u16);

impl ExtensionType {
    pub const SERVER_NAME: Self = Self(0);
    pub const CERT_TYPE: Self = Self(9);
    pub const SUPPORTED_GROUPS: Self = Self(10);
    pub const EC_POINT_FORMATS: Self = Self(11);
    pub const SRP: Self = Self(12);
    pub const SIGNATURE_ALGORITHMS: Self = Self(13);
    pub const APPLICATION_LAYER_PROTOCOL_NEGOTIATION: Self = Self(16);
    pub const ENCRYPT_THEN_MAC: Self = Self(22);
    pub const EXTENDED_MASTER_SECRET: Self = Self(23);
    pub const SUPPORTED_VERSIONS: Self = Self(43);
    pub const RENEGOTIATION_INFO: Self = Self(0xFF01);
}

/// Which hello message an extension block belongs to. A few extensions
/// have different layouts in the two directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionContext {
    ClientHello,
    ServerHello,
}

/// `host_name` entry type of server_name.
pub const SERVER_NAME_HOST: u8 = 0;
/// `uncompressed` EC point format.
pub const EC_POINT_FORMAT_UNCOMPRESSED: u8 = 0;

/// A decoded hello extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// Client: `(name_type, name)` entries. Server: empty acknowledgement.
    ServerName(Vec<(u8, Vec<u8>)>),
    /// Client offer of certificate types (RFC 6091).
    CertTypes(Vec<CertificateType>),
    /// Server selection of a certificate type.
    CertType(CertificateType),
    SupportedGroups(Vec<NamedGroup>),
    EcPointFormats(Vec<u8>),
    /// SRP username (RFC 5054 §2.8.1).
    Srp(Vec<u8>),
    SignatureAlgorithms(Vec<SignatureScheme>),
    /// Client: offered protocols. Server: exactly one selected protocol.
    Alpn(Vec<Vec<u8>>),
    EncryptThenMac,
    ExtendedMasterSecret,
    /// Client list of versions.
    SupportedVersions(Vec<u16>),
    /// Server selected version.
    SelectedVersion(u16),
    /// renegotiated_connection; empty on an initial handshake.
    RenegotiationInfo(Vec<u8>),
    Unknown { extension_type: u16, data: Vec<u8> },
}

impl Extension {
    pub fn extension_type(&self) -> ExtensionType {
        match self {
            Extension::ServerName(_) => ExtensionType::SERVER_NAME,
            Extension::CertTypes(_) | Extension::CertType(_) => ExtensionType::CERT_TYPE,
            Extension::SupportedGroups(_) => ExtensionType::SUPPORTED_GROUPS,
            Extension::EcPointFormats(_) => ExtensionType::EC_POINT_FORMATS,
            Extension::Srp(_) => ExtensionType::SRP,
            Extension::SignatureAlgorithms(_) => ExtensionType::SIGNATURE_ALGORITHMS,
            Extension::Alpn(_) => ExtensionType::APPLICATION_LAYER_PROTOCOL_NEGOTIATION,
            Extension::EncryptThenMac => ExtensionType::ENCRYPT_THEN_MAC,
            Extension::ExtendedMasterSecret => ExtensionType::EXTENDED_MASTER_SECRET,
            Extension::SupportedVersions(_) | Extension::SelectedVersion(_) => {
                ExtensionType::SUPPORTED_VERSIONS
            }
            Extension::RenegotiationInfo(_) => ExtensionType::RENEGOTIATION_INFO,
            Extension::Unknown { extension_type, .. } => ExtensionType(*extension_type),
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Extension::ServerName(names) => {
                if !names.is_empty() {
                    let mut list = Vec::new();
                    for (name_type, name) in names {
                        list.push(*name_type);
                        put_vec16(&mut list, name);
                    }
                    put_vec16(&mut out, &list);
                }
            }
            Extension::CertTypes(types) => {
                let raw: Vec<u8> = types.iter().map(|t| t.0).collect();
                put_vec8(&mut out, &raw);
            }
            Extension::CertType(t) => out.push(t.0),
            Extension::SupportedGroups(groups) => {
                put_u16(&mut out, (groups.len() * 2) as u16);
                for g in groups {
                    put_u16(&mut out, g.0);
                }
            }
            Extension::EcPointFormats(formats) => put_vec8(&mut out, formats),
            Extension::Srp(identity) => put_vec8(&mut out, identity),
            Extension::SignatureAlgorithms(schemes) => {
                put_u16(&mut out, (schemes.len() * 2) as u16);
                for s in schemes {
                    put_u16(&mut out, s.0);
                }
            }
            Extension::Alpn(protocols) => {
                let mut list = Vec::new();
                for p in protocols {
                    put_vec8(&mut list, p);
                }
                put_vec16(&mut out, &list);
            }
            Extension::EncryptThenMac | Extension::ExtendedMasterSecret => {}
            Extension::SupportedVersions(versions) => {
                out.push((versions.len() * 2) as u8);
                for v in versions {
                    put_u16(&mut out, *v);
                }
            }
            Extension::SelectedVersion(v) => put_u16(&mut out, *v),
            Extension::RenegotiationInfo(data) => put_vec8(&mut out, data),
            Extension::Unknown { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    fn decode(typ: u16, body: &[u8], ctx: ExtensionContext) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let ext = match ExtensionType(typ) {
            ExtensionType::SERVER_NAME => {
                if body.is_empty() && ctx == ExtensionContext::ServerHello {
                    Extension::ServerName(Vec::new())
                } else {
                    let mut list = Reader::new(r.vec16("server_name_list")?);
                    if list.is_empty() {
                        return Err(DecodeError::new("empty server_name_list"));
                    }
                    let mut names = Vec::new();
                    while !list.is_empty() {
                        let name_type = list.u8("name_type")?;
                        let name = list.vec16("server name")?;
                        if name.is_empty() {
                            return Err(DecodeError::new("empty server name"));
                        }
                        names.push((name_type, name.to_vec()));
                    }
                    Extension::ServerName(names)
                }
            }
            ExtensionType::CERT_TYPE => match ctx {
                ExtensionContext::ClientHello => {
                    let types = r.vec8("certificate_types")?;
                    if types.is_empty() {
                        return Err(DecodeError::new("empty certificate type list"));
                    }
                    Extension::CertTypes(types.iter().map(|t| CertificateType(*t)).collect())
                }
                ExtensionContext::ServerHello => {
                    Extension::CertType(CertificateType(r.u8("certificate_type")?))
                }
            },
            ExtensionType::SUPPORTED_GROUPS => {
                let mut list = Reader::new(r.vec16("named_group_list")?);
                if list.is_empty() || list.remaining() % 2 != 0 {
                    return Err(DecodeError::new("bad named_group_list length"));
                }
                let mut groups = Vec::new();
                while !list.is_empty() {
                    groups.push(NamedGroup(list.u16("named group")?));
                }
                Extension::SupportedGroups(groups)
            }
            ExtensionType::EC_POINT_FORMATS => {
                let formats = r.vec8("ec_point_format_list")?;
                if formats.is_empty() {
                    return Err(DecodeError::new("empty ec_point_format_list"));
                }
                Extension::EcPointFormats(formats.to_vec())
            }
            ExtensionType::SRP => Extension::Srp(r.vec8("srp_I")?.to_vec()),
            ExtensionType::SIGNATURE_ALGORITHMS => {
                let mut list = Reader::new(r.vec16("supported_signature_algorithms")?);
                if list.is_empty() || list.remaining() % 2 != 0 {
                    return Err(DecodeError::new("bad signature algorithm list length"));
                }
                let mut schemes = Vec::new();
                while !list.is_empty() {
                    schemes.push(SignatureScheme(list.u16("signature algorithm")?));
                }
                Extension::SignatureAlgorithms(schemes)
            }
            ExtensionType::APPLICATION_LAYER_PROTOCOL_NEGOTIATION => {
                let mut list = Reader::new(r.vec16("protocol_name_list")?);
                let mut protocols = Vec::new();
                while !list.is_empty() {
                    let p = list.vec8("protocol name")?;
                    if p.is_empty() {
                        return Err(DecodeError::new("empty ALPN protocol name"));
                    }
                    protocols.push(p.to_vec());
                }
                if protocols.is_empty() {
                    return Err(DecodeError::new("empty protocol_name_list"));
                }
                if ctx == ExtensionContext::ServerHello && protocols.len() != 1 {
                    return Err(DecodeError::new("server must select exactly one protocol"));
                }
                Extension::Alpn(protocols)
            }
            ExtensionType::ENCRYPT_THEN_MAC => Extension::EncryptThenMac,
            ExtensionType::EXTENDED_MASTER_SECRET => Extension::ExtendedMasterSecret,
            ExtensionType::SUPPORTED_VERSIONS => match ctx {
                ExtensionContext::ClientHello => {
                    let list_len = r.u8("supported_versions length")? as usize;
                    let mut list = Reader::new(r.bytes(list_len, "supported_versions")?);
                    if list.is_empty() || list.remaining() % 2 != 0 {
                        return Err(DecodeError::new("bad supported_versions length"));
                    }
                    let mut versions = Vec::new();
                    while !list.is_empty() {
                        versions.push(list.u16("version")?);
                    }
                    Extension::SupportedVersions(versions)
                }
                ExtensionContext::ServerHello => {
                    Extension::SelectedVersion(r.u16("selected_version")?)
                }
            },
            ExtensionType::RENEGOTIATION_INFO => {
                Extension::RenegotiationInfo(r.vec8("renegotiated_connection")?.to_vec())
            }
            _ => Extension::Unknown {
                extension_type: typ,
                data: r.rest().to_vec(),
            },
        };
        r.finish("extension")?;
        Ok(ext)
    }
}

/// Encode an extension list (without the outer 2-byte length).
pub fn encode_extensions(extensions: &[Extension]) -> Vec<u8> {
    let mut out = Vec::new();
    for ext in extensions {
        put_u16(&mut out, ext.extension_type().0);
        put_vec16(&mut out, &ext.encode_body());
    }
    out
}

/// Decode an extension list. A repeated extension type is a decode error.
pub fn decode_extensions(data: &[u8], ctx: ExtensionContext) -> Result<Vec<Extension>, DecodeError> {
    let mut r = Reader::new(data);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    while !r.is_empty() {
        let typ = r.u16("extension_type")?;
        let body = r.vec16("extension_data")?;
        if !seen.insert(typ) {
            return Err(DecodeError(format!("duplicate extension {typ}")));
        }
        out.push(Extension::decode(typ, body, ctx)?);
    }
    Ok(out)
}

/// First extension of type `typ`.
pub fn find(extensions: &[Extension], typ: ExtensionType) -> Option<&Extension> {
    extensions.iter().find(|e| e.extension_type() == typ)
}

/// The first `host_name` entry of a server_name list.
pub fn host_name(names: &[(u8, Vec<u8>)]) -> Option<String> {
    names
        .iter()
        .find(|(t, _)| *t == SERVER_NAME_HOST)
        .and_then(|(_, n)| String::from_utf8(n.clone()).ok())
}
