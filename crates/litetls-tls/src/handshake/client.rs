//! Client handshake state machine.
//!
//! Full handshake:
//!
//! ```text
//! ClientHello        -->
//!                    <--  ServerHello, [Certificate], [ServerKeyExchange],
//!                         [CertificateRequest], ServerHelloDone
//! [Certificate], ClientKeyExchange, [CertificateVerify],
//! ChangeCipherSpec, Finished -->
//!                    <--  ChangeCipherSpec, Finished
//! ```
//!
//! Abbreviated (resumed) handshake: the server answers the ClientHello with
//! ServerHello, ChangeCipherSpec and Finished; the client replies with its
//! own ChangeCipherSpec and Finished.

use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroize;

use super::codec::{
    parse_handshake_header, CertificateMsg, CertificateRequest, ClientHello, ClientKeyExchange,
    DecodeContext, HandshakeMessage, ServerHello, ServerKeyExchange, ServerKeyParams,
    CLIENT_CERT_TYPE_RSA_SIGN,
};
use super::key_exchange::{rsa_premaster, DhGroup, DhKeyPair, EphemeralKey};
use super::signing::{offered_schemes, select_scheme, sign_certificate_verify, verify_server_params};
use super::srp::{client_premaster, SrpGroup};
use super::{
    check_finished, finished_data, pending_states, unexpected, HandshakePhase, Negotiated, Output,
};
use crate::config::{CertificateType, CertifiedKey, ClientCredentials, HandshakeSettings};
use crate::crypt::key_schedule::derive_master_secret;
use crate::crypt::keylog::log_master_secret;
use crate::crypt::transcript::HandshakeTranscript;
use crate::crypt::{CipherSuiteParams, KeyExchangeAlg, SignatureScheme};
use crate::extensions::{self, Extension, ExtensionType, EC_POINT_FORMAT_UNCOMPRESSED, SERVER_NAME_HOST};
use crate::session::Session;
use crate::{CipherSuite, TlsRole, TlsVersion};
use litetls_crypto::{AsymmetricKey, CertificateChain, CryptoProvider};
use litetls_types::{AlertDescription, TlsError};

/// Client handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Start,
    WaitServerHello,
    WaitCertificate,
    WaitServerKeyExchange,
    /// After the server's key material: CertificateRequest or
    /// ServerHelloDone.
    WaitCertificateRequest,
    WaitServerHelloDone,
    WaitChangeCipherSpec,
    WaitFinished,
    Established,
}

/// Premaster agreement prepared while reading the server's flight.
enum PendingKeyExchange {
    Rsa,
    Ephemeral {
        client_public: Vec<u8>,
        premaster: Vec<u8>,
    },
}

impl Drop for PendingKeyExchange {
    fn drop(&mut self) {
        if let PendingKeyExchange::Ephemeral { premaster, .. } = self {
            premaster.zeroize();
        }
    }
}

/// Client side of one handshake.
pub struct ClientHandshake {
    provider: Arc<dyn CryptoProvider>,
    settings: HandshakeSettings,
    credentials: ClientCredentials,
    offered_session: Option<Session>,
    server_name: Option<String>,
    alpn: Vec<Vec<u8>>,

    state: ClientState,
    phase: HandshakePhase,
    transcript: HandshakeTranscript,
    client_random: [u8; 32],
    server_random: [u8; 32],
    offered_suites: Vec<CipherSuite>,
    sent_extensions: Vec<ExtensionType>,

    negotiated: Option<Negotiated>,
    session_id: Vec<u8>,
    resuming: bool,
    extended_master_secret: bool,
    encrypt_then_mac: bool,
    alpn_protocol: Option<Vec<u8>>,
    server_certificates: Option<CertificateChain>,
    server_key: Option<Arc<dyn AsymmetricKey>>,
    key_exchange: Option<PendingKeyExchange>,
    certificate_request: Option<CertificateRequest>,
    local_certificates: Option<CertificateChain>,
    master_secret: Vec<u8>,
    client_finished: Vec<u8>,
    server_finished: Vec<u8>,
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl ClientHandshake {
    /// Prepare a client handshake. Settings are validated here.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        settings: HandshakeSettings,
        credentials: ClientCredentials,
        session: Option<Session>,
        server_name: Option<String>,
        alpn: Vec<Vec<u8>>,
    ) -> Result<Self, TlsError> {
        settings.validate()?;
        if alpn.iter().any(|p| p.is_empty() || p.len() > 255) {
            return Err(TlsError::InvalidConfig(
                "ALPN protocol names must be 1..=255 bytes".into(),
            ));
        }
        Ok(Self {
            provider,
            settings,
            credentials,
            offered_session: session,
            server_name,
            alpn,
            state: ClientState::Start,
            phase: HandshakePhase::Start,
            transcript: HandshakeTranscript::new(),
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            offered_suites: Vec::new(),
            sent_extensions: Vec::new(),
            negotiated: None,
            session_id: Vec::new(),
            resuming: false,
            extended_master_secret: false,
            encrypt_then_mac: false,
            alpn_protocol: None,
            server_certificates: None,
            server_key: None,
            key_exchange: None,
            certificate_request: None,
            local_certificates: None,
            master_secret: Vec::new(),
            client_finished: Vec::new(),
            server_finished: Vec::new(),
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether the server accepted the offered session.
    pub fn is_resumed(&self) -> bool {
        self.resuming
    }

    /// The cached session being resumed, once the server accepted it.
    pub(crate) fn resumed_session(&self) -> Option<&Session> {
        self.offered_session.as_ref().filter(|_| self.resuming)
    }

    /// Cipher suites the client can offer with its credentials.
    fn usable_suites(&self) -> Vec<&'static CipherSuiteParams> {
        self.settings
            .cipher_suites()
            .into_iter()
            .filter(|p| self.credentials.permits(p.kx))
            .filter(|p| p.supports_version(self.settings.max_version))
            .collect()
    }

    /// The cached session to offer, if it is compatible with this
    /// handshake.
    fn resumable_session(&self, suites: &[&'static CipherSuiteParams]) -> Option<&Session> {
        let session = self.offered_session.as_ref()?;
        let srp_user = match &self.credentials {
            ClientCredentials::Srp { username, .. } => Some(username.as_str()),
            _ => None,
        };
        let compatible = session.can_resume()
            && session.version >= self.settings.min_version
            && session.version <= self.settings.max_version
            && suites.iter().any(|p| p.suite == session.cipher_suite)
            && session.srp_username.as_deref() == srp_user
            && session.server_name == self.server_name;
        compatible.then_some(session)
    }

    /// Build and queue the ClientHello.
    pub fn start(&mut self) -> Result<Vec<Output>, TlsError> {
        if self.state != ClientState::Start {
            return Err(unexpected("start", self.state));
        }
        let suites = self.usable_suites();
        if suites.is_empty() {
            return Err(TlsError::InvalidConfig(
                "no enabled cipher suite matches the client credentials".into(),
            ));
        }
        self.provider.fill_random(&mut self.client_random)?;

        let session_id = self
            .resumable_session(&suites)
            .map(|s| s.session_id.clone())
            .unwrap_or_default();
        if !session_id.is_empty() {
            debug!("offering session resumption");
        }

        let mut cipher_suites: Vec<CipherSuite> = suites.iter().map(|p| p.suite).collect();
        self.offered_suites = cipher_suites.clone();
        cipher_suites.push(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);
        if self.settings.send_fallback_scsv {
            cipher_suites.push(CipherSuite::TLS_FALLBACK_SCSV);
        }

        let extensions = if self.settings.max_version > TlsVersion::Ssl30 {
            Some(self.hello_extensions(&suites))
        } else {
            None
        };
        self.sent_extensions = extensions
            .iter()
            .flatten()
            .map(Extension::extension_type)
            .collect();

        let hello = HandshakeMessage::ClientHello(ClientHello {
            client_version: self.settings.max_version.wire(),
            random: self.client_random,
            session_id: session_id.clone(),
            cipher_suites,
            compression_methods: vec![0],
            extensions,
        });
        self.session_id = session_id;
        let raw = hello.encode(&DecodeContext::default());
        self.transcript.update(&raw);
        self.state = ClientState::WaitServerHello;
        debug!(
            max_version = %self.settings.max_version,
            suites = self.offered_suites.len(),
            "ClientHello sent"
        );
        Ok(vec![Output::Send(raw)])
    }

    fn hello_extensions(&self, suites: &[&'static CipherSuiteParams]) -> Vec<Extension> {
        let mut exts = Vec::new();
        if let Some(name) = &self.server_name {
            exts.push(Extension::ServerName(vec![(
                SERVER_NAME_HOST,
                name.as_bytes().to_vec(),
            )]));
        }
        if suites.iter().any(|p| p.kx.is_ecc()) {
            exts.push(Extension::SupportedGroups(self.settings.ecc_curves.clone()));
            exts.push(Extension::EcPointFormats(vec![EC_POINT_FORMAT_UNCOMPRESSED]));
        }
        if let ClientCredentials::Srp { username, .. } = &self.credentials {
            exts.push(Extension::Srp(username.as_bytes().to_vec()));
        }
        // X.509 alone is what a peer assumes without the extension.
        if self.settings.certificate_types != [CertificateType::X509] {
            exts.push(Extension::CertTypes(self.settings.certificate_types.clone()));
        }
        if self.settings.max_version >= TlsVersion::Tls12 {
            exts.push(Extension::SignatureAlgorithms(offered_schemes(
                &self.settings.rsa_sig_hashes,
            )));
        }
        if !self.alpn.is_empty() {
            exts.push(Extension::Alpn(self.alpn.clone()));
        }
        if self.settings.use_encrypt_then_mac && suites.iter().any(|p| !p.is_aead()) {
            exts.push(Extension::EncryptThenMac);
        }
        if self.settings.use_extended_master_secret {
            exts.push(Extension::ExtendedMasterSecret);
        }
        exts
    }

    fn decode_context(&self) -> DecodeContext {
        DecodeContext {
            version: self.negotiated.as_ref().map(|n| n.version),
            kx: self.negotiated.as_ref().map(|n| n.params.kx),
        }
    }

    fn negotiated(&self) -> Result<Negotiated, TlsError> {
        self.negotiated.ok_or_else(|| {
            TlsError::alert(AlertDescription::InternalError, "no negotiated parameters")
        })
    }

    /// Process one complete handshake message (header included).
    pub fn handle_message(&mut self, raw: &[u8]) -> Result<Vec<Output>, TlsError> {
        let (msg_type, body, _) = parse_handshake_header(raw)
            .ok_or_else(|| TlsError::alert(AlertDescription::DecodeError, "truncated handshake"))?;
        let msg = HandshakeMessage::decode(msg_type, body, &self.decode_context())?;
        debug!(msg = msg.handshake_type().name(), "client received");

        match (self.state, msg) {
            // HelloRequest mid-handshake is ignored (RFC 5246 §7.4.1.1).
            (_, HandshakeMessage::HelloRequest) => Ok(Vec::new()),
            (ClientState::WaitServerHello, HandshakeMessage::ServerHello(sh)) => {
                self.process_server_hello(raw, sh)
            }
            (ClientState::WaitCertificate, HandshakeMessage::Certificate(cert)) => {
                self.process_certificate(raw, cert)
            }
            (ClientState::WaitServerKeyExchange, HandshakeMessage::ServerKeyExchange(ske)) => {
                self.process_server_key_exchange(raw, ske)
            }
            (ClientState::WaitCertificateRequest, HandshakeMessage::CertificateRequest(req)) => {
                self.process_certificate_request(raw, req)
            }
            (
                ClientState::WaitCertificateRequest | ClientState::WaitServerHelloDone,
                HandshakeMessage::ServerHelloDone,
            ) => self.process_server_hello_done(raw),
            (ClientState::WaitFinished, HandshakeMessage::Finished(verify_data)) => {
                self.process_finished(raw, &verify_data)
            }
            (state, msg) => Err(unexpected(msg.handshake_type().name(), state)),
        }
    }

    /// The server's ChangeCipherSpec arrived. The caller switches the read
    /// direction to the pending state after this returns.
    pub fn handle_change_cipher_spec(&mut self) -> Result<Vec<Output>, TlsError> {
        if self.state != ClientState::WaitChangeCipherSpec {
            return Err(unexpected("ChangeCipherSpec", self.state));
        }
        self.state = ClientState::WaitFinished;
        self.phase = HandshakePhase::ChangeCipherSpecReceived;
        Ok(Vec::new())
    }

    fn process_server_hello(&mut self, raw: &[u8], sh: ServerHello) -> Result<Vec<Output>, TlsError> {
        let illegal = |reason: String| TlsError::alert(AlertDescription::IllegalParameter, reason);

        let version = TlsVersion::from_wire(sh.server_version)
            .filter(|v| *v <= self.settings.max_version)
            .ok_or_else(|| {
                illegal(format!("server chose version 0x{:04x}", sh.server_version))
            })?;
        if version < self.settings.min_version {
            return Err(TlsError::alert(
                AlertDescription::ProtocolVersion,
                format!("server chose {version}, below the minimum"),
            ));
        }
        if !self.offered_suites.contains(&sh.cipher_suite) {
            return Err(illegal(format!("server chose unoffered suite {}", sh.cipher_suite)));
        }
        let params = CipherSuiteParams::lookup(sh.cipher_suite)
            .ok_or_else(|| illegal(format!("unknown suite {}", sh.cipher_suite)))?;
        if !params.supports_version(version) {
            return Err(illegal(format!("{} is not valid at {version}", params.name)));
        }
        if sh.compression_method != 0 {
            return Err(illegal("server chose a compression method".into()));
        }
        let extensions = sh.extensions.unwrap_or_default();
        self.check_server_extensions(&extensions, params, version)?;

        self.server_random = sh.random;
        self.transcript.update(raw);
        self.negotiated = Some(Negotiated::new(params, version));
        self.phase = HandshakePhase::HelloExchanged;
        debug!(%version, suite = params.name, "ServerHello accepted");

        let mut out = vec![Output::SetVersion(version)];

        let echoed = !self.session_id.is_empty() && sh.session_id == self.session_id;
        let resumed = self.offered_session.clone().filter(|_| echoed);
        self.session_id = sh.session_id;
        let Some(session) = resumed else {
            if self.offered_session.is_some() {
                debug!("server declined session resumption");
            }
            self.state = if params.kx.requires_certificate() {
                ClientState::WaitCertificate
            } else {
                ClientState::WaitServerKeyExchange
            };
            return Ok(out);
        };

        if session.cipher_suite != params.suite || session.version != version {
            return Err(illegal("resumed session parameters changed".into()));
        }
        if session.extended_master_secret != self.extended_master_secret {
            return Err(TlsError::alert(
                AlertDescription::HandshakeFailure,
                "extended master secret use differs from the resumed session",
            ));
        }
        debug!("session resumed");
        self.resuming = true;
        self.master_secret = session.master_secret.clone();
        self.server_certificates = session.peer_certificates.clone();
        self.local_certificates = session.local_certificates.clone();
        let neg = self.negotiated()?;
        out.push(pending_states(
            &self.provider,
            &neg,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Client,
            self.encrypt_then_mac,
        )?);
        self.phase = HandshakePhase::KeyExchanged;
        self.state = ClientState::WaitChangeCipherSpec;
        Ok(out)
    }

    /// Every ServerHello extension must answer one we sent.
    fn check_server_extensions(
        &mut self,
        extensions: &[Extension],
        params: &CipherSuiteParams,
        version: TlsVersion,
    ) -> Result<(), TlsError> {
        let illegal = |reason: &str| TlsError::alert(AlertDescription::IllegalParameter, reason);
        for ext in extensions {
            let typ = ext.extension_type();
            if typ != ExtensionType::RENEGOTIATION_INFO && !self.sent_extensions.contains(&typ) {
                return Err(illegal("server sent an extension the client did not offer"));
            }
            match ext {
                Extension::RenegotiationInfo(data) if !data.is_empty() => {
                    return Err(TlsError::alert(
                        AlertDescription::HandshakeFailure,
                        "non-empty renegotiation_info on an initial handshake",
                    ));
                }
                Extension::ServerName(names) if !names.is_empty() => {
                    return Err(illegal("server_name acknowledgement must be empty"));
                }
                Extension::Alpn(protocols) => {
                    let [selected] = protocols.as_slice() else {
                        return Err(illegal("server must select exactly one ALPN protocol"));
                    };
                    if !self.alpn.contains(selected) {
                        return Err(illegal("server selected an ALPN protocol not offered"));
                    }
                    self.alpn_protocol = Some(selected.clone());
                }
                Extension::EcPointFormats(formats)
                    if !formats.contains(&EC_POINT_FORMAT_UNCOMPRESSED) =>
                {
                    return Err(illegal("server does not support uncompressed points"));
                }
                Extension::EncryptThenMac if params.is_aead() => {
                    return Err(illegal("encrypt_then_mac with an AEAD suite"));
                }
                Extension::EncryptThenMac => {
                    self.encrypt_then_mac = version > TlsVersion::Ssl30;
                }
                Extension::ExtendedMasterSecret => {
                    self.extended_master_secret = version > TlsVersion::Ssl30;
                }
                Extension::CertType(t)
                    if !t.is_supported() || !self.settings.certificate_types.contains(t) =>
                {
                    return Err(TlsError::alert(
                        AlertDescription::UnsupportedCertificate,
                        "server selected an unusable certificate type",
                    ));
                }
                Extension::SignatureAlgorithms(_)
                | Extension::SupportedGroups(_)
                | Extension::Srp(_) => {
                    return Err(illegal("extension not allowed in ServerHello"));
                }
                _ => {}
            }
        }
        if self.settings.require_extended_master_secret && !self.extended_master_secret {
            return Err(TlsError::alert(
                AlertDescription::HandshakeFailure,
                "server does not support extended master secret",
            ));
        }
        Ok(())
    }

    fn process_certificate(&mut self, raw: &[u8], cert: CertificateMsg) -> Result<Vec<Output>, TlsError> {
        if cert.certificate_list.is_empty() {
            return Err(TlsError::alert(
                AlertDescription::BadCertificate,
                "server sent no certificate",
            ));
        }
        let chain = CertificateChain::from_der(cert.certificate_list).map_err(|e| {
            TlsError::alert(AlertDescription::BadCertificate, format!("server certificate: {e}"))
        })?;
        let key = chain.end_entity_public_key().map_err(|e| {
            TlsError::alert(
                AlertDescription::UnsupportedCertificate,
                format!("server public key: {e}"),
            )
        })?;
        self.check_key_size("server RSA key", key.bit_len())?;
        self.transcript.update(raw);
        self.server_certificates = Some(chain);
        self.server_key = Some(key);
        self.phase = HandshakePhase::KeyExchangePending;

        let kx = self.negotiated()?.params.kx;
        if kx == KeyExchangeAlg::Rsa {
            self.key_exchange = Some(PendingKeyExchange::Rsa);
            self.state = ClientState::WaitCertificateRequest;
        } else {
            self.state = ClientState::WaitServerKeyExchange;
        }
        Ok(Vec::new())
    }

    fn check_key_size(&self, what: &str, bits: usize) -> Result<(), TlsError> {
        if bits < self.settings.min_key_size || bits > self.settings.max_key_size {
            return Err(TlsError::alert(
                AlertDescription::InsufficientSecurity,
                format!(
                    "{what} of {bits} bits outside {}..={}",
                    self.settings.min_key_size, self.settings.max_key_size
                ),
            ));
        }
        Ok(())
    }

    fn process_server_key_exchange(
        &mut self,
        raw: &[u8],
        ske: ServerKeyExchange,
    ) -> Result<Vec<Output>, TlsError> {
        let neg = self.negotiated()?;
        let (kx, version) = (neg.params.kx, neg.version);

        if let Some(signed) = &ske.signature {
            let key = self.server_key.as_ref().ok_or_else(|| {
                TlsError::alert(AlertDescription::InternalError, "no server key")
            })?;
            verify_server_params(
                self.provider.as_ref(),
                key,
                version,
                &self.settings.rsa_sig_hashes,
                &self.client_random,
                &self.server_random,
                &ske.params.encode(),
                signed,
            )?;
        }

        let provider = self.provider.as_ref();
        let pending = match ske.params {
            ServerKeyParams::Dh { p, g, ys } => {
                let group = DhGroup::from_params(&p, &g)?;
                self.check_key_size("DH group", group.bits())?;
                let pair = DhKeyPair::generate(provider, group)?;
                PendingKeyExchange::Ephemeral {
                    premaster: pair.compute_shared_secret(&ys)?,
                    client_public: pair.public_key().to_vec(),
                }
            }
            ServerKeyParams::Ecdh { group, public } => {
                if !self.settings.ecc_curves.contains(&group) {
                    return Err(TlsError::alert(
                        AlertDescription::IllegalParameter,
                        format!("server chose unoffered curve 0x{:04x}", group.0),
                    ));
                }
                let pair = EphemeralKey::generate_ecdh(provider, group)?;
                PendingKeyExchange::Ephemeral {
                    premaster: pair.compute_shared_secret(&public)?,
                    client_public: pair.public_key().to_vec(),
                }
            }
            ServerKeyParams::Srp { n, g, salt, b } => {
                let ClientCredentials::Srp { username, password } = &self.credentials else {
                    return Err(TlsError::alert(
                        AlertDescription::InternalError,
                        "SRP suite without SRP credentials",
                    ));
                };
                let group = SrpGroup::from_params(&n, &g).ok_or_else(|| {
                    TlsError::alert(
                        AlertDescription::InsufficientSecurity,
                        "server SRP group is not a known group",
                    )
                })?;
                self.check_key_size("SRP group", group.bits())?;
                let (client_public, premaster) =
                    client_premaster(provider, &group, &salt, &b, username.as_bytes(), password)?;
                PendingKeyExchange::Ephemeral {
                    client_public,
                    premaster,
                }
            }
        };
        debug!(kx = kx.name(), "ServerKeyExchange accepted");
        self.key_exchange = Some(pending);
        self.transcript.update(raw);
        self.phase = HandshakePhase::KeyExchangePending;
        self.state = ClientState::WaitCertificateRequest;
        Ok(Vec::new())
    }

    fn process_certificate_request(
        &mut self,
        raw: &[u8],
        req: CertificateRequest,
    ) -> Result<Vec<Output>, TlsError> {
        let neg = self.negotiated()?;
        if !neg.params.kx.allows_client_auth() {
            return Err(TlsError::alert(
                AlertDescription::HandshakeFailure,
                "certificate requested on an anonymous or SRP exchange",
            ));
        }
        self.transcript.update(raw);
        self.certificate_request = Some(req);
        self.state = ClientState::WaitServerHelloDone;
        Ok(Vec::new())
    }

    /// The certified key and signature scheme to answer a
    /// CertificateRequest with, if we have a suitable one.
    fn client_auth(&self, req: &CertificateRequest) -> Option<(CertifiedKey, Option<SignatureScheme>)> {
        let ClientCredentials::Certificate {
            client_auth: Some(key),
        } = &self.credentials
        else {
            return None;
        };
        if !req.certificate_types.contains(&CLIENT_CERT_TYPE_RSA_SIGN) {
            return None;
        }
        match &req.signature_algorithms {
            Some(schemes) => select_scheme(&self.settings.rsa_sig_hashes, Some(schemes.as_slice()))
                .ok()
                .map(|s| (key.clone(), Some(s))),
            None => Some((key.clone(), None)),
        }
    }

    fn process_server_hello_done(&mut self, raw: &[u8]) -> Result<Vec<Output>, TlsError> {
        self.transcript.update(raw);
        let neg = self.negotiated()?;
        let version = neg.version;
        let ctx = DecodeContext::new(version, neg.params.kx);
        let provider = self.provider.clone();
        let mut out = Vec::new();

        let auth = match &self.certificate_request {
            Some(req) => {
                let auth = self.client_auth(req);
                match &auth {
                    Some((key, _)) => {
                        let msg = HandshakeMessage::Certificate(CertificateMsg {
                            certificate_list: key.chain.certs().to_vec(),
                        })
                        .encode(&ctx);
                        self.transcript.update(&msg);
                        out.push(Output::Send(msg));
                        self.local_certificates = Some(key.chain.clone());
                    }
                    None if version == TlsVersion::Ssl30 => {
                        out.push(Output::Warning(AlertDescription::NoCertificate));
                    }
                    None => {
                        let msg = HandshakeMessage::Certificate(CertificateMsg::default())
                            .encode(&ctx);
                        self.transcript.update(&msg);
                        out.push(Output::Send(msg));
                    }
                }
                auth
            }
            None => None,
        };

        let mut pending = self.key_exchange.take();
        let (cke, mut premaster) = match &mut pending {
            Some(PendingKeyExchange::Rsa) => {
                let key = self.server_key.as_ref().ok_or_else(|| {
                    TlsError::alert(AlertDescription::InternalError, "no server key")
                })?;
                let pms = rsa_premaster(provider.as_ref(), self.settings.max_version.wire())?;
                let encrypted = key.encrypt(&pms)?;
                (ClientKeyExchange::Rsa(encrypted), pms)
            }
            Some(PendingKeyExchange::Ephemeral {
                client_public,
                premaster,
            }) => {
                let cke = match neg.params.kx {
                    KeyExchangeAlg::EcdheRsa | KeyExchangeAlg::EcdhAnon => {
                        ClientKeyExchange::Ecdh(client_public.clone())
                    }
                    KeyExchangeAlg::Srp | KeyExchangeAlg::SrpRsa => {
                        ClientKeyExchange::Srp(client_public.clone())
                    }
                    _ => ClientKeyExchange::Dh(client_public.clone()),
                };
                (cke, std::mem::take(premaster))
            }
            None => {
                return Err(TlsError::alert(
                    AlertDescription::UnexpectedMessage,
                    "ServerHelloDone before the server's key exchange",
                ))
            }
        };
        let cke = HandshakeMessage::ClientKeyExchange(cke).encode(&ctx);
        self.transcript.update(&cke);
        out.push(Output::Send(cke));

        let session_hash = if self.extended_master_secret {
            Some(self.transcript.session_hash(
                provider.as_ref(),
                version,
                neg.params.prf_hash,
            )?)
        } else {
            None
        };
        let master_secret = derive_master_secret(
            provider.as_ref(),
            neg.prf,
            &premaster,
            &self.client_random,
            &self.server_random,
            session_hash.as_deref(),
        );
        premaster.zeroize();
        self.master_secret = master_secret?;
        log_master_secret(&self.settings, &self.client_random, &self.master_secret);
        self.phase = HandshakePhase::KeyExchanged;

        if let Some((key, scheme)) = auth {
            let signed = sign_certificate_verify(
                provider.as_ref(),
                &key.key,
                version,
                scheme,
                &self.transcript,
                &self.master_secret,
            )?;
            let cv = HandshakeMessage::CertificateVerify(signed).encode(&ctx);
            self.transcript.update(&cv);
            out.push(Output::Send(cv));
        }

        out.push(pending_states(
            &provider,
            &neg,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Client,
            self.encrypt_then_mac,
        )?);
        out.push(Output::ChangeCipherSpec);
        out.push(self.send_finished()?);
        self.phase = HandshakePhase::ChangeCipherSpecSent;
        self.state = ClientState::WaitChangeCipherSpec;
        Ok(out)
    }

    fn send_finished(&mut self) -> Result<Output, TlsError> {
        let neg = self.negotiated()?;
        let verify_data = finished_data(
            self.provider.as_ref(),
            &neg,
            &self.master_secret,
            &self.transcript,
            TlsRole::Client,
        )?;
        let msg = HandshakeMessage::Finished(verify_data.clone())
            .encode(&DecodeContext::new(neg.version, neg.params.kx));
        self.transcript.update(&msg);
        self.client_finished = verify_data;
        Ok(Output::Send(msg))
    }

    fn process_finished(&mut self, raw: &[u8], verify_data: &[u8]) -> Result<Vec<Output>, TlsError> {
        let neg = self.negotiated()?;
        let expected = finished_data(
            self.provider.as_ref(),
            &neg,
            &self.master_secret,
            &self.transcript,
            TlsRole::Server,
        )?;
        check_finished(&expected, verify_data)?;
        self.transcript.update(raw);
        self.server_finished = expected;

        let mut out = Vec::new();
        let tls_unique = if self.resuming {
            out.push(Output::ChangeCipherSpec);
            out.push(self.send_finished()?);
            self.server_finished.clone()
        } else {
            self.client_finished.clone()
        };
        self.phase = HandshakePhase::FinishedExchanged;

        let session = self.build_session()?;
        self.state = ClientState::Established;
        self.phase = HandshakePhase::Established;
        self.transcript.reset();
        tracing::info!(
            version = %session.version,
            suite = %session.cipher_suite,
            resumed = self.resuming,
            "client handshake complete"
        );
        out.push(Output::Complete {
            session: Box::new(session),
            tls_unique,
        });
        Ok(out)
    }

    fn build_session(&self) -> Result<Session, TlsError> {
        if self.resuming {
            if let Some(session) = &self.offered_session {
                return Ok(session.clone());
            }
        }
        let neg = self.negotiated()?;
        let mut session = Session::new(self.session_id.clone(), neg.params.suite, neg.version);
        session.master_secret = self.master_secret.clone();
        session.srp_username = match &self.credentials {
            ClientCredentials::Srp { username, .. } => Some(username.clone()),
            _ => None,
        };
        session.peer_certificates = self.server_certificates.clone();
        session.local_certificates = self.local_certificates.clone();
        session.server_name = self.server_name.clone();
        session.alpn_protocol = self.alpn_protocol.clone();
        session.extended_master_secret = self.extended_master_secret;
        session.encrypt_then_mac = self.encrypt_then_mac;
        Ok(session)
    }
}

impl std::fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("resuming", &self.resuming)
            .finish_non_exhaustive()
    }
}
