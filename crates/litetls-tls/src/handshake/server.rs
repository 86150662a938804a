//! Server handshake state machine.
//!
//! The server answers one ClientHello with either a full flight
//! (ServerHello .. ServerHelloDone) or, on a session cache hit, with
//! ServerHello, ChangeCipherSpec and Finished.

use std::sync::Arc;

use tracing::{debug, warn};
use zeroize::Zeroize;

use super::codec::{
    parse_handshake_header, CertificateMsg, CertificateRequest, ClientHello, ClientKeyExchange,
    DecodeContext, DigitallySigned, HandshakeMessage, ServerHello, ServerKeyExchange,
    ServerKeyParams, CLIENT_CERT_TYPE_RSA_SIGN,
};
use super::key_exchange::{rsa_decrypt_premaster, DhGroup, DhKeyPair, EphemeralKey};
use super::signing::{offered_schemes, select_scheme, sign_server_params, verify_certificate_verify};
use super::srp::SrpServer;
use super::{
    check_finished, finished_data, pending_states, unexpected, HandshakePhase, Negotiated, Output,
};
use crate::config::{CertificateType, HandshakeSettings, IntoleranceType, ServerCredentials};
use crate::crypt::key_schedule::derive_master_secret;
use crate::crypt::keylog::log_master_secret;
use crate::crypt::transcript::HandshakeTranscript;
use crate::crypt::{CipherSuiteParams, KeyExchangeAlg, NamedGroup, SignatureScheme};
use crate::extensions::{self, Extension, EC_POINT_FORMAT_UNCOMPRESSED};
use crate::session::{Session, SessionCache};
use crate::{CipherSuite, TlsRole, TlsVersion};
use litetls_crypto::{AsymmetricKey, CertificateChain, CryptoProvider};
use litetls_types::{AlertDescription, TlsError};

const SESSION_ID_LEN: usize = 32;

/// Server handshake states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    WaitClientHello,
    WaitCertificate,
    WaitClientKeyExchange,
    WaitCertificateVerify,
    WaitChangeCipherSpec,
    WaitFinished,
    Established,
}

/// What the client asked for in its ClientHello extensions.
#[derive(Debug, Default)]
struct ClientOffer {
    srp_username: Option<String>,
    server_name: Option<String>,
    signature_algorithms: Option<Vec<SignatureScheme>>,
    groups: Option<Vec<NamedGroup>>,
    point_formats: Option<Vec<u8>>,
    cert_types: Option<Vec<CertificateType>>,
    /// Type echoed in the ServerHello when the client sent cert_type.
    cert_type: Option<CertificateType>,
    alpn: Option<Vec<Vec<u8>>>,
    encrypt_then_mac: bool,
    extended_master_secret: bool,
    secure_renegotiation: bool,
    sent_server_name: bool,
}

impl ClientOffer {
    fn parse(ch: &ClientHello) -> Result<Self, TlsError> {
        let mut offer = ClientOffer {
            secure_renegotiation: ch
                .cipher_suites
                .contains(&CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV),
            ..Default::default()
        };
        for ext in ch.extensions.iter().flatten() {
            match ext {
                Extension::ServerName(names) => {
                    offer.sent_server_name = true;
                    offer.server_name = extensions::host_name(names);
                }
                Extension::Srp(name) => {
                    let name = String::from_utf8(name.clone()).map_err(|_| {
                        TlsError::alert(AlertDescription::IllegalParameter, "SRP username is not UTF-8")
                    })?;
                    offer.srp_username = Some(name);
                }
                Extension::SignatureAlgorithms(schemes) => {
                    offer.signature_algorithms = Some(schemes.clone())
                }
                Extension::SupportedGroups(groups) => offer.groups = Some(groups.clone()),
                Extension::EcPointFormats(formats) => offer.point_formats = Some(formats.clone()),
                Extension::CertTypes(types) => offer.cert_types = Some(types.clone()),
                Extension::Alpn(protocols) => offer.alpn = Some(protocols.clone()),
                Extension::EncryptThenMac => offer.encrypt_then_mac = true,
                Extension::ExtendedMasterSecret => offer.extended_master_secret = true,
                Extension::RenegotiationInfo(data) => {
                    if !data.is_empty() {
                        return Err(TlsError::alert(
                            AlertDescription::HandshakeFailure,
                            "non-empty renegotiation_info on an initial handshake",
                        ));
                    }
                    offer.secure_renegotiation = true;
                }
                _ => {}
            }
        }
        Ok(offer)
    }
}

/// Key exchange material held between ServerKeyExchange and
/// ClientKeyExchange.
enum ServerKeyState {
    Rsa,
    Ephemeral(EphemeralKey),
    Srp(SrpServer),
}

/// Server side of one handshake.
pub struct ServerHandshake {
    provider: Arc<dyn CryptoProvider>,
    settings: HandshakeSettings,
    credentials: ServerCredentials,
    cache: Option<Arc<dyn SessionCache>>,

    state: ServerState,
    phase: HandshakePhase,
    transcript: HandshakeTranscript,
    client_random: [u8; 32],
    server_random: [u8; 32],
    client_version: u16,

    negotiated: Option<Negotiated>,
    session_id: Vec<u8>,
    resumed: Option<Session>,
    offer: ClientOffer,
    extended_master_secret: bool,
    encrypt_then_mac: bool,
    alpn_protocol: Option<Vec<u8>>,
    key_state: Option<ServerKeyState>,
    client_certificates: Option<CertificateChain>,
    client_key: Option<Arc<dyn AsymmetricKey>>,
    master_secret: Vec<u8>,
    client_finished: Vec<u8>,
    server_finished: Vec<u8>,
}

impl Drop for ServerHandshake {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

impl ServerHandshake {
    /// Prepare a server handshake. Settings are validated here.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        settings: HandshakeSettings,
        credentials: ServerCredentials,
        cache: Option<Arc<dyn SessionCache>>,
    ) -> Result<Self, TlsError> {
        settings.validate()?;
        if !settings
            .cipher_suites()
            .iter()
            .any(|p| credentials.permits(p.kx))
        {
            return Err(TlsError::InvalidConfig(
                "no enabled cipher suite matches the server credentials".into(),
            ));
        }
        Ok(Self {
            provider,
            settings,
            credentials,
            cache,
            state: ServerState::WaitClientHello,
            phase: HandshakePhase::Start,
            transcript: HandshakeTranscript::new(),
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            client_version: 0,
            negotiated: None,
            session_id: Vec::new(),
            resumed: None,
            offer: ClientOffer::default(),
            extended_master_secret: false,
            encrypt_then_mac: false,
            alpn_protocol: None,
            key_state: None,
            client_certificates: None,
            client_key: None,
            master_secret: Vec::new(),
            client_finished: Vec::new(),
            server_finished: Vec::new(),
        })
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed.is_some()
    }

    pub(crate) fn resumed_session(&self) -> Option<&Session> {
        self.resumed.as_ref()
    }

    fn negotiated(&self) -> Result<Negotiated, TlsError> {
        self.negotiated.ok_or_else(|| {
            TlsError::alert(AlertDescription::InternalError, "no negotiated parameters")
        })
    }

    fn decode_context(&self) -> DecodeContext {
        DecodeContext {
            version: self.negotiated.as_ref().map(|n| n.version),
            kx: self.negotiated.as_ref().map(|n| n.params.kx),
        }
    }

    /// Process one complete handshake message (header included).
    pub fn handle_message(&mut self, raw: &[u8]) -> Result<Vec<Output>, TlsError> {
        let (msg_type, body, _) = parse_handshake_header(raw)
            .ok_or_else(|| TlsError::alert(AlertDescription::DecodeError, "truncated handshake"))?;
        let msg = HandshakeMessage::decode(msg_type, body, &self.decode_context())?;
        debug!(msg = msg.handshake_type().name(), "server received");

        match (self.state, msg) {
            (ServerState::WaitClientHello, HandshakeMessage::ClientHello(ch)) => {
                self.process_client_hello(raw, ch)
            }
            (ServerState::WaitCertificate, HandshakeMessage::Certificate(cert)) => {
                self.process_client_certificate(raw, cert)
            }
            (ServerState::WaitClientKeyExchange, HandshakeMessage::ClientKeyExchange(cke)) => {
                self.process_client_key_exchange(raw, cke)
            }
            (ServerState::WaitCertificateVerify, HandshakeMessage::CertificateVerify(signed)) => {
                self.process_certificate_verify(raw, signed)
            }
            (ServerState::WaitFinished, HandshakeMessage::Finished(verify_data)) => {
                self.process_finished(raw, &verify_data)
            }
            (state, msg) => Err(unexpected(msg.handshake_type().name(), state)),
        }
    }

    /// An SSL 3.0 client answers a CertificateRequest it cannot satisfy
    /// with a no_certificate warning instead of an empty Certificate.
    pub fn handle_warning(&mut self, description: AlertDescription) -> bool {
        if self.state == ServerState::WaitCertificate
            && description == AlertDescription::NoCertificate
        {
            debug!("client declined authentication");
            self.state = ServerState::WaitClientKeyExchange;
            return true;
        }
        false
    }

    /// The client's ChangeCipherSpec arrived. The caller switches the read
    /// direction to the pending state after this returns.
    pub fn handle_change_cipher_spec(&mut self) -> Result<Vec<Output>, TlsError> {
        if self.state != ServerState::WaitChangeCipherSpec {
            return Err(unexpected("ChangeCipherSpec", self.state));
        }
        self.state = ServerState::WaitFinished;
        self.phase = HandshakePhase::ChangeCipherSpecReceived;
        Ok(Vec::new())
    }

    /// Version negotiation and the test-only intolerance and fallback
    /// checks. Returns `None` when the connection is to be dropped.
    fn negotiate_version(&self, ch: &ClientHello) -> Result<Option<TlsVersion>, TlsError> {
        let client_version = ch.client_version;
        if client_version >> 8 < 3 {
            return Err(TlsError::alert(
                AlertDescription::ProtocolVersion,
                format!("client version 0x{client_version:04x} is too old"),
            ));
        }
        if client_version < self.settings.min_version.wire() {
            return Err(TlsError::alert(
                AlertDescription::ProtocolVersion,
                format!(
                    "client version 0x{client_version:04x} below {}",
                    self.settings.min_version
                ),
            ));
        }
        if let Some(intolerant) = self.settings.tls_intolerant {
            if client_version >= intolerant.wire() {
                debug!(kind = ?self.settings.intolerance_type, "simulating version intolerance");
                return match self.settings.intolerance_type {
                    IntoleranceType::Alert => Err(TlsError::alert(
                        AlertDescription::HandshakeFailure,
                        "version intolerance",
                    )),
                    IntoleranceType::Close | IntoleranceType::Reset => Ok(None),
                };
            }
        }
        let max = self.settings.max_version;
        if ch.cipher_suites.contains(&CipherSuite::TLS_FALLBACK_SCSV) && client_version < max.wire()
        {
            return Err(TlsError::alert(
                AlertDescription::InappropriateFallback,
                "fallback SCSV below the highest supported version",
            ));
        }
        let version = if client_version >= max.wire() {
            max
        } else {
            TlsVersion::from_wire(client_version).ok_or_else(|| {
                TlsError::alert(AlertDescription::ProtocolVersion, "unknown client version")
            })?
        };
        Ok(Some(version))
    }

    /// First type in our preference order that the client offered and
    /// that we can serve.
    fn select_cert_type(&self, offered: &[CertificateType]) -> Result<CertificateType, TlsError> {
        self.settings
            .certificate_types
            .iter()
            .copied()
            .find(|t| t.is_supported() && offered.contains(t))
            .ok_or_else(|| {
                TlsError::alert(
                    AlertDescription::UnsupportedCertificate,
                    "no common certificate type",
                )
            })
    }

    fn process_client_hello(&mut self, raw: &[u8], ch: ClientHello) -> Result<Vec<Output>, TlsError> {
        let Some(version) = self.negotiate_version(&ch)? else {
            let reset = self.settings.intolerance_type == IntoleranceType::Reset;
            return Ok(vec![Output::Drop { reset }]);
        };
        if !ch.compression_methods.contains(&0) {
            return Err(TlsError::alert(
                AlertDescription::IllegalParameter,
                "client does not offer null compression",
            ));
        }
        let mut offer = ClientOffer::parse(&ch)?;
        if let Some(types) = &offer.cert_types {
            offer.cert_type = Some(self.select_cert_type(types)?);
        }
        self.client_random = ch.random;
        self.client_version = ch.client_version;
        self.offer = offer;
        self.transcript.update(raw);
        self.provider.fill_random(&mut self.server_random)?;
        debug!(client_version = ch.client_version, %version, "ClientHello accepted");

        let legacy = version == TlsVersion::Ssl30;
        let ems_offered = self.offer.extended_master_secret && !legacy;
        if self.settings.require_extended_master_secret && !ems_offered {
            return Err(TlsError::alert(
                AlertDescription::HandshakeFailure,
                "client does not support extended master secret",
            ));
        }
        self.extended_master_secret = ems_offered && self.settings.use_extended_master_secret;

        if let Some(session) = self.lookup_session(&ch, version) {
            return self.resume(session, version);
        }
        self.full_handshake(&ch, version)
    }

    /// Cache lookup on the offered session id. A miss, or a cached session
    /// inconsistent with this ClientHello, falls back to a full handshake.
    fn lookup_session(&self, ch: &ClientHello, version: TlsVersion) -> Option<Session> {
        if ch.session_id.is_empty() {
            return None;
        }
        let cache = self.cache.as_ref()?;
        let Some(session) = cache.get(&ch.session_id) else {
            debug!("session cache miss");
            return None;
        };
        let params = CipherSuiteParams::lookup(session.cipher_suite)?;
        let consistent = session.is_resumable()
            && session.version == version
            && ch.cipher_suites.contains(&session.cipher_suite)
            && self.settings.suite_enabled(params)
            && self.credentials.permits(params.kx)
            && session.srp_username == self.offer.srp_username
            && session.server_name == self.offer.server_name
            && session.extended_master_secret == self.extended_master_secret;
        if !consistent {
            debug!("cached session does not match the ClientHello");
            return None;
        }
        Some(session)
    }

    fn server_hello(&self, suite: CipherSuite, extensions: Vec<Extension>) -> Result<Vec<u8>, TlsError> {
        let neg = self.negotiated()?;
        let extensions = (neg.version > TlsVersion::Ssl30 && !extensions.is_empty())
            .then_some(extensions);
        Ok(HandshakeMessage::ServerHello(ServerHello {
            server_version: neg.version.wire(),
            random: self.server_random,
            session_id: self.session_id.clone(),
            cipher_suite: suite,
            compression_method: 0,
            extensions,
        })
        .encode(&self.decode_context()))
    }

    fn resume(&mut self, session: Session, version: TlsVersion) -> Result<Vec<Output>, TlsError> {
        let params = CipherSuiteParams::lookup(session.cipher_suite).ok_or_else(|| {
            TlsError::alert(AlertDescription::InternalError, "cached suite unknown")
        })?;
        debug!(suite = params.name, "session resumed");
        self.negotiated = Some(Negotiated::new(params, version));
        self.session_id = session.session_id.clone();
        self.master_secret = session.master_secret.clone();
        self.client_certificates = session.peer_certificates.clone();
        self.encrypt_then_mac = session.encrypt_then_mac && self.offer.encrypt_then_mac;
        self.resumed = Some(session);

        let extensions = self.hello_extensions(params)?;
        let sh = self.server_hello(params.suite, extensions)?;
        self.transcript.update(&sh);
        self.phase = HandshakePhase::HelloExchanged;

        let neg = self.negotiated()?;
        let mut out = vec![Output::SetVersion(version), Output::Send(sh)];
        out.push(pending_states(
            &self.provider,
            &neg,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Server,
            self.encrypt_then_mac,
        )?);
        self.phase = HandshakePhase::KeyExchanged;
        out.push(Output::ChangeCipherSpec);
        out.push(self.send_finished()?);
        self.phase = HandshakePhase::ChangeCipherSpecSent;
        self.state = ServerState::WaitChangeCipherSpec;
        Ok(out)
    }

    /// Common curve for ECDHE: the first of ours the client lists. A client
    /// without supported_groups is assumed to accept all of ours.
    fn select_curve(&self) -> Option<NamedGroup> {
        let ours = &self.settings.ecc_curves;
        match &self.offer.groups {
            Some(theirs) => ours.iter().copied().find(|g| theirs.contains(g)),
            None => ours.first().copied(),
        }
    }

    /// First suite in server preference order the client offered and our
    /// credentials can serve at `version`.
    fn select_suite(&self, ch: &ClientHello, version: TlsVersion) -> Option<&'static CipherSuiteParams> {
        self.settings.cipher_suites().into_iter().find(|p| {
            ch.cipher_suites.contains(&p.suite)
                && p.supports_version(version)
                && self.credentials.permits(p.kx)
                && (!p.kx.is_srp() || self.offer.srp_username.is_some())
                && (!p.kx.is_ecc() || self.select_curve().is_some())
        })
    }

    fn hello_extensions(&mut self, params: &CipherSuiteParams) -> Result<Vec<Extension>, TlsError> {
        let mut exts = Vec::new();
        if self.offer.secure_renegotiation {
            exts.push(Extension::RenegotiationInfo(Vec::new()));
        }
        if self.offer.sent_server_name && self.resumed.is_none() {
            exts.push(Extension::ServerName(Vec::new()));
        }
        if self.extended_master_secret {
            exts.push(Extension::ExtendedMasterSecret);
        }
        if self.encrypt_then_mac {
            exts.push(Extension::EncryptThenMac);
        }
        if params.kx.is_ecc() && self.offer.point_formats.is_some() {
            exts.push(Extension::EcPointFormats(vec![EC_POINT_FORMAT_UNCOMPRESSED]));
        }
        if let Some(cert_type) = self.offer.cert_type {
            if params.kx.requires_certificate() {
                exts.push(Extension::CertType(cert_type));
            }
        }
        if let Some(protocols) = &self.offer.alpn {
            if !self.settings.alpn_protocols.is_empty() {
                let selected = self
                    .settings
                    .alpn_protocols
                    .iter()
                    .find(|p| protocols.contains(p))
                    .cloned()
                    .ok_or_else(|| {
                        TlsError::alert(
                            AlertDescription::NoApplicationProtocol,
                            "no common ALPN protocol",
                        )
                    })?;
                self.alpn_protocol = Some(selected);
            }
            if let Some(selected) = &self.alpn_protocol {
                exts.push(Extension::Alpn(vec![selected.clone()]));
            }
        }
        Ok(exts)
    }

    fn full_handshake(&mut self, ch: &ClientHello, version: TlsVersion) -> Result<Vec<Output>, TlsError> {
        let params = self.select_suite(ch, version).ok_or_else(|| {
            TlsError::alert(AlertDescription::HandshakeFailure, "no shared cipher suite")
        })?;
        debug!(%version, suite = params.name, "negotiated");
        self.negotiated = Some(Negotiated::new(params, version));
        self.encrypt_then_mac = self.offer.encrypt_then_mac
            && self.settings.use_encrypt_then_mac
            && !params.is_aead()
            && version > TlsVersion::Ssl30;
        if self.cache.is_some() {
            self.session_id = self.provider.random_vec(SESSION_ID_LEN)?;
        }

        let ctx = DecodeContext::new(version, params.kx);
        let mut out = vec![Output::SetVersion(version)];
        let extensions = self.hello_extensions(params)?;
        let sh = self.server_hello(params.suite, extensions)?;
        self.transcript.update(&sh);
        out.push(Output::Send(sh));
        self.phase = HandshakePhase::HelloExchanged;

        if params.kx.requires_certificate() {
            let certified = self.credentials.certified_key.as_ref().ok_or_else(|| {
                TlsError::alert(AlertDescription::InternalError, "no server certificate")
            })?;
            let msg = HandshakeMessage::Certificate(CertificateMsg {
                certificate_list: certified.chain.certs().to_vec(),
            })
            .encode(&ctx);
            self.transcript.update(&msg);
            out.push(Output::Send(msg));
        }

        if let Some(ske) = self.server_key_exchange(params, version)? {
            let msg = HandshakeMessage::ServerKeyExchange(ske).encode(&ctx);
            self.transcript.update(&msg);
            out.push(Output::Send(msg));
        }
        self.phase = HandshakePhase::KeyExchangePending;

        let request_cert = self.credentials.request_client_cert && params.kx.allows_client_auth();
        if request_cert {
            let msg = HandshakeMessage::CertificateRequest(CertificateRequest {
                certificate_types: vec![CLIENT_CERT_TYPE_RSA_SIGN],
                signature_algorithms: (version >= TlsVersion::Tls12)
                    .then(|| offered_schemes(&self.settings.rsa_sig_hashes)),
                certificate_authorities: Vec::new(),
            })
            .encode(&ctx);
            self.transcript.update(&msg);
            out.push(Output::Send(msg));
        }

        let done = HandshakeMessage::ServerHelloDone.encode(&ctx);
        self.transcript.update(&done);
        out.push(Output::Send(done));
        self.state = if request_cert {
            ServerState::WaitCertificate
        } else {
            ServerState::WaitClientKeyExchange
        };
        Ok(out)
    }

    /// Generate ephemeral parameters and, for authenticated suites, sign
    /// them. RSA key transport sends no ServerKeyExchange.
    fn server_key_exchange(
        &mut self,
        params: &CipherSuiteParams,
        version: TlsVersion,
    ) -> Result<Option<ServerKeyExchange>, TlsError> {
        let provider = self.provider.as_ref();
        let (key_params, state) = match params.kx {
            KeyExchangeAlg::Rsa => {
                self.key_state = Some(ServerKeyState::Rsa);
                return Ok(None);
            }
            KeyExchangeAlg::DheRsa | KeyExchangeAlg::DhAnon => {
                let pair = DhKeyPair::generate(provider, DhGroup::named(self.settings.dh_group)?)?;
                let key_params = ServerKeyParams::Dh {
                    p: pair.group().p_bytes(),
                    g: pair.group().g_bytes(),
                    ys: pair.public_key().to_vec(),
                };
                (key_params, ServerKeyState::Ephemeral(EphemeralKey::Dh(pair)))
            }
            KeyExchangeAlg::EcdheRsa | KeyExchangeAlg::EcdhAnon => {
                let group = self.select_curve().ok_or_else(|| {
                    TlsError::alert(AlertDescription::HandshakeFailure, "no common curve")
                })?;
                let key = EphemeralKey::generate_ecdh(provider, group)?;
                let key_params = ServerKeyParams::Ecdh {
                    group,
                    public: key.public_key().to_vec(),
                };
                (key_params, ServerKeyState::Ephemeral(key))
            }
            KeyExchangeAlg::Srp | KeyExchangeAlg::SrpRsa => {
                let username = self.offer.srp_username.as_deref().unwrap_or_default();
                let verifier = self
                    .credentials
                    .verifier_db
                    .as_ref()
                    .and_then(|db| db.get(username))
                    .ok_or_else(|| {
                        TlsError::alert(
                            AlertDescription::UnknownPskIdentity,
                            format!("unknown SRP user {username:?}"),
                        )
                    })?;
                let server = SrpServer::new(provider, verifier)?;
                let key_params = ServerKeyParams::Srp {
                    n: verifier.group.n_bytes(),
                    g: verifier.group.g_bytes(),
                    salt: verifier.salt.clone(),
                    b: server.public_value(),
                };
                (key_params, ServerKeyState::Srp(server))
            }
        };

        let signature = if params.kx.signs_server_params() {
            let certified = self.credentials.certified_key.as_ref().ok_or_else(|| {
                TlsError::alert(AlertDescription::InternalError, "no server signing key")
            })?;
            let scheme = if version >= TlsVersion::Tls12 {
                Some(select_scheme(
                    &self.settings.rsa_sig_hashes,
                    self.offer.signature_algorithms.as_deref(),
                )?)
            } else {
                None
            };
            Some(sign_server_params(
                provider,
                &certified.key,
                scheme,
                &self.client_random,
                &self.server_random,
                &key_params.encode(),
            )?)
        } else {
            None
        };
        self.key_state = Some(state);
        Ok(Some(ServerKeyExchange {
            params: key_params,
            signature,
        }))
    }

    fn process_client_certificate(
        &mut self,
        raw: &[u8],
        cert: CertificateMsg,
    ) -> Result<Vec<Output>, TlsError> {
        self.transcript.update(raw);
        self.state = ServerState::WaitClientKeyExchange;
        if cert.certificate_list.is_empty() {
            debug!("client sent no certificate");
            return Ok(Vec::new());
        }
        let chain = CertificateChain::from_der(cert.certificate_list).map_err(|e| {
            TlsError::alert(AlertDescription::BadCertificate, format!("client certificate: {e}"))
        })?;
        let key = chain.end_entity_public_key().map_err(|e| {
            TlsError::alert(
                AlertDescription::UnsupportedCertificate,
                format!("client public key: {e}"),
            )
        })?;
        let bits = key.bit_len();
        if bits < self.settings.min_key_size || bits > self.settings.max_key_size {
            return Err(TlsError::alert(
                AlertDescription::InsufficientSecurity,
                format!("client RSA key of {bits} bits"),
            ));
        }
        self.client_certificates = Some(chain);
        self.client_key = Some(key);
        Ok(Vec::new())
    }

    fn process_client_key_exchange(
        &mut self,
        raw: &[u8],
        cke: ClientKeyExchange,
    ) -> Result<Vec<Output>, TlsError> {
        let neg = self.negotiated()?;
        let provider = self.provider.clone();
        let mut premaster = match (self.key_state.take(), cke) {
            (Some(ServerKeyState::Rsa), ClientKeyExchange::Rsa(encrypted)) => {
                let certified = self.credentials.certified_key.as_ref().ok_or_else(|| {
                    TlsError::alert(AlertDescription::InternalError, "no server key")
                })?;
                rsa_decrypt_premaster(
                    provider.as_ref(),
                    &certified.key,
                    &encrypted,
                    self.client_version,
                )?
            }
            (
                Some(ServerKeyState::Ephemeral(key)),
                ClientKeyExchange::Dh(public) | ClientKeyExchange::Ecdh(public),
            ) => key.compute_shared_secret(&public)?,
            (Some(ServerKeyState::Srp(server)), ClientKeyExchange::Srp(public)) => {
                server.premaster(provider.as_ref(), &public)?
            }
            _ => {
                return Err(TlsError::alert(
                    AlertDescription::UnexpectedMessage,
                    "ClientKeyExchange does not match the key exchange",
                ))
            }
        };
        self.transcript.update(raw);

        let session_hash = if self.extended_master_secret {
            Some(self.transcript.session_hash(
                provider.as_ref(),
                neg.version,
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

        let pending = pending_states(
            &provider,
            &neg,
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            TlsRole::Server,
            self.encrypt_then_mac,
        )?;
        self.state = if self.client_key.is_some() {
            ServerState::WaitCertificateVerify
        } else {
            ServerState::WaitChangeCipherSpec
        };
        Ok(vec![pending])
    }

    fn process_certificate_verify(
        &mut self,
        raw: &[u8],
        signed: DigitallySigned,
    ) -> Result<Vec<Output>, TlsError> {
        let neg = self.negotiated()?;
        let key = self.client_key.as_ref().ok_or_else(|| {
            TlsError::alert(AlertDescription::InternalError, "no client key")
        })?;
        verify_certificate_verify(
            self.provider.as_ref(),
            key,
            neg.version,
            &self.settings.rsa_sig_hashes,
            &self.transcript,
            &self.master_secret,
            &signed,
        )?;
        debug!("client certificate verified");
        self.transcript.update(raw);
        self.state = ServerState::WaitChangeCipherSpec;
        Ok(Vec::new())
    }

    fn send_finished(&mut self) -> Result<Output, TlsError> {
        let neg = self.negotiated()?;
        let verify_data = finished_data(
            self.provider.as_ref(),
            &neg,
            &self.master_secret,
            &self.transcript,
            TlsRole::Server,
        )?;
        let msg = HandshakeMessage::Finished(verify_data.clone())
            .encode(&DecodeContext::new(neg.version, neg.params.kx));
        self.transcript.update(&msg);
        self.server_finished = verify_data;
        Ok(Output::Send(msg))
    }

    fn process_finished(&mut self, raw: &[u8], verify_data: &[u8]) -> Result<Vec<Output>, TlsError> {
        let neg = self.negotiated()?;
        let expected = finished_data(
            self.provider.as_ref(),
            &neg,
            &self.master_secret,
            &self.transcript,
            TlsRole::Client,
        )?;
        check_finished(&expected, verify_data)?;
        self.transcript.update(raw);
        self.client_finished = expected;

        let mut out = Vec::new();
        let tls_unique = if self.resumed.is_some() {
            self.server_finished.clone()
        } else {
            out.push(Output::ChangeCipherSpec);
            out.push(self.send_finished()?);
            self.client_finished.clone()
        };
        self.phase = HandshakePhase::FinishedExchanged;

        let session = match &self.resumed {
            Some(session) => session.clone(),
            None => {
                let session = self.build_session(&neg);
                if let Some(cache) = &self.cache {
                    if !session.session_id.is_empty() {
                        cache.put(session.clone());
                    }
                }
                session
            }
        };
        self.state = ServerState::Established;
        self.phase = HandshakePhase::Established;
        self.transcript.reset();
        tracing::info!(
            version = %session.version,
            suite = %session.cipher_suite,
            resumed = self.resumed.is_some(),
            "server handshake complete"
        );
        out.push(Output::Complete {
            session: Box::new(session),
            tls_unique,
        });
        Ok(out)
    }

    fn build_session(&self, neg: &Negotiated) -> Session {
        let mut session = Session::new(self.session_id.clone(), neg.params.suite, neg.version);
        session.master_secret = self.master_secret.clone();
        session.srp_username = self
            .offer
            .srp_username
            .clone()
            .filter(|_| neg.params.kx.is_srp());
        session.peer_certificates = self.client_certificates.clone();
        session.local_certificates = neg
            .params
            .kx
            .requires_certificate()
            .then(|| self.credentials.certified_key.as_ref().map(|k| k.chain.clone()))
            .flatten();
        session.server_name = self.offer.server_name.clone();
        session.alpn_protocol = self.alpn_protocol.clone();
        session.extended_master_secret = self.extended_master_secret;
        session.encrypt_then_mac = self.encrypt_then_mac;
        session
    }
}

impl std::fmt::Debug for ServerHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandshake")
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("resumed", &self.resumed.is_some())
            .finish_non_exhaustive()
    }
}

/// Log, but do not act on, a renegotiation attempt after the handshake.
pub(crate) fn refuse_renegotiation(role: TlsRole) -> Output {
    warn!(?role, "refusing renegotiation");
    Output::Warning(AlertDescription::NoRenegotiation)
}
