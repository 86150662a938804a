//! Handshake protocol: message codec, key exchange helpers and the client
//! and server state machines.
//!
//! Each role is an explicit state machine. The connection feeds it whole
//! handshake messages and ChangeCipherSpec events; it answers with a list
//! of [`Output`] actions for the record layer. It never touches I/O.

pub mod client;
pub mod codec;
pub mod key_exchange;
pub mod server;
pub mod signing;
pub mod srp;

use std::sync::Arc;

use crate::crypt::key_schedule::{compute_verify_data, derive_key_block};
use crate::crypt::prf::Prf;
use crate::crypt::transcript::HandshakeTranscript;
use crate::crypt::CipherSuiteParams;
use crate::record::state::ConnectionState;
use crate::session::Session;
use crate::{TlsRole, TlsVersion};
use litetls_crypto::CryptoProvider;
use litetls_types::{AlertDescription, TlsError};
use subtle::ConstantTimeEq;

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(HandshakeType::HelloRequest),
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            11 => Some(HandshakeType::Certificate),
            12 => Some(HandshakeType::ServerKeyExchange),
            13 => Some(HandshakeType::CertificateRequest),
            14 => Some(HandshakeType::ServerHelloDone),
            15 => Some(HandshakeType::CertificateVerify),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HandshakeType::HelloRequest => "HelloRequest",
            HandshakeType::ClientHello => "ClientHello",
            HandshakeType::ServerHello => "ServerHello",
            HandshakeType::Certificate => "Certificate",
            HandshakeType::ServerKeyExchange => "ServerKeyExchange",
            HandshakeType::CertificateRequest => "CertificateRequest",
            HandshakeType::ServerHelloDone => "ServerHelloDone",
            HandshakeType::CertificateVerify => "CertificateVerify",
            HandshakeType::ClientKeyExchange => "ClientKeyExchange",
            HandshakeType::Finished => "Finished",
        }
    }
}

/// Coarse handshake progress, shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Start,
    /// Hellos exchanged, parameters negotiated.
    HelloExchanged,
    /// Waiting for or building the key exchange messages.
    KeyExchangePending,
    /// Premaster agreed, master secret derived.
    KeyExchanged,
    ChangeCipherSpecSent,
    ChangeCipherSpecReceived,
    /// Our Finished sent and the peer's verified (or vice versa, pending
    /// the last flight).
    FinishedExchanged,
    Established,
    Aborted,
}

/// An action the connection performs on behalf of a state machine, in
/// order.
pub enum Output {
    /// Fix the record version for both directions.
    SetVersion(TlsVersion),
    /// Queue a handshake message (already in the transcript).
    Send(Vec<u8>),
    /// Queue a warning alert.
    Warning(AlertDescription),
    /// Install pending read and write states.
    InstallPending {
        read: Box<ConnectionState>,
        write: Box<ConnectionState>,
    },
    /// Send ChangeCipherSpec and switch the write direction to the
    /// pending state.
    ChangeCipherSpec,
    /// Abandon the connection without an alert (server intolerance
    /// simulation); `reset` asks the transport for an abortive close.
    Drop { reset: bool },
    /// The handshake finished. `tls_unique` is the first Finished
    /// verify_data of this handshake (RFC 5929).
    Complete {
        session: Box<Session>,
        tls_unique: Vec<u8>,
    },
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::SetVersion(v) => write!(f, "SetVersion({v})"),
            Output::Send(m) => write!(f, "Send({} bytes)", m.len()),
            Output::Warning(d) => write!(f, "Warning({d})"),
            Output::InstallPending { .. } => f.write_str("InstallPending"),
            Output::ChangeCipherSpec => f.write_str("ChangeCipherSpec"),
            Output::Drop { reset } => write!(f, "Drop {{ reset: {reset} }}"),
            Output::Complete { session, .. } => write!(f, "Complete({session:?})"),
        }
    }
}

/// Negotiated values that key derivation needs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Negotiated {
    pub params: &'static CipherSuiteParams,
    pub version: TlsVersion,
    pub prf: Prf,
}

impl Negotiated {
    pub fn new(params: &'static CipherSuiteParams, version: TlsVersion) -> Self {
        Self {
            params,
            version,
            prf: Prf::for_version(version, params.prf_hash),
        }
    }
}

/// Build the pending (read, write) states for `role` from the master
/// secret.
pub(crate) fn pending_states(
    provider: &Arc<dyn CryptoProvider>,
    neg: &Negotiated,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    role: TlsRole,
    encrypt_then_mac: bool,
) -> Result<Output, TlsError> {
    let key_block = derive_key_block(
        provider.as_ref(),
        neg.prf,
        master_secret,
        client_random,
        server_random,
        neg.params,
    )?;
    let peer = match role {
        TlsRole::Client => TlsRole::Server,
        TlsRole::Server => TlsRole::Client,
    };
    let state = |writer| {
        ConnectionState::from_key_block(
            provider.clone(),
            neg.params,
            neg.version,
            &key_block,
            writer,
            encrypt_then_mac,
        )
    };
    Ok(Output::InstallPending {
        read: Box::new(state(peer)?),
        write: Box::new(state(role)?),
    })
}

/// verify_data for the Finished sent by `sender` over `transcript`.
pub(crate) fn finished_data(
    provider: &dyn CryptoProvider,
    neg: &Negotiated,
    master_secret: &[u8],
    transcript: &HandshakeTranscript,
    sender: TlsRole,
) -> Result<Vec<u8>, TlsError> {
    compute_verify_data(
        provider,
        neg.prf,
        master_secret,
        transcript,
        sender,
        neg.version,
    )
}

/// Compare a received Finished against the expected value in constant
/// time.
pub(crate) fn check_finished(expected: &[u8], received: &[u8]) -> Result<(), TlsError> {
    if expected.len() == received.len() && bool::from(expected.ct_eq(received)) {
        Ok(())
    } else {
        Err(TlsError::alert(
            AlertDescription::DecryptError,
            "Finished verify_data mismatch",
        ))
    }
}

pub(crate) fn unexpected(what: &str, state: impl std::fmt::Debug) -> TlsError {
    TlsError::alert(
        AlertDescription::UnexpectedMessage,
        format!("unexpected {what} in state {state:?}"),
    )
}
