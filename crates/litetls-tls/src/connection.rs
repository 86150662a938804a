//! TLS connection over a [`Transport`].
//!
//! The handshake is a resumable state machine: [`TlsConnection::step`]
//! advances it until it needs the transport to become readable or
//! writable and reports which with [`Action::NeedsIo`]. Calling `step`
//! again resumes from the same point. The blocking helpers
//! ([`TlsConnection::handshake_client`], [`TlsConnection::handshake_server`])
//! simply loop on `step`.

use std::io;
use std::sync::Arc;
use std::task::Poll;

use tracing::{debug, warn};

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::config::{ClientCredentials, HandshakeSettings, ServerCredentials};
use crate::handshake::client::ClientHandshake;
use crate::handshake::codec::parse_handshake_header;
use crate::handshake::server::{refuse_renegotiation, ServerHandshake};
use crate::handshake::{HandshakePhase, HandshakeType, Output};
use crate::record::{ContentType, Message, RecordLayer};
use crate::session::{Session, SessionCache};
use crate::transport::Transport;
use crate::{CipherSuite, TlsRole, TlsVersion};
use litetls_crypto::CryptoProvider;
use litetls_types::TlsError;

/// Which way the transport must become ready before `step` can progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// Result of one [`TlsConnection::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The transport would block in this direction.
    NeedsIo(IoDirection),
    /// The handshake is complete.
    Established,
}

enum Handshake {
    Client(Box<ClientHandshake>),
    Server(Box<ServerHandshake>),
}

impl Handshake {
    fn role(&self) -> TlsRole {
        match self {
            Handshake::Client(_) => TlsRole::Client,
            Handshake::Server(_) => TlsRole::Server,
        }
    }

    fn phase(&self) -> HandshakePhase {
        match self {
            Handshake::Client(hs) => hs.phase(),
            Handshake::Server(hs) => hs.phase(),
        }
    }

    fn handle_message(&mut self, raw: &[u8]) -> Result<Vec<Output>, TlsError> {
        match self {
            Handshake::Client(hs) => hs.handle_message(raw),
            Handshake::Server(hs) => hs.handle_message(raw),
        }
    }

    fn handle_change_cipher_spec(&mut self) -> Result<Vec<Output>, TlsError> {
        match self {
            Handshake::Client(hs) => hs.handle_change_cipher_spec(),
            Handshake::Server(hs) => hs.handle_change_cipher_spec(),
        }
    }

    fn resumed_session(&self) -> Option<&Session> {
        match self {
            Handshake::Client(hs) => hs.resumed_session(),
            Handshake::Server(hs) => hs.resumed_session(),
        }
    }
}

/// Connection state.
enum ConnectionState {
    Idle,
    Handshaking(Handshake),
    Connected,
    /// close_notify sent or received.
    Closed,
    /// A fatal error occurred; the transport is not touched again.
    Aborted,
}

/// A TLS connection driving a transport through the handshake and record
/// protocol.
pub struct TlsConnection<T: Transport> {
    transport: T,
    provider: Arc<dyn CryptoProvider>,
    record: RecordLayer,
    state: ConnectionState,
    role: Option<TlsRole>,
    session: Option<Session>,
    tls_unique: Vec<u8>,
    app_data_buf: Vec<u8>,
    sent_close_notify: bool,
}

impl<T: Transport> TlsConnection<T> {
    /// Wrap a transport. Nothing is sent until a handshake is started.
    pub fn new(transport: T, provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            transport,
            provider,
            record: RecordLayer::new(TlsVersion::Tls10),
            state: ConnectionState::Idle,
            role: None,
            session: None,
            tls_unique: Vec::new(),
            app_data_buf: Vec::new(),
            sent_close_notify: false,
        }
    }

    /// Begin a client handshake without blocking. Drive it with
    /// [`step`](Self::step).
    pub fn start_client_handshake(
        &mut self,
        credentials: ClientCredentials,
        settings: HandshakeSettings,
        session: Option<Session>,
        server_name: Option<String>,
        alpn: Vec<Vec<u8>>,
    ) -> Result<(), TlsError> {
        self.ensure_idle()?;
        let min_version = settings.min_version;
        let mut hs = ClientHandshake::new(
            self.provider.clone(),
            settings,
            credentials,
            session,
            server_name,
            alpn,
        )?;
        let outputs = hs.start()?;
        self.record = RecordLayer::new(min_version);
        self.role = Some(TlsRole::Client);
        self.state = ConnectionState::Handshaking(Handshake::Client(Box::new(hs)));
        self.apply(outputs).map_err(|e| self.fail(e))
    }

    /// Begin a server handshake without blocking. Drive it with
    /// [`step`](Self::step).
    pub fn start_server_handshake(
        &mut self,
        credentials: ServerCredentials,
        settings: HandshakeSettings,
        cache: Option<Arc<dyn SessionCache>>,
    ) -> Result<(), TlsError> {
        self.ensure_idle()?;
        let min_version = settings.min_version;
        let hs = ServerHandshake::new(self.provider.clone(), settings, credentials, cache)?;
        self.record = RecordLayer::new(min_version);
        self.role = Some(TlsRole::Server);
        self.state = ConnectionState::Handshaking(Handshake::Server(Box::new(hs)));
        Ok(())
    }

    /// Run a client handshake to completion.
    pub fn handshake_client(
        &mut self,
        credentials: ClientCredentials,
        settings: HandshakeSettings,
        session: Option<Session>,
        server_name: Option<String>,
        alpn: Vec<Vec<u8>>,
    ) -> Result<Session, TlsError> {
        self.start_client_handshake(credentials, settings, session, server_name, alpn)?;
        self.finish_handshake()
    }

    /// Run a server handshake to completion.
    pub fn handshake_server(
        &mut self,
        credentials: ServerCredentials,
        settings: HandshakeSettings,
        cache: Option<Arc<dyn SessionCache>>,
    ) -> Result<Session, TlsError> {
        self.start_server_handshake(credentials, settings, cache)?;
        self.finish_handshake()
    }

    fn finish_handshake(&mut self) -> Result<Session, TlsError> {
        while self.step()? != Action::Established {}
        self.session.clone().ok_or(TlsError::Closed)
    }

    fn ensure_idle(&self) -> Result<(), TlsError> {
        match self.state {
            ConnectionState::Idle => Ok(()),
            _ => Err(TlsError::InvalidConfig("handshake already started".into())),
        }
    }

    /// Advance the handshake as far as the transport allows.
    pub fn step(&mut self) -> Result<Action, TlsError> {
        match self.drive_handshake() {
            Ok(action) => Ok(action),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn drive_handshake(&mut self) -> Result<Action, TlsError> {
        loop {
            match self.record.poll_flush(&mut self.transport) {
                Poll::Pending => return Ok(Action::NeedsIo(IoDirection::Write)),
                Poll::Ready(result) => result?,
            }
            let hs = match &mut self.state {
                ConnectionState::Handshaking(hs) => hs,
                ConnectionState::Connected => return Ok(Action::Established),
                _ => return Err(TlsError::Closed),
            };
            let msg = match self.record.poll_message(&mut self.transport) {
                Poll::Pending => return Ok(Action::NeedsIo(IoDirection::Read)),
                Poll::Ready(result) => result?,
            };
            let outputs = match msg {
                Message::Handshake(raw) => hs.handle_message(&raw)?,
                Message::ChangeCipherSpec => {
                    let outputs = hs.handle_change_cipher_spec()?;
                    self.record.change_read_state();
                    debug!("read keys activated");
                    outputs
                }
                Message::Alert(alert) => {
                    if alert.terminates() {
                        return Err(remote_alert(alert));
                    }
                    if let Handshake::Server(server) = hs {
                        if server.handle_warning(alert.description) {
                            continue;
                        }
                    }
                    warn!(description = %alert.description, "warning alert during handshake");
                    continue;
                }
                Message::ApplicationData(_) => {
                    return Err(TlsError::alert(
                        AlertDescription::UnexpectedMessage,
                        "application data before the handshake completed",
                    ))
                }
            };
            self.apply(outputs)?;
        }
    }

    /// Carry out what the handshake asked for.
    fn apply(&mut self, outputs: Vec<Output>) -> Result<(), TlsError> {
        for output in outputs {
            match output {
                Output::SetVersion(version) => self.record.set_version(version),
                Output::Send(raw) => self.record.send(ContentType::Handshake, &raw)?,
                Output::Warning(description) => {
                    self.record.send_alert(Alert::warning(description))?
                }
                Output::InstallPending { read, write } => self.record.set_pending(*read, *write),
                Output::ChangeCipherSpec => {
                    self.record.send(ContentType::ChangeCipherSpec, &[1])?;
                    self.record.change_write_state();
                    debug!("write keys activated");
                }
                Output::Drop { reset } => {
                    self.record.discard_output();
                    self.state = ConnectionState::Aborted;
                    if reset {
                        self.transport.reset()?;
                        return Err(TlsError::IoError(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "connection reset",
                        )));
                    }
                    return Err(TlsError::Closed);
                }
                Output::Complete {
                    session,
                    tls_unique,
                } => {
                    self.session = Some(*session);
                    self.tls_unique = tls_unique;
                    self.state = ConnectionState::Connected;
                }
            }
        }
        Ok(())
    }

    /// Tear the connection down after a fatal error: send the matching
    /// alert for locally detected violations, clear the session's
    /// resumable flag and stop using the transport.
    fn fail(&mut self, err: TlsError) -> TlsError {
        if matches!(self.state, ConnectionState::Aborted) {
            return err;
        }
        if let ConnectionState::Handshaking(hs) = &self.state {
            debug!(role = ?hs.role(), phase = ?hs.phase(), error = %err, "handshake failed");
            if let Some(session) = hs.resumed_session() {
                session.clear_resumable();
            }
        }
        if let Some(session) = &self.session {
            session.clear_resumable();
        }
        if let TlsError::LocalAlert { description, .. } = &err {
            self.record.discard_output();
            if self.record.send_alert(Alert::fatal(*description)).is_ok() {
                // One attempt only; a blocked or broken transport is not retried.
                let _ = self.record.poll_flush(&mut self.transport);
            }
        }
        self.record.discard_output();
        self.state = ConnectionState::Aborted;
        err
    }

    fn ensure_connected(&self) -> Result<(), TlsError> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            _ => Err(TlsError::Closed),
        }
    }

    /// Push queued records to the transport.
    ///
    /// Fails with `WouldBlock` while the transport cannot take everything;
    /// the records stay queued and the connection stays usable. Any other
    /// transport error is fatal.
    pub fn flush(&mut self) -> Result<(), TlsError> {
        match self.record.poll_flush(&mut self.transport) {
            Poll::Ready(Ok(())) => Ok(()),
            Poll::Ready(Err(e)) => Err(self.fail(e)),
            Poll::Pending => Err(TlsError::IoError(io::ErrorKind::WouldBlock.into())),
        }
    }

    /// Read up to `max_bytes` of application data. Returns an empty vector
    /// once the peer has sent close_notify.
    ///
    /// On a non-blocking transport this fails with `WouldBlock` when no
    /// record is available; calling it again resumes.
    pub fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, TlsError> {
        loop {
            if !self.app_data_buf.is_empty() {
                let n = max_bytes.min(self.app_data_buf.len());
                return Ok(self.app_data_buf.drain(..n).collect());
            }
            match self.state {
                ConnectionState::Connected => {}
                ConnectionState::Closed => return Ok(Vec::new()),
                _ => return Err(TlsError::Closed),
            }
            // Queued warnings go out opportunistically; a blocked transport
            // leaves them for the next call.
            if let Poll::Ready(Err(e)) = self.record.poll_flush(&mut self.transport) {
                return Err(self.fail(e));
            }
            let msg = match self.record.poll_message(&mut self.transport) {
                Poll::Pending => return Err(TlsError::IoError(io::ErrorKind::WouldBlock.into())),
                Poll::Ready(Ok(msg)) => msg,
                Poll::Ready(Err(e)) => return Err(self.fail(e)),
            };
            if let Err(e) = self.handle_post_handshake(msg) {
                return Err(self.fail(e));
            }
        }
    }

    fn handle_post_handshake(&mut self, msg: Message) -> Result<(), TlsError> {
        match msg {
            Message::ApplicationData(data) => self.app_data_buf.extend_from_slice(&data),
            Message::Alert(alert) if alert.description == AlertDescription::CloseNotify => {
                debug!("close_notify received");
                if !self.sent_close_notify {
                    self.sent_close_notify = true;
                    self.record.send_alert(Alert::close_notify())?;
                    let _ = self.record.poll_flush(&mut self.transport);
                }
                self.state = ConnectionState::Closed;
            }
            Message::Alert(alert) if alert.terminates() => return Err(remote_alert(alert)),
            Message::Alert(alert) => {
                warn!(description = %alert.description, "warning alert received");
            }
            Message::Handshake(raw) => {
                let msg_type = parse_handshake_header(&raw).map(|(t, _, _)| t);
                let renegotiation = match self.role {
                    Some(TlsRole::Client) => msg_type == Some(HandshakeType::HelloRequest as u8),
                    Some(TlsRole::Server) => msg_type == Some(HandshakeType::ClientHello as u8),
                    None => false,
                };
                if !renegotiation {
                    return Err(TlsError::alert(
                        AlertDescription::UnexpectedMessage,
                        "handshake message after the handshake completed",
                    ));
                }
                if let Some(role) = self.role {
                    let outputs = vec![refuse_renegotiation(role)];
                    self.apply(outputs)?;
                }
            }
            Message::ChangeCipherSpec => {
                return Err(TlsError::alert(
                    AlertDescription::UnexpectedMessage,
                    "ChangeCipherSpec after the handshake completed",
                ))
            }
        }
        Ok(())
    }

    /// Send application data. Empty writes send nothing.
    ///
    /// `Ok` means the data was accepted, though on a non-blocking transport
    /// part of it may still be queued; [`flush`](Self::flush) pushes the
    /// rest. While earlier output is stuck the call fails with `WouldBlock`
    /// and accepts nothing, so retrying with the same data is safe.
    pub fn write(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.ensure_connected()?;
        self.flush()?;
        if data.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.record.send(ContentType::ApplicationData, data) {
            return Err(self.fail(e));
        }
        match self.flush() {
            Err(TlsError::IoError(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            other => other,
        }
    }

    /// Send close_notify and stop using the connection. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<(), TlsError> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Closed => {}
            ConnectionState::Aborted => return Ok(()),
            _ => {
                self.state = ConnectionState::Aborted;
                return Ok(());
            }
        }
        if !self.sent_close_notify {
            self.sent_close_notify = true;
            self.record.send_alert(Alert::close_notify())?;
        }
        self.state = ConnectionState::Closed;
        self.flush()
    }

    /// Session of the completed handshake.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn version(&self) -> Option<TlsVersion> {
        self.session.as_ref().map(|s| s.version)
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.session.as_ref().map(|s| s.cipher_suite)
    }

    /// RFC 5929 `tls-unique` channel binding of the latest handshake.
    pub fn tls_unique(&self) -> Option<&[u8]> {
        (!self.tls_unique.is_empty()).then_some(self.tls_unique.as_slice())
    }

    /// Current handshake phase.
    pub fn phase(&self) -> HandshakePhase {
        match &self.state {
            ConnectionState::Idle => HandshakePhase::Start,
            ConnectionState::Handshaking(hs) => hs.phase(),
            ConnectionState::Connected | ConnectionState::Closed => HandshakePhase::Established,
            ConnectionState::Aborted => HandshakePhase::Aborted,
        }
    }

    /// Whether the connection can carry application data.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> std::fmt::Debug for TlsConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("role", &self.role)
            .field("phase", &self.phase())
            .field("record", &self.record)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn remote_alert(alert: Alert) -> TlsError {
    if alert.level == AlertLevel::Fatal {
        warn!(description = %alert.description, "fatal alert received");
    }
    TlsError::RemoteAlert {
        level: alert.level,
        description: alert.description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litetls_crypto::RustCryptoProvider;
    use std::collections::VecDeque;

    /// Transport that hands out queued bytes and records what was sent.
    /// The first `blocked_sends` sends fail with `WouldBlock`.
    #[derive(Default)]
    struct Scripted {
        incoming: VecDeque<u8>,
        outgoing: Vec<u8>,
        blocked_sends: usize,
    }

    impl Transport for Scripted {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.incoming.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.incoming.len());
            for (slot, b) in buf.iter_mut().zip(self.incoming.drain(..n)) {
                *slot = b;
            }
            Ok(n)
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.blocked_sends > 0 {
                self.blocked_sends -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.outgoing.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    fn anon_settings() -> HandshakeSettings {
        HandshakeSettings::default()
    }

    #[test]
    fn test_client_start_writes_hello_then_waits() {
        let mut conn = TlsConnection::new(Scripted::default(), RustCryptoProvider::shared());
        conn.start_client_handshake(
            ClientCredentials::Anonymous,
            anon_settings(),
            None,
            None,
            Vec::new(),
        )
        .unwrap();
        assert_eq!(conn.step().unwrap(), Action::NeedsIo(IoDirection::Read));
        let out = &conn.get_ref().outgoing;
        assert_eq!(out[0], ContentType::Handshake as u8);
        // Record version before negotiation is the minimum version.
        assert_eq!(&out[1..3], &[0x03, 0x01]);
        assert_eq!(out[5], HandshakeType::ClientHello as u8);
        assert_eq!(conn.phase(), HandshakePhase::Start);
    }

    #[test]
    fn test_fatal_alert_from_peer_aborts() {
        let mut conn = TlsConnection::new(Scripted::default(), RustCryptoProvider::shared());
        conn.start_client_handshake(
            ClientCredentials::Anonymous,
            anon_settings(),
            None,
            None,
            Vec::new(),
        )
        .unwrap();
        conn.get_mut()
            .incoming
            .extend([ContentType::Alert as u8, 3, 1, 0, 2, 2, 40]);
        let err = conn.step().unwrap_err();
        assert!(matches!(
            err,
            TlsError::RemoteAlert {
                level: AlertLevel::Fatal,
                description: AlertDescription::HandshakeFailure
            }
        ));
        assert_eq!(conn.phase(), HandshakePhase::Aborted);
        assert!(matches!(conn.step(), Err(TlsError::Closed)));
        assert!(conn.write(b"x").is_err());
    }

    #[test]
    fn test_garbage_triggers_local_alert() {
        let mut conn = TlsConnection::new(Scripted::default(), RustCryptoProvider::shared());
        conn.start_server_handshake(
            ServerCredentials {
                anonymous: true,
                ..Default::default()
            },
            anon_settings(),
            None,
        )
        .unwrap();
        // A handshake record holding a ServerHelloDone.
        conn.get_mut()
            .incoming
            .extend([ContentType::Handshake as u8, 3, 1, 0, 4, 14, 0, 0, 0]);
        let err = conn.step().unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::UnexpectedMessage));
        let out = &conn.get_ref().outgoing;
        assert_eq!(
            out.as_slice(),
            &[ContentType::Alert as u8, 3, 1, 0, 2, 2, 10]
        );
    }

    #[test]
    fn test_double_start_rejected() {
        let mut conn = TlsConnection::new(Scripted::default(), RustCryptoProvider::shared());
        conn.start_client_handshake(
            ClientCredentials::Anonymous,
            anon_settings(),
            None,
            None,
            Vec::new(),
        )
        .unwrap();
        assert!(matches!(
            conn.start_server_handshake(ServerCredentials::default(), anon_settings(), None),
            Err(TlsError::InvalidConfig(_))
        ));
    }

    fn connected(role: TlsRole) -> TlsConnection<Scripted> {
        let mut conn = TlsConnection::new(Scripted::default(), RustCryptoProvider::shared());
        conn.record = RecordLayer::new(TlsVersion::Tls12);
        conn.role = Some(role);
        conn.state = ConnectionState::Connected;
        conn
    }

    #[test]
    fn test_renegotiation_refused_with_warning() {
        let mut conn = connected(TlsRole::Client);
        // HelloRequest, then application data.
        conn.get_mut().incoming.extend([
            ContentType::Handshake as u8, 3, 3, 0, 4, 0, 0, 0, 0,
            ContentType::ApplicationData as u8, 3, 3, 0, 2, b'o', b'k',
        ]);
        assert_eq!(conn.read(16).unwrap(), b"ok");
        assert_eq!(
            conn.get_ref().outgoing.as_slice(),
            &[ContentType::Alert as u8, 3, 3, 0, 2, 1, 100]
        );
        assert!(conn.is_connected());

        let mut conn = connected(TlsRole::Server);
        // A Finished is not a renegotiation attempt.
        conn.get_mut()
            .incoming
            .extend([ContentType::Handshake as u8, 3, 3, 0, 4, 20, 0, 0, 0]);
        let err = conn.read(16).unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::UnexpectedMessage));
        assert!(!conn.is_connected());
    }

    fn would_block(result: Result<Vec<u8>, TlsError>) -> bool {
        matches!(result, Err(TlsError::IoError(e)) if e.kind() == io::ErrorKind::WouldBlock)
    }

    #[test]
    fn test_renegotiation_warning_waits_for_blocked_transport() {
        let mut conn = connected(TlsRole::Client);
        conn.get_mut().blocked_sends = 1;
        conn.get_mut()
            .incoming
            .extend([ContentType::Handshake as u8, 3, 3, 0, 4, 0, 0, 0, 0]);
        assert!(would_block(conn.read(16)));
        assert!(conn.is_connected());
        assert!(conn.get_ref().outgoing.is_empty());

        assert!(would_block(conn.read(16)));
        assert_eq!(
            conn.get_ref().outgoing.as_slice(),
            &[ContentType::Alert as u8, 3, 3, 0, 2, 1, 100]
        );
        assert!(conn.is_connected());
    }

    #[test]
    fn test_blocked_write_is_sent_once() {
        let mut conn = connected(TlsRole::Client);
        conn.get_mut().blocked_sends = 2;
        conn.write(b"abc").unwrap();
        assert!(conn.get_ref().outgoing.is_empty());

        // Still stuck: nothing new is accepted.
        let err = conn.write(b"def").unwrap_err();
        assert!(matches!(err, TlsError::IoError(ref e) if e.kind() == io::ErrorKind::WouldBlock));
        assert!(conn.is_connected());

        conn.flush().unwrap();
        assert_eq!(
            conn.get_ref().outgoing.as_slice(),
            &[ContentType::ApplicationData as u8, 3, 3, 0, 3, b'a', b'b', b'c']
        );

        conn.write(b"def").unwrap();
        assert_eq!(conn.get_ref().outgoing.len(), 16);
        assert_eq!(&conn.get_ref().outgoing[8..], &[23, 3, 3, 0, 3, b'd', b'e', b'f']);
    }

    #[test]
    fn test_close_notify_answered() {
        let mut conn = connected(TlsRole::Server);
        conn.get_mut()
            .incoming
            .extend([ContentType::Alert as u8, 3, 3, 0, 2, 1, 0]);
        assert!(conn.read(16).unwrap().is_empty());
        assert_eq!(
            conn.get_ref().outgoing.as_slice(),
            &[ContentType::Alert as u8, 3, 3, 0, 2, 1, 0]
        );
        assert!(conn.read(16).unwrap().is_empty());
        conn.close().unwrap();
        assert_eq!(conn.get_ref().outgoing.len(), 7);
    }

    #[test]
    fn test_io_before_handshake_is_closed() {
        let mut conn = TlsConnection::new(Scripted::default(), RustCryptoProvider::shared());
        assert!(matches!(conn.read(10), Err(TlsError::Closed)));
        assert!(matches!(conn.write(b"hi"), Err(TlsError::Closed)));
        assert!(conn.tls_unique().is_none());
        assert!(conn.version().is_none());
    }
}
