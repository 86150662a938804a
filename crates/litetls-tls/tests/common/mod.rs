//! Shared fixtures for the connection-level tests: an in-memory duplex
//! pipe, credential loaders and a two-party handshake driver.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use litetls_crypto::rsa::RsaKey;
use litetls_crypto::{AsymmetricKey, CertificateChain, CryptoProvider, RustCryptoProvider};
use litetls_tls::config::CertifiedKey;
use litetls_tls::handshake::srp::SrpVerifierDb;
use litetls_tls::{
    ClientCredentials, HandshakeSettings, ServerCredentials, Session, SessionCache,
    TlsConnection,
};
use litetls_types::TlsError;

pub const SERVER_NAME: &str = "server.test";
pub const SRP_USER: &str = "alice";
pub const SRP_PASSWORD: &[u8] = b"correct horse battery staple";

/// One end of a blocking in-memory byte pipe. Reads return `Ok(0)` once the
/// other end is dropped.
pub struct PipeEnd {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    /// Every byte received so far, for wire-level assertions.
    received: Arc<Mutex<Vec<u8>>>,
}

pub fn pipe() -> (PipeEnd, PipeEnd) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    let end = |tx, rx| PipeEnd {
        tx: Some(tx),
        rx,
        pending: Vec::new(),
        received: Arc::new(Mutex::new(Vec::new())),
    };
    (end(a_tx, a_rx), end(b_tx, b_rx))
}

impl PipeEnd {
    /// Handle to the bytes this end has received.
    pub fn received(&self) -> Arc<Mutex<Vec<u8>>> {
        self.received.clone()
    }
}

impl Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        self.received.lock().unwrap().extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wraps a pipe end and applies `edit` to every outgoing chunk.
pub struct Tamper<F: FnMut(&mut Vec<u8>)> {
    pub inner: PipeEnd,
    pub edit: F,
}

impl<F: FnMut(&mut Vec<u8>)> Read for Tamper<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<F: FnMut(&mut Vec<u8>)> Write for Tamper<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut chunk = buf.to_vec();
        (self.edit)(&mut chunk);
        self.inner.write_all(&chunk)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn provider() -> Arc<dyn CryptoProvider> {
    RustCryptoProvider::shared()
}

fn load_key(cert_pem: &str, key_pem: &str) -> CertifiedKey {
    let chain = CertificateChain::from_pem(cert_pem).unwrap();
    let key: Arc<dyn AsymmetricKey> = Arc::new(RsaKey::from_pem(key_pem).unwrap());
    CertifiedKey::new(chain, key).unwrap()
}

pub fn server_key() -> CertifiedKey {
    load_key(
        include_str!("../data/server.crt.pem"),
        include_str!("../data/server.key.pem"),
    )
}

pub fn client_key() -> CertifiedKey {
    load_key(
        include_str!("../data/client.crt.pem"),
        include_str!("../data/client.key.pem"),
    )
}

/// 1024-bit RSA certificate.
pub fn weak_server_key() -> CertifiedKey {
    load_key(
        include_str!("../data/weak.crt.pem"),
        include_str!("../data/weak.key.pem"),
    )
}

pub fn srp_db() -> Arc<SrpVerifierDb> {
    let mut db = SrpVerifierDb::new();
    db.add_user(provider().as_ref(), SRP_USER, SRP_PASSWORD, 2048)
        .unwrap();
    Arc::new(db)
}

/// Credentials covering every key exchange family.
pub fn full_server_credentials() -> ServerCredentials {
    ServerCredentials {
        certified_key: Some(server_key()),
        verifier_db: Some(srp_db()),
        anonymous: true,
        request_client_cert: false,
    }
}

pub fn cert_client() -> ClientCredentials {
    ClientCredentials::Certificate { client_auth: None }
}

pub fn srp_client(password: &[u8]) -> ClientCredentials {
    ClientCredentials::Srp {
        username: SRP_USER.into(),
        password: password.to_vec(),
    }
}

/// Client-side handshake inputs.
pub struct ClientSide {
    pub credentials: ClientCredentials,
    pub settings: HandshakeSettings,
    pub session: Option<Session>,
    pub server_name: Option<String>,
    pub alpn: Vec<Vec<u8>>,
}

impl ClientSide {
    pub fn new(credentials: ClientCredentials, settings: HandshakeSettings) -> Self {
        Self {
            credentials,
            settings,
            session: None,
            server_name: None,
            alpn: Vec::new(),
        }
    }
}

/// Server-side handshake inputs.
pub struct ServerSide {
    pub credentials: ServerCredentials,
    pub settings: HandshakeSettings,
    pub cache: Option<Arc<dyn SessionCache>>,
}

impl ServerSide {
    pub fn new(credentials: ServerCredentials, settings: HandshakeSettings) -> Self {
        Self {
            credentials,
            settings,
            cache: None,
        }
    }
}

pub type HandshakeResult = Result<TlsConnection<PipeEnd>, TlsError>;

/// Run both handshakes on separate threads over a fresh pipe. Each side's
/// connection comes back on success so the caller can exchange data.
pub fn run_handshake(client: ClientSide, server: ServerSide) -> (HandshakeResult, HandshakeResult) {
    let (client_end, server_end) = pipe();
    run_handshake_over(client, client_end, server, server_end)
}

pub fn run_handshake_over<C, S>(
    client: ClientSide,
    client_end: C,
    server: ServerSide,
    server_end: S,
) -> (
    Result<TlsConnection<C>, TlsError>,
    Result<TlsConnection<S>, TlsError>,
)
where
    C: Read + Write + Send,
    S: Read + Write + Send,
{
    thread::scope(|scope| {
        let server_thread = scope.spawn(move || {
            let mut conn = TlsConnection::new(server_end, provider());
            conn.handshake_server(server.credentials, server.settings, server.cache)
                .map(|_| conn)
        });
        // A failed client drops its pipe end here, before the join, so a
        // server blocked in read sees end of stream.
        let client_result = {
            let mut conn = TlsConnection::new(client_end, provider());
            conn.handshake_client(
                client.credentials,
                client.settings,
                client.session,
                client.server_name,
                client.alpn,
            )
            .map(|_| conn)
        };
        let server_result = server_thread.join().unwrap();
        (client_result, server_result)
    })
}

/// Send `data` from `from` and read it back on `to`.
pub fn transfer<A: Read + Write, B: Read + Write>(
    from: &mut TlsConnection<A>,
    to: &mut TlsConnection<B>,
    data: &[u8],
) -> Vec<u8> {
    from.write(data).unwrap();
    let mut got = Vec::new();
    while got.len() < data.len() {
        let chunk = to.read(data.len() - got.len()).unwrap();
        assert!(!chunk.is_empty(), "peer closed early");
        got.extend_from_slice(&chunk);
    }
    got
}
