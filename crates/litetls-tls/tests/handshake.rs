//! Full client/server handshakes over an in-memory pipe.

mod common;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use common::*;
use litetls_tls::config::CertificateType;
use litetls_tls::crypt::{CipherSuiteParams, KeyExchangeAlg};
use litetls_tls::{
    Action, ClientCredentials, HandshakePhase, HandshakeSettings, ServerCredentials,
    TlsConnection, TlsVersion,
};
use litetls_types::TlsError;

fn kx_of(conn_suite: litetls_tls::CipherSuite) -> KeyExchangeAlg {
    CipherSuiteParams::lookup(conn_suite).unwrap().kx
}

#[test]
fn test_rsa_tls12_liveness() {
    let (client, server) = run_handshake(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder()
                .key_exchanges(&[KeyExchangeAlg::Rsa])
                .build(),
        ),
        ServerSide::new(full_server_credentials(), HandshakeSettings::default()),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    assert!(client.is_connected());
    assert_eq!(client.phase(), HandshakePhase::Established);
    assert_eq!(client.version(), Some(TlsVersion::Tls12));
    assert_eq!(client.cipher_suite(), server.cipher_suite());
    assert_eq!(kx_of(client.cipher_suite().unwrap()), KeyExchangeAlg::Rsa);

    let unique = client.tls_unique().unwrap().to_vec();
    assert_eq!(unique.len(), 12);
    assert_eq!(server.tls_unique(), Some(unique.as_slice()));

    let c = client.session().unwrap();
    let s = server.session().unwrap();
    assert_eq!(c.master_secret, s.master_secret);
    assert_eq!(c.master_secret.len(), 48);
    assert!(c.extended_master_secret);
    assert!(c.peer_certificates.is_some());
    assert!(s.peer_certificates.is_none());

    assert_eq!(transfer(&mut client, &mut server, b"ping"), b"ping");
    assert_eq!(transfer(&mut server, &mut client, b"pong"), b"pong");

    client.close().unwrap();
    assert!(server.read(16).unwrap().is_empty());
    assert!(client.read(16).unwrap().is_empty());
}

#[test]
fn test_every_key_exchange_family() {
    let cases = [
        (KeyExchangeAlg::DheRsa, cert_client()),
        (KeyExchangeAlg::EcdheRsa, cert_client()),
        (KeyExchangeAlg::Srp, srp_client(SRP_PASSWORD)),
        (KeyExchangeAlg::SrpRsa, srp_client(SRP_PASSWORD)),
        (KeyExchangeAlg::DhAnon, ClientCredentials::Anonymous),
        (KeyExchangeAlg::EcdhAnon, ClientCredentials::Anonymous),
    ];
    for (kx, credentials) in cases {
        let (client, server) = run_handshake(
            ClientSide::new(
                credentials,
                HandshakeSettings::builder().key_exchanges(&[kx]).build(),
            ),
            ServerSide::new(full_server_credentials(), HandshakeSettings::default()),
        );
        let mut client = client.unwrap_or_else(|e| panic!("{kx:?} client: {e}"));
        let mut server = server.unwrap_or_else(|e| panic!("{kx:?} server: {e}"));
        assert_eq!(kx_of(client.cipher_suite().unwrap()), kx);
        assert_eq!(
            client.session().unwrap().master_secret,
            server.session().unwrap().master_secret
        );
        if kx.is_srp() {
            assert_eq!(server.session().unwrap().srp_username.as_deref(), Some(SRP_USER));
        }
        assert_eq!(
            client.session().unwrap().peer_certificates.is_some(),
            kx.requires_certificate()
        );
        assert_eq!(transfer(&mut client, &mut server, b"hello"), b"hello");
        assert_eq!(transfer(&mut server, &mut client, b"world"), b"world");
    }
}

#[test]
fn test_older_versions() {
    for version in [TlsVersion::Ssl30, TlsVersion::Tls10, TlsVersion::Tls11] {
        let settings = || {
            HandshakeSettings::builder()
                .min_version(TlsVersion::Ssl30)
                .max_version(version)
                .build()
        };
        let (client, server) = run_handshake(
            ClientSide::new(cert_client(), settings()),
            ServerSide::new(full_server_credentials(), settings()),
        );
        let mut client = client.unwrap_or_else(|e| panic!("{version} client: {e}"));
        let mut server = server.unwrap_or_else(|e| panic!("{version} server: {e}"));
        assert_eq!(client.version(), Some(version));
        assert_eq!(server.version(), Some(version));
        let session = client.session().unwrap();
        assert!(!CipherSuiteParams::lookup(session.cipher_suite)
            .unwrap()
            .cipher
            .is_aead());
        if version == TlsVersion::Ssl30 {
            assert!(!session.extended_master_secret);
            assert!(!session.encrypt_then_mac);
        }
        let payload = vec![0x5a; 3000];
        assert_eq!(transfer(&mut client, &mut server, &payload), payload);
        assert_eq!(transfer(&mut server, &mut client, b"x"), b"x");
    }
}

#[test]
fn test_encrypt_then_mac_negotiated_for_cbc() {
    let settings = HandshakeSettings::builder()
        .ciphers(&[litetls_types::CipherAlgId::Aes128Cbc])
        .key_exchanges(&[KeyExchangeAlg::EcdheRsa])
        .build();
    let (client, server) = run_handshake(
        ClientSide::new(cert_client(), settings),
        ServerSide::new(full_server_credentials(), HandshakeSettings::default()),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap();
    assert!(client.session().unwrap().encrypt_then_mac);
    assert!(server.session().unwrap().encrypt_then_mac);
    assert_eq!(transfer(&mut client, &mut server, b"etm"), b"etm");
}

#[test]
fn test_client_certificate_authentication() {
    let mut credentials = full_server_credentials();
    credentials.request_client_cert = true;
    let (client, server) = run_handshake(
        ClientSide::new(
            ClientCredentials::Certificate {
                client_auth: Some(client_key()),
            },
            HandshakeSettings::builder()
                .key_exchanges(&[KeyExchangeAlg::EcdheRsa])
                .build(),
        ),
        ServerSide::new(credentials, HandshakeSettings::default()),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap();
    let peer = server.session().unwrap().peer_certificates.clone().unwrap();
    assert_eq!(peer.certs(), client_key().chain.certs());
    assert!(client.session().unwrap().local_certificates.is_some());
    assert_eq!(transfer(&mut client, &mut server, b"authed"), b"authed");
}

#[test]
fn test_client_without_certificate_answers_request() {
    let mut credentials = full_server_credentials();
    credentials.request_client_cert = true;
    for version in [TlsVersion::Ssl30, TlsVersion::Tls12] {
        let settings = || {
            HandshakeSettings::builder()
                .min_version(TlsVersion::Ssl30)
                .max_version(version)
                .key_exchanges(&[KeyExchangeAlg::Rsa])
                .build()
        };
        let (client, server) = run_handshake(
            ClientSide::new(cert_client(), settings()),
            ServerSide::new(credentials.clone(), settings()),
        );
        let client = client.unwrap_or_else(|e| panic!("{version} client: {e}"));
        let server = server.unwrap_or_else(|e| panic!("{version} server: {e}"));
        assert!(server.session().unwrap().peer_certificates.is_none());
        assert_eq!(client.version(), Some(version));
    }
}

#[test]
fn test_alpn_and_server_name() {
    let mut client_side = ClientSide::new(cert_client(), HandshakeSettings::default());
    client_side.server_name = Some(SERVER_NAME.into());
    client_side.alpn = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    let server_settings = HandshakeSettings::builder()
        .alpn(&[b"http/1.1".as_slice(), b"h2".as_slice()])
        .build();
    let (client, server) = run_handshake(
        client_side,
        ServerSide::new(full_server_credentials(), server_settings),
    );
    let client = client.unwrap();
    let server = server.unwrap();
    // Server preference wins.
    assert_eq!(
        client.session().unwrap().alpn_protocol.as_deref(),
        Some(b"http/1.1".as_slice())
    );
    assert_eq!(
        server.session().unwrap().alpn_protocol.as_deref(),
        Some(b"http/1.1".as_slice())
    );
    assert_eq!(
        server.session().unwrap().server_name.as_deref(),
        Some(SERVER_NAME)
    );
}

#[test]
fn test_key_log_lines_match() {
    use std::sync::{Arc, Mutex};

    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    let server_settings = HandshakeSettings::builder()
        .key_log(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string())
        }))
        .build();
    let (client, server) = run_handshake(
        ClientSide::new(cert_client(), HandshakeSettings::default()),
        ServerSide::new(full_server_credentials(), server_settings),
    );
    let client = client.unwrap();
    server.unwrap();
    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    let hex: String = client
        .session()
        .unwrap()
        .master_secret
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    assert!(lines[0].starts_with("CLIENT_RANDOM "));
    assert!(lines[0].ends_with(&hex));
}

#[test]
fn test_mismatched_credentials_fail() {
    // SRP client against a certificate-only server.
    let credentials = ServerCredentials {
        certified_key: Some(server_key()),
        ..ServerCredentials::default()
    };
    let (client, server) = run_handshake(
        ClientSide::new(srp_client(SRP_PASSWORD), HandshakeSettings::default()),
        ServerSide::new(credentials, HandshakeSettings::default()),
    );
    let server_err = server.unwrap_err();
    assert_eq!(
        server_err.alert_description(),
        Some(litetls_types::AlertDescription::HandshakeFailure)
    );
    assert!(matches!(client.unwrap_err(), TlsError::RemoteAlert { .. }));
}

/// Single-threaded byte queue pair that reports `WouldBlock` when empty.
struct QueueEnd {
    inbound: Rc<RefCell<VecDeque<u8>>>,
    outbound: Rc<RefCell<VecDeque<u8>>>,
}

fn queue_pair() -> (QueueEnd, QueueEnd) {
    let a = Rc::new(RefCell::new(VecDeque::new()));
    let b = Rc::new(RefCell::new(VecDeque::new()));
    (
        QueueEnd {
            inbound: a.clone(),
            outbound: b.clone(),
        },
        QueueEnd {
            inbound: b,
            outbound: a,
        },
    )
}

impl Read for QueueEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut q = self.inbound.borrow_mut();
        if q.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(q.len()).min(7);
        for slot in buf.iter_mut().take(n) {
            *slot = q.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for QueueEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.borrow_mut().extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn would_block(err: &TlsError) -> bool {
    matches!(err, TlsError::IoError(e) if e.kind() == io::ErrorKind::WouldBlock)
}

#[test]
fn test_nonblocking_step_interleaving() {
    let (client_end, server_end) = queue_pair();
    let mut client = TlsConnection::new(client_end, provider());
    let mut server = TlsConnection::new(server_end, provider());
    client
        .start_client_handshake(
            cert_client(),
            HandshakeSettings::default(),
            None,
            Some(SERVER_NAME.into()),
            Vec::new(),
        )
        .unwrap();
    server
        .start_server_handshake(
            full_server_credentials(),
            HandshakeSettings::default(),
            None,
        )
        .unwrap();

    let mut client_done = false;
    let mut server_done = false;
    for _ in 0..200 {
        if !server_done {
            server_done = server.step().unwrap() == Action::Established;
        }
        if !client_done {
            client_done = client.step().unwrap() == Action::Established;
        }
        if client_done && server_done {
            break;
        }
    }
    assert!(client_done && server_done);
    assert_eq!(client.tls_unique(), server.tls_unique());

    // Nothing in flight yet.
    assert!(would_block(&server.read(10).unwrap_err()));
    client.write(b"across the queue").unwrap();
    let mut got = Vec::new();
    while got.len() < 16 {
        match server.read(64) {
            Ok(chunk) => got.extend_from_slice(&chunk),
            Err(e) if would_block(&e) => {}
            Err(e) => panic!("{e}"),
        }
    }
    assert_eq!(got, b"across the queue");
    // The connection stays usable after WouldBlock.
    assert!(server.is_connected());
}

#[test]
fn test_certificate_type_extension_negotiated() {
    let settings = || {
        HandshakeSettings::builder()
            .certificate_types(&[CertificateType::OPENPGP, CertificateType::X509])
            .key_exchanges(&[KeyExchangeAlg::Rsa])
            .build()
    };
    let (client, server) = run_handshake(
        ClientSide::new(cert_client(), settings()),
        ServerSide::new(full_server_credentials(), settings()),
    );
    let mut client = client.unwrap();
    let mut server = server.unwrap();
    assert!(client.session().unwrap().peer_certificates.is_some());
    assert_eq!(transfer(&mut client, &mut server, b"x509"), b"x509");
}
