//! Handshakes that must fail, and the alert each side ends up with.

mod common;

use common::*;
use litetls_tls::config::IntoleranceType;
use litetls_tls::crypt::KeyExchangeAlg;
use litetls_tls::{ClientCredentials, HandshakeSettings, ServerCredentials, TlsVersion};
use litetls_types::{AlertDescription, TlsError};

fn remote(err: &TlsError) -> Option<AlertDescription> {
    match err {
        TlsError::RemoteAlert { description, .. } => Some(*description),
        _ => None,
    }
}

fn local(err: &TlsError) -> Option<AlertDescription> {
    match err {
        TlsError::LocalAlert { description, .. } => Some(*description),
        _ => None,
    }
}

#[test]
fn test_client_below_server_minimum() {
    let (client_end, server_end) = pipe();
    let received = client_end.received();
    let (client, server) = run_handshake_over(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder()
                .max_version(TlsVersion::Tls10)
                .build(),
        ),
        client_end,
        ServerSide::new(
            full_server_credentials(),
            HandshakeSettings::builder()
                .min_version(TlsVersion::Tls11)
                .build(),
        ),
        server_end,
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::ProtocolVersion)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::ProtocolVersion)
    );
    // Plaintext fatal alert in a record stamped with the server's minimum.
    assert_eq!(*received.lock().unwrap(), vec![21, 3, 2, 0, 2, 2, 70]);
}

#[test]
fn test_server_below_client_minimum() {
    let (client, server) = run_handshake(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder()
                .min_version(TlsVersion::Tls12)
                .build(),
        ),
        ServerSide::new(
            full_server_credentials(),
            HandshakeSettings::builder()
                .max_version(TlsVersion::Tls11)
                .build(),
        ),
    );
    assert_eq!(
        local(&client.unwrap_err()),
        Some(AlertDescription::ProtocolVersion)
    );
    // The alert record still carries the client's version, which the server
    // may reject on its own before reading the description.
    assert_eq!(
        server.unwrap_err().alert_description(),
        Some(AlertDescription::ProtocolVersion)
    );
}

#[test]
fn test_fallback_scsv_detected() {
    let (client, server) = run_handshake(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder()
                .max_version(TlsVersion::Tls11)
                .send_fallback_scsv(true)
                .build(),
        ),
        ServerSide::new(full_server_credentials(), HandshakeSettings::default()),
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::InappropriateFallback)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::InappropriateFallback)
    );
}

#[test]
fn test_fallback_scsv_at_server_maximum_is_accepted() {
    let settings = || {
        HandshakeSettings::builder()
            .max_version(TlsVersion::Tls11)
            .send_fallback_scsv(true)
            .build()
    };
    let (client, server) = run_handshake(
        ClientSide::new(cert_client(), settings()),
        ServerSide::new(full_server_credentials(), settings()),
    );
    assert_eq!(client.unwrap().version(), Some(TlsVersion::Tls11));
    server.unwrap();
}

#[test]
fn test_modified_client_hello_breaks_finished() {
    let (client_end, server_end) = pipe();
    let tampered = Tamper {
        inner: client_end,
        edit: |chunk: &mut Vec<u8>| {
            let needle = SERVER_NAME.as_bytes();
            if let Some(pos) = chunk.windows(needle.len()).position(|w| w == needle) {
                chunk[pos + needle.len() - 1] = b'T';
            }
        },
    };
    // Without the extended master secret both sides still derive the same
    // keys, so only the Finished hash disagrees.
    let settings = || {
        HandshakeSettings::builder()
            .use_extended_master_secret(false)
            .build()
    };
    let mut client_side = ClientSide::new(cert_client(), settings());
    client_side.server_name = Some(SERVER_NAME.into());
    let (client, server) = run_handshake_over(
        client_side,
        tampered,
        ServerSide::new(full_server_credentials(), settings()),
        server_end,
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::DecryptError)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::DecryptError)
    );
}

#[test]
fn test_intolerant_server() {
    let cases = [
        (IntoleranceType::Alert, Some(AlertDescription::HandshakeFailure)),
        (IntoleranceType::Close, None),
        (IntoleranceType::Reset, None),
    ];
    for (kind, alert) in cases {
        let (client, server) = run_handshake(
            ClientSide::new(cert_client(), HandshakeSettings::default()),
            ServerSide::new(
                full_server_credentials(),
                HandshakeSettings::builder()
                    .tls_intolerant(Some(TlsVersion::Tls12), kind)
                    .build(),
            ),
        );
        let client_err = client.unwrap_err();
        let server_err = server.unwrap_err();
        match alert {
            Some(desc) => {
                assert_eq!(remote(&client_err), Some(desc));
                assert_eq!(local(&server_err), Some(desc));
            }
            None => {
                assert!(
                    matches!(client_err, TlsError::UnexpectedEof),
                    "{kind:?}: {client_err}"
                );
                assert!(!server_err.is_local_alert());
            }
        }
    }
}

#[test]
fn test_intolerance_spares_older_clients() {
    let (client, server) = run_handshake(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder()
                .max_version(TlsVersion::Tls11)
                .build(),
        ),
        ServerSide::new(
            full_server_credentials(),
            HandshakeSettings::builder()
                .tls_intolerant(Some(TlsVersion::Tls12), IntoleranceType::Close)
                .build(),
        ),
    );
    assert_eq!(client.unwrap().version(), Some(TlsVersion::Tls11));
    server.unwrap();
}

#[test]
fn test_weak_server_key_rejected() {
    let credentials = ServerCredentials {
        certified_key: Some(weak_server_key()),
        ..ServerCredentials::default()
    };
    let (client, server) = run_handshake(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder().min_key_size(2048).build(),
        ),
        ServerSide::new(credentials, HandshakeSettings::default()),
    );
    assert_eq!(
        local(&client.unwrap_err()),
        Some(AlertDescription::InsufficientSecurity)
    );
    assert_eq!(
        remote(&server.unwrap_err()),
        Some(AlertDescription::InsufficientSecurity)
    );
}

#[test]
fn test_wrong_srp_password() {
    let (client, server) = run_handshake(
        ClientSide::new(
            srp_client(b"wrong password"),
            HandshakeSettings::builder()
                .key_exchanges(&[KeyExchangeAlg::Srp])
                .build(),
        ),
        ServerSide::new(full_server_credentials(), HandshakeSettings::default()),
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::BadRecordMac)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::BadRecordMac)
    );
}

#[test]
fn test_unknown_srp_user() {
    let (client, server) = run_handshake(
        ClientSide::new(
            ClientCredentials::Srp {
                username: "mallory".into(),
                password: SRP_PASSWORD.to_vec(),
            },
            HandshakeSettings::default(),
        ),
        ServerSide::new(full_server_credentials(), HandshakeSettings::default()),
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::UnknownPskIdentity)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::UnknownPskIdentity)
    );
}

#[test]
fn test_required_extended_master_secret() {
    let (client, server) = run_handshake(
        ClientSide::new(
            cert_client(),
            HandshakeSettings::builder()
                .use_extended_master_secret(false)
                .build(),
        ),
        ServerSide::new(
            full_server_credentials(),
            HandshakeSettings::builder()
                .require_extended_master_secret(true)
                .build(),
        ),
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::HandshakeFailure)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::HandshakeFailure)
    );
}

#[test]
fn test_no_application_protocol_overlap() {
    let mut client_side = ClientSide::new(cert_client(), HandshakeSettings::default());
    client_side.alpn = vec![b"h2".to_vec()];
    let (client, server) = run_handshake(
        client_side,
        ServerSide::new(
            full_server_credentials(),
            HandshakeSettings::builder()
                .alpn(&[b"http/1.1".as_slice()])
                .build(),
        ),
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::NoApplicationProtocol)
    );
    assert_eq!(
        remote(&client.unwrap_err()),
        Some(AlertDescription::NoApplicationProtocol)
    );
}

#[test]
fn test_anonymous_client_against_certificate_only_server() {
    let credentials = ServerCredentials {
        certified_key: Some(server_key()),
        ..ServerCredentials::default()
    };
    let (client, server) = run_handshake(
        ClientSide::new(ClientCredentials::Anonymous, HandshakeSettings::default()),
        ServerSide::new(credentials, HandshakeSettings::default()),
    );
    assert_eq!(
        local(&server.unwrap_err()),
        Some(AlertDescription::HandshakeFailure)
    );
    assert!(remote(&client.unwrap_err()).is_some());
}
