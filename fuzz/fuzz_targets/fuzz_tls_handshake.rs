#![no_main]
use libfuzzer_sys::fuzz_target;
use litetls_tls::crypt::KeyExchangeAlg;
use litetls_tls::handshake::codec::{parse_handshake_header, DecodeContext, HandshakeMessage};
use litetls_tls::TlsVersion;

fuzz_target!(|data: &[u8]| {
    let Some((msg_type, body, _)) = parse_handshake_header(data) else {
        return;
    };
    // Hellos decode without context; the rest depend on the negotiated
    // version and key exchange.
    let _ = HandshakeMessage::decode(msg_type, body, &DecodeContext::default());
    for kx in KeyExchangeAlg::ALL {
        for version in [TlsVersion::Ssl30, TlsVersion::Tls12] {
            let _ = HandshakeMessage::decode(msg_type, body, &DecodeContext::new(version, kx));
        }
    }
});
