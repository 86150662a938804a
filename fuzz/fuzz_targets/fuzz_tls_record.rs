#![no_main]
use std::io::Cursor;
use std::task::Poll;

use libfuzzer_sys::fuzz_target;
use litetls_tls::record::RecordLayer;
use litetls_tls::TlsVersion;

fuzz_target!(|data: &[u8]| {
    let mut transport = Cursor::new(data.to_vec());
    let mut layer = RecordLayer::new(TlsVersion::Tls12);
    while let Poll::Ready(Ok(_)) = layer.poll_message(&mut transport) {}
});
