//! Record layer: framing, fragmentation, protection and handshake
//! reassembly over a [`Transport`].
//!
//! Output is queued in an internal buffer and flushed with
//! [`RecordLayer::poll_flush`]; input is accumulated until a whole record
//! is present. Both return `Poll::Pending` when the transport would block,
//! and resume from the same point on the next call.

pub mod state;

use std::io;
use std::task::Poll;

use crate::alert::{Alert, AlertDecodeError};
use crate::handshake::codec::parse_handshake_header;
use crate::transport::Transport;
use crate::TlsVersion;
use litetls_types::{AlertDescription, AlertLevel, TlsError};
use state::ConnectionState;
use tracing::warn;

/// Maximum plaintext fragment length (2^14).
pub const MAX_PLAINTEXT_LEN: usize = 16384;
/// Maximum record payload length (2^14 + 2048).
pub const MAX_CIPHERTEXT_LEN: usize = 18432;
/// Record header: type(1) || version(2) || length(2).
pub const RECORD_HEADER_LEN: usize = 5;
/// Upper bound on one reassembled handshake message.
pub const MAX_HANDSHAKE_MESSAGE_LEN: usize = 1 << 18;

const READ_CHUNK: usize = 4096;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            20 => Some(ContentType::ChangeCipherSpec),
            21 => Some(ContentType::Alert),
            22 => Some(ContentType::Handshake),
            23 => Some(ContentType::ApplicationData),
            _ => None,
        }
    }
}

/// A unit delivered upward by the record layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// One complete handshake message, header included.
    Handshake(Vec<u8>),
    ChangeCipherSpec,
    Alert(Alert),
    /// A non-empty application data fragment.
    ApplicationData(Vec<u8>),
}

/// Record layer state for one connection.
pub struct RecordLayer {
    read_current: ConnectionState,
    read_pending: ConnectionState,
    write_current: ConnectionState,
    write_pending: ConnectionState,
    /// Version written in outgoing headers.
    write_version: TlsVersion,
    /// Version required on incoming headers once negotiated.
    expected_version: Option<TlsVersion>,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    handshake_buf: Vec<u8>,
    eof: bool,
}

impl std::fmt::Debug for RecordLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLayer")
            .field("read", &self.read_current)
            .field("write", &self.write_current)
            .field("write_version", &self.write_version)
            .field("expected_version", &self.expected_version)
            .field("buffered_out", &self.write_buf.len())
            .finish_non_exhaustive()
    }
}

impl RecordLayer {
    /// A record layer with null protection, writing `initial_version`
    /// headers until a version is negotiated.
    pub fn new(initial_version: TlsVersion) -> Self {
        Self {
            read_current: ConnectionState::null(),
            read_pending: ConnectionState::null(),
            write_current: ConnectionState::null(),
            write_pending: ConnectionState::null(),
            write_version: initial_version,
            expected_version: None,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            handshake_buf: Vec::new(),
            eof: false,
        }
    }

    /// Fix the record version for both directions.
    pub fn set_version(&mut self, version: TlsVersion) {
        self.write_version = version;
        self.expected_version = Some(version);
    }

    pub fn write_version(&self) -> TlsVersion {
        self.write_version
    }

    /// Install the pending states derived from a new key block.
    pub fn set_pending(&mut self, read: ConnectionState, write: ConnectionState) {
        self.read_pending = read;
        self.write_pending = write;
    }

    /// Promote the pending write state (after sending ChangeCipherSpec).
    pub fn change_write_state(&mut self) {
        self.write_current = std::mem::take(&mut self.write_pending);
    }

    /// Promote the pending read state (after receiving ChangeCipherSpec).
    pub fn change_read_state(&mut self) {
        self.read_current = std::mem::take(&mut self.read_pending);
    }

    pub fn read_state(&self) -> &ConnectionState {
        &self.read_current
    }

    pub fn write_state(&self) -> &ConnectionState {
        &self.write_current
    }

    /// Whether output is waiting to be flushed.
    pub fn has_pending_output(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Whether a partial handshake message is buffered.
    pub fn has_partial_handshake(&self) -> bool {
        !self.handshake_buf.is_empty()
    }

    /// Protect `data` into one or more records and queue them.
    ///
    /// Application data on a CBC suite at TLS 1.0 or below is split 1/n-1
    /// so the first record's IV is not predictable by the sender's peer.
    pub fn send(&mut self, content_type: ContentType, data: &[u8]) -> Result<(), TlsError> {
        let mut rest = data;
        if content_type == ContentType::ApplicationData
            && self.write_current.is_cbc()
            && self.write_version <= TlsVersion::Tls10
            && data.len() > 1
        {
            self.write_record(content_type, &data[..1])?;
            rest = &data[1..];
        }
        if rest.is_empty() && content_type != ContentType::ApplicationData {
            return self.write_record(content_type, rest);
        }
        for chunk in rest.chunks(MAX_PLAINTEXT_LEN) {
            self.write_record(content_type, chunk)?;
        }
        Ok(())
    }

    fn write_record(&mut self, content_type: ContentType, fragment: &[u8]) -> Result<(), TlsError> {
        let payload = self.write_current.seal(content_type as u8, fragment)?;
        self.write_buf.reserve(RECORD_HEADER_LEN + payload.len());
        self.write_buf.push(content_type as u8);
        self.write_buf
            .extend_from_slice(&self.write_version.wire().to_be_bytes());
        self.write_buf
            .extend_from_slice(&(payload.len() as u16).to_be_bytes());
        self.write_buf.extend_from_slice(&payload);
        Ok(())
    }

    /// Queue an alert.
    pub fn send_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        self.send(ContentType::Alert, &alert.encode())
    }

    /// Write queued output to the transport.
    pub fn poll_flush(&mut self, transport: &mut dyn Transport) -> Poll<Result<(), TlsError>> {
        while !self.write_buf.is_empty() {
            match transport.send(&self.write_buf) {
                Ok(0) => {
                    return Poll::Ready(Err(TlsError::IoError(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ))))
                }
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Poll::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }
        match transport.flush_output() {
            Ok(()) => Poll::Ready(Ok(())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Poll::Pending,
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    /// Drop queued output (after a fatal error that could not be sent).
    pub fn discard_output(&mut self) {
        self.write_buf.clear();
    }

    /// Read and unprotect the next record.
    pub fn poll_record(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Poll<Result<(ContentType, Vec<u8>), TlsError>> {
        loop {
            if let Some(record) = self.try_take_record() {
                return Poll::Ready(record);
            }
            if self.eof {
                return Poll::Ready(Err(TlsError::UnexpectedEof));
            }
            let mut chunk = [0u8; READ_CHUNK];
            match transport.recv(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Poll::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }
    }

    /// Parse one record from the read buffer, if a whole one is present.
    fn try_take_record(&mut self) -> Option<Result<(ContentType, Vec<u8>), TlsError>> {
        if self.read_buf.len() < RECORD_HEADER_LEN {
            return None;
        }
        let header = &self.read_buf[..RECORD_HEADER_LEN];
        let Some(content_type) = ContentType::from_u8(header[0]) else {
            return Some(Err(TlsError::alert(
                AlertDescription::UnexpectedMessage,
                format!("unknown record content type {}", header[0]),
            )));
        };
        let version = u16::from_be_bytes([header[1], header[2]]);
        let length = u16::from_be_bytes([header[3], header[4]]) as usize;
        if let Err(e) = self.check_record_version(version) {
            return Some(Err(e));
        }
        if length > MAX_CIPHERTEXT_LEN {
            return Some(Err(TlsError::alert(
                AlertDescription::RecordOverflow,
                format!("record length {length} exceeds {MAX_CIPHERTEXT_LEN}"),
            )));
        }
        if self.read_buf.len() < RECORD_HEADER_LEN + length {
            return None;
        }
        let payload: Vec<u8> = self
            .read_buf
            .drain(..RECORD_HEADER_LEN + length)
            .skip(RECORD_HEADER_LEN)
            .collect();
        Some(
            self.read_current
                .open(content_type as u8, &payload)
                .map(|plaintext| (content_type, plaintext)),
        )
    }

    fn check_record_version(&self, version: u16) -> Result<(), TlsError> {
        match self.expected_version {
            Some(expected) if version != expected.wire() => Err(TlsError::alert(
                AlertDescription::ProtocolVersion,
                format!("record version 0x{version:04x}, negotiated {expected}"),
            )),
            None if version >> 8 != 3 => Err(TlsError::alert(
                AlertDescription::ProtocolVersion,
                format!("record version 0x{version:04x} is not SSL/TLS"),
            )),
            _ => Ok(()),
        }
    }

    /// Deliver the next message: a whole handshake message (reassembled or
    /// split out of a coalesced record), a ChangeCipherSpec, an alert, or a
    /// non-empty application data fragment.
    pub fn poll_message(&mut self, transport: &mut dyn Transport) -> Poll<Result<Message, TlsError>> {
        loop {
            if let Some(msg) = self.take_handshake_message() {
                return Poll::Ready(msg);
            }
            let (content_type, plaintext) = match self.poll_record(transport) {
                Poll::Ready(Ok(record)) => record,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            if content_type != ContentType::Handshake && !self.handshake_buf.is_empty() {
                return Poll::Ready(Err(TlsError::alert(
                    AlertDescription::UnexpectedMessage,
                    "record interleaved with a fragmented handshake message",
                )));
            }
            match content_type {
                ContentType::Handshake => {
                    if plaintext.is_empty() {
                        return Poll::Ready(Err(TlsError::alert(
                            AlertDescription::UnexpectedMessage,
                            "empty handshake record",
                        )));
                    }
                    self.handshake_buf.extend_from_slice(&plaintext);
                }
                ContentType::ChangeCipherSpec => {
                    return Poll::Ready(if plaintext == [1] {
                        Ok(Message::ChangeCipherSpec)
                    } else {
                        Err(TlsError::alert(
                            AlertDescription::DecodeError,
                            "malformed ChangeCipherSpec",
                        ))
                    });
                }
                ContentType::Alert => match Alert::decode(&plaintext) {
                    Ok(alert) => return Poll::Ready(Ok(Message::Alert(alert))),
                    Err(AlertDecodeError::Description(code))
                        if plaintext.first() == Some(&(AlertLevel::Warning as u8)) =>
                    {
                        warn!(code, "ignoring warning alert with unknown description");
                    }
                    Err(e) => {
                        return Poll::Ready(Err(TlsError::alert(
                            AlertDescription::DecodeError,
                            format!("malformed alert: {e:?}"),
                        )))
                    }
                },
                ContentType::ApplicationData => {
                    if !plaintext.is_empty() {
                        return Poll::Ready(Ok(Message::ApplicationData(plaintext)));
                    }
                    // empty fragments carry nothing; read on
                }
            }
        }
    }

    fn take_handshake_message(&mut self) -> Option<Result<Message, TlsError>> {
        if self.handshake_buf.len() >= 4 {
            let declared = ((self.handshake_buf[1] as usize) << 16)
                | ((self.handshake_buf[2] as usize) << 8)
                | self.handshake_buf[3] as usize;
            if declared > MAX_HANDSHAKE_MESSAGE_LEN {
                return Some(Err(TlsError::alert(
                    AlertDescription::DecodeError,
                    format!("handshake message of {declared} bytes"),
                )));
            }
        }
        let (_, _, total) = parse_handshake_header(&self.handshake_buf)?;
        let message: Vec<u8> = self.handshake_buf.drain(..total).collect();
        Some(Ok(Message::Handshake(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::CipherSuiteParams;
    use crate::CipherSuite;
    use litetls_crypto::RustCryptoProvider;
    use std::collections::VecDeque;

    /// Loopback transport delivering at most `chunk` bytes per read.
    struct Loopback {
        data: VecDeque<u8>,
        chunk: usize,
        closed: bool,
    }

    impl Loopback {
        fn new(chunk: usize) -> Self {
            Self {
                data: VecDeque::new(),
                chunk,
                closed: false,
            }
        }
    }

    impl Transport for Loopback {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return if self.closed {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            }
            let n = buf.len().min(self.chunk).min(self.data.len());
            for b in buf.iter_mut().take(n) {
                *b = self.data.pop_front().unwrap();
            }
            Ok(n)
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend(buf);
            Ok(buf.len())
        }
    }

    fn ready<T>(p: Poll<Result<T, TlsError>>) -> T {
        match p {
            Poll::Ready(r) => r.unwrap(),
            Poll::Pending => panic!("unexpected pending"),
        }
    }

    fn protected_pair(
        suite: CipherSuite,
        version: TlsVersion,
    ) -> (ConnectionState, ConnectionState) {
        let p = CipherSuiteParams::lookup(suite).unwrap();
        let provider = RustCryptoProvider::shared();
        let mk = vec![1u8; p.mac_len()];
        let k = vec![2u8; p.key_len()];
        let iv = vec![3u8; p.fixed_iv_len()];
        (
            ConnectionState::new(provider.clone(), p, version, &mk, &k, &iv, false).unwrap(),
            ConnectionState::new(provider, p, version, &mk, &k, &iv, false).unwrap(),
        )
    }

    #[test]
    fn test_plaintext_record_wire_format() {
        let mut rl = RecordLayer::new(TlsVersion::Tls10);
        rl.send(ContentType::Handshake, &[14, 0, 0, 0]).unwrap();
        let mut t = Loopback::new(usize::MAX);
        ready(rl.poll_flush(&mut t));
        let wire: Vec<u8> = t.data.iter().copied().collect();
        assert_eq!(wire, [22, 3, 1, 0, 4, 14, 0, 0, 0]);
    }

    #[test]
    fn test_coalesced_and_split_handshake_messages() {
        let mut writer = RecordLayer::new(TlsVersion::Tls12);
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(3);

        // two messages in one record
        writer
            .send(ContentType::Handshake, &[14, 0, 0, 0, 20, 0, 0, 2, 0xAA, 0xBB])
            .unwrap();
        // one message split across two records
        writer.send(ContentType::Handshake, &[11, 0, 0, 3, 1]).unwrap();
        writer.send(ContentType::Handshake, &[2, 3]).unwrap();
        ready(writer.poll_flush(&mut t));

        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::Handshake(vec![14, 0, 0, 0])
        );
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::Handshake(vec![20, 0, 0, 2, 0xAA, 0xBB])
        );
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::Handshake(vec![11, 0, 0, 3, 1, 2, 3])
        );
        assert!(reader.poll_message(&mut t).is_pending());
    }

    #[test]
    fn test_pending_resumes_mid_record() {
        let mut writer = RecordLayer::new(TlsVersion::Tls12);
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut staging = Loopback::new(usize::MAX);
        writer.send(ContentType::ApplicationData, b"resumable").unwrap();
        ready(writer.poll_flush(&mut staging));

        let mut t = Loopback::new(usize::MAX);
        // feed the record one byte at a time
        while let Some(b) = staging.data.pop_front() {
            assert!(reader.poll_message(&mut t).is_pending());
            t.data.push_back(b);
        }
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::ApplicationData(b"resumable".to_vec())
        );
    }

    #[test]
    fn test_empty_application_data_skipped() {
        let mut writer = RecordLayer::new(TlsVersion::Tls12);
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        writer.write_record(ContentType::ApplicationData, b"").unwrap();
        writer.write_record(ContentType::ApplicationData, b"").unwrap();
        writer.send(ContentType::ApplicationData, b"data").unwrap();
        ready(writer.poll_flush(&mut t));
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::ApplicationData(b"data".to_vec())
        );
    }

    #[test]
    fn test_record_overflow() {
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        let len = (MAX_CIPHERTEXT_LEN + 1) as u16;
        t.data.extend([23, 3, 3]);
        t.data.extend(len.to_be_bytes());
        match reader.poll_record(&mut t) {
            Poll::Ready(Err(e)) => {
                assert_eq!(e.alert_description(), Some(AlertDescription::RecordOverflow))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_version_mismatch_after_negotiation() {
        let mut writer = RecordLayer::new(TlsVersion::Tls10);
        let mut reader = RecordLayer::new(TlsVersion::Tls10);
        reader.set_version(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        writer.send(ContentType::Handshake, &[14, 0, 0, 0]).unwrap();
        ready(writer.poll_flush(&mut t));
        match reader.poll_message(&mut t) {
            Poll::Ready(Err(e)) => {
                assert_eq!(e.alert_description(), Some(AlertDescription::ProtocolVersion))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_content_type() {
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        t.data.extend([99, 3, 3, 0, 0]);
        match reader.poll_record(&mut t) {
            Poll::Ready(Err(e)) => {
                assert_eq!(e.alert_description(), Some(AlertDescription::UnexpectedMessage))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_eof_reported() {
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        t.closed = true;
        assert!(matches!(
            reader.poll_record(&mut t),
            Poll::Ready(Err(TlsError::UnexpectedEof))
        ));
    }

    #[test]
    fn test_change_cipher_spec_promotes_pending() {
        let suite = CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA;
        let mut writer = RecordLayer::new(TlsVersion::Tls10);
        let mut reader = RecordLayer::new(TlsVersion::Tls10);
        let (w, r) = protected_pair(suite, TlsVersion::Tls10);
        writer.set_pending(ConnectionState::null(), w);
        reader.set_pending(r, ConnectionState::null());
        assert!(writer.write_state().is_null());
        writer.change_write_state();
        reader.change_read_state();
        assert!(writer.write_state().is_cbc());
        assert!(reader.read_state().is_cbc());

        let mut t = Loopback::new(7);
        writer.send(ContentType::ApplicationData, b"split me").unwrap();
        ready(writer.poll_flush(&mut t));
        // 1/n-1 split at TLS 1.0 with CBC
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::ApplicationData(b"s".to_vec())
        );
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::ApplicationData(b"plit me".to_vec())
        );
        assert_eq!(writer.write_state().sequence_number(), 2);
    }

    #[test]
    fn test_large_write_fragmented() {
        let mut writer = RecordLayer::new(TlsVersion::Tls12);
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let (w, r) = protected_pair(CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, TlsVersion::Tls12);
        writer.set_pending(ConnectionState::null(), w);
        reader.set_pending(r, ConnectionState::null());
        writer.change_write_state();
        reader.change_read_state();

        let data = vec![0x5Au8; MAX_PLAINTEXT_LEN * 2 + 10];
        let mut t = Loopback::new(usize::MAX);
        writer.send(ContentType::ApplicationData, &data).unwrap();
        ready(writer.poll_flush(&mut t));
        let mut got = Vec::new();
        while got.len() < data.len() {
            match ready(reader.poll_message(&mut t)) {
                Message::ApplicationData(d) => {
                    assert!(d.len() <= MAX_PLAINTEXT_LEN);
                    got.extend(d);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(got, data);
        assert_eq!(reader.read_state().sequence_number(), 3);
    }

    #[test]
    fn test_alert_and_ccs_messages() {
        let mut writer = RecordLayer::new(TlsVersion::Tls12);
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        writer.send_alert(Alert::close_notify()).unwrap();
        writer.send(ContentType::ChangeCipherSpec, &[1]).unwrap();
        writer.send(ContentType::ChangeCipherSpec, &[2]).unwrap();
        ready(writer.poll_flush(&mut t));
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::Alert(Alert::close_notify())
        );
        assert_eq!(ready(reader.poll_message(&mut t)), Message::ChangeCipherSpec);
        assert!(matches!(reader.poll_message(&mut t), Poll::Ready(Err(_))));
    }

    #[test]
    fn test_unknown_warning_alert_skipped() {
        let mut writer = RecordLayer::new(TlsVersion::Tls12);
        let mut reader = RecordLayer::new(TlsVersion::Tls12);
        let mut t = Loopback::new(usize::MAX);
        writer.send(ContentType::Alert, &[1, 200]).unwrap();
        writer.send(ContentType::ApplicationData, b"still here").unwrap();
        writer.send(ContentType::Alert, &[2, 200]).unwrap();
        ready(writer.poll_flush(&mut t));
        assert_eq!(
            ready(reader.poll_message(&mut t)),
            Message::ApplicationData(b"still here".to_vec())
        );
        match reader.poll_message(&mut t) {
            Poll::Ready(Err(e)) => {
                assert_eq!(e.alert_description(), Some(AlertDescription::DecodeError))
            }
            _ => panic!("unknown fatal alert accepted"),
        }
    }
}
