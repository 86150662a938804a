//! Handshake transcript.
//!
//! Keeps every handshake byte sent or received since the handshake began
//! and replays it into fresh digests on demand. The hash a handshake needs
//! (MD5||SHA-1 before TLS 1.2, the suite hash after) is only known once
//! the ServerHello has been processed, so nothing is hashed eagerly.

use crate::TlsVersion;
use litetls_crypto::CryptoProvider;
use litetls_types::{HashAlgId, TlsError};
use zeroize::Zeroize;

pub(crate) const SSL3_PAD1: u8 = 0x36;
pub(crate) const SSL3_PAD2: u8 = 0x5c;
pub(crate) const SSL3_MD5_PAD_LEN: usize = 48;
pub(crate) const SSL3_SHA1_PAD_LEN: usize = 40;

/// Sender labels of the SSL 3.0 Finished hash.
pub const SSL3_SENDER_CLIENT: &[u8; 4] = b"CLNT";
pub const SSL3_SENDER_SERVER: &[u8; 4] = b"SRVR";

/// Buffered transcript of one handshake.
#[derive(Default)]
pub struct HandshakeTranscript {
    messages: Vec<u8>,
}

impl HandshakeTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a complete handshake message (header included).
    pub fn update(&mut self, message: &[u8]) {
        self.messages.extend_from_slice(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop everything, ready for a new handshake.
    pub fn reset(&mut self) {
        self.messages.zeroize();
        self.messages.clear();
    }

    /// Digest of the transcript under a single hash.
    pub fn hash(&self, provider: &dyn CryptoProvider, alg: HashAlgId) -> Result<Vec<u8>, TlsError> {
        Ok(provider.hash(alg, &self.messages)?)
    }

    /// MD5 || SHA-1 of the transcript (36 bytes).
    pub fn md5_sha1(&self, provider: &dyn CryptoProvider) -> Result<Vec<u8>, TlsError> {
        let mut out = self.hash(provider, HashAlgId::Md5)?;
        out.extend_from_slice(&self.hash(provider, HashAlgId::Sha1)?);
        Ok(out)
    }

    /// The session hash used for Finished (TLS) and the extended master
    /// secret: MD5||SHA-1 before TLS 1.2, the suite PRF hash at 1.2.
    pub fn session_hash(
        &self,
        provider: &dyn CryptoProvider,
        version: TlsVersion,
        prf_hash: HashAlgId,
    ) -> Result<Vec<u8>, TlsError> {
        if version == TlsVersion::Tls12 {
            self.hash(provider, prf_hash)
        } else {
            self.md5_sha1(provider)
        }
    }

    /// SSL 3.0 handshake hash (RFC 6101 §5.6.8, §5.6.9):
    ///
    /// ```text
    /// hash(master_secret + pad2 + hash(handshake_messages + Sender +
    ///      master_secret + pad1))
    /// ```
    ///
    /// `sender` is `CLNT`/`SRVR` for Finished and `None` for
    /// CertificateVerify. Returns MD5 || SHA-1 (36 bytes).
    pub fn ssl3_hash(
        &self,
        provider: &dyn CryptoProvider,
        master_secret: &[u8],
        sender: Option<&[u8; 4]>,
    ) -> Result<Vec<u8>, TlsError> {
        let mut out = Vec::with_capacity(36);
        for (alg, pad_len) in [
            (HashAlgId::Md5, SSL3_MD5_PAD_LEN),
            (HashAlgId::Sha1, SSL3_SHA1_PAD_LEN),
        ] {
            let mut inner_ctx = provider.digest(alg)?;
            inner_ctx.update(&self.messages);
            if let Some(sender) = sender {
                inner_ctx.update(sender);
            }
            inner_ctx.update(master_secret);
            inner_ctx.update(&vec![SSL3_PAD1; pad_len]);
            let mut inner = vec![0u8; alg.output_size()];
            inner_ctx.finish(&mut inner)?;

            let mut outer_ctx = provider.digest(alg)?;
            outer_ctx.update(master_secret);
            outer_ctx.update(&vec![SSL3_PAD2; pad_len]);
            outer_ctx.update(&inner);
            let mut outer = vec![0u8; alg.output_size()];
            outer_ctx.finish(&mut outer)?;
            out.extend_from_slice(&outer);
        }
        Ok(out)
    }
}

impl Drop for HandshakeTranscript {
    fn drop(&mut self) {
        self.messages.zeroize();
    }
}
