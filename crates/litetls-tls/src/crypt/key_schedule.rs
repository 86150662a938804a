//! Master secret, key block and Finished derivation (RFC 5246 §6.3, §7.4.9,
//! §8.1; RFC 7627; RFC 6101 §6).

use super::prf::Prf;
use super::transcript::{HandshakeTranscript, SSL3_SENDER_CLIENT, SSL3_SENDER_SERVER};
use super::CipherSuiteParams;
use crate::{TlsRole, TlsVersion};
use litetls_crypto::CryptoProvider;
use litetls_types::TlsError;
use zeroize::Zeroize;

/// Length of the master secret.
pub const MASTER_SECRET_LEN: usize = 48;
/// Length of TLS Finished verify_data.
pub const VERIFY_DATA_LEN: usize = 12;
/// Length of SSL 3.0 Finished data (MD5 || SHA-1).
pub const SSL3_VERIFY_DATA_LEN: usize = 36;

/// Key block sliced in wire order: MAC keys, encryption keys, IVs.
///
/// For GCM suites the MAC keys are empty and the IVs are the 4-byte salts.
pub struct KeyBlock {
    pub client_write_mac_key: Vec<u8>,
    pub server_write_mac_key: Vec<u8>,
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

impl Drop for KeyBlock {
    fn drop(&mut self) {
        self.client_write_mac_key.zeroize();
        self.server_write_mac_key.zeroize();
        self.client_write_key.zeroize();
        self.server_write_key.zeroize();
        self.client_write_iv.zeroize();
        self.server_write_iv.zeroize();
    }
}

/// Derive the 48-byte master secret.
///
/// ```text
/// master_secret = PRF(pre_master_secret, "master secret",
///                     ClientHello.random + ServerHello.random)
/// ```
///
/// With `session_hash` set (extended master secret), the label is
/// `"extended master secret"` and the seed is the session hash.
pub fn derive_master_secret(
    provider: &dyn CryptoProvider,
    prf: Prf,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    session_hash: Option<&[u8]>,
) -> Result<Vec<u8>, TlsError> {
    match session_hash {
        Some(hash) => prf.derive(
            provider,
            pre_master_secret,
            "extended master secret",
            hash,
            MASTER_SECRET_LEN,
        ),
        None => {
            let mut seed = Vec::with_capacity(64);
            seed.extend_from_slice(client_random);
            seed.extend_from_slice(server_random);
            prf.derive(
                provider,
                pre_master_secret,
                "master secret",
                &seed,
                MASTER_SECRET_LEN,
            )
        }
    }
}

/// Expand the master secret into the key block.
///
/// ```text
/// key_block = PRF(master_secret, "key expansion",
///                 ServerHello.random + ClientHello.random)
/// ```
pub fn derive_key_block(
    provider: &dyn CryptoProvider,
    prf: Prf,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    params: &CipherSuiteParams,
) -> Result<KeyBlock, TlsError> {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);

    let mut block = prf.derive(
        provider,
        master_secret,
        "key expansion",
        &seed,
        params.key_block_len(),
    )?;

    let mac_len = params.mac_len();
    let key_len = params.key_len();
    let iv_len = params.fixed_iv_len();
    let mut offset = 0;
    let mut take = |n: usize| {
        let out = block[offset..offset + n].to_vec();
        offset += n;
        out
    };
    let kb = KeyBlock {
        client_write_mac_key: take(mac_len),
        server_write_mac_key: take(mac_len),
        client_write_key: take(key_len),
        server_write_key: take(key_len),
        client_write_iv: take(iv_len),
        server_write_iv: take(iv_len),
    };
    block.zeroize();
    Ok(kb)
}

/// Compute Finished verify_data for the message sent by `sender`, over the
/// transcript up to (not including) that Finished message.
///
/// TLS: `PRF(master_secret, "<role> finished", session_hash)[0..12]`.
/// SSL 3.0: the 36-byte MD5/SHA-1 hash with sender `CLNT` or `SRVR`.
pub fn compute_verify_data(
    provider: &dyn CryptoProvider,
    prf: Prf,
    master_secret: &[u8],
    transcript: &HandshakeTranscript,
    sender: TlsRole,
    version: TlsVersion,
) -> Result<Vec<u8>, TlsError> {
    if version == TlsVersion::Ssl30 {
        let label = match sender {
            TlsRole::Client => SSL3_SENDER_CLIENT,
            TlsRole::Server => SSL3_SENDER_SERVER,
        };
        return transcript.ssl3_hash(provider, master_secret, Some(label));
    }
    let hash = match prf {
        Prf::Tls12(alg) => transcript.hash(provider, alg)?,
        _ => transcript.md5_sha1(provider)?,
    };
    let label = match sender {
        TlsRole::Client => "client finished",
        TlsRole::Server => "server finished",
    };
    prf.derive(provider, master_secret, label, &hash, VERIFY_DATA_LEN)
}
