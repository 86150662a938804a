//! Per-direction record protection (RFC 5246 §6.2.3, RFC 6101 §5.2.3,
//! RFC 7366, RFC 5288).
//!
//! A [`ConnectionState`] protects or unprotects record fragments for one
//! direction. It owns the sequence number, which starts at zero and must
//! never wrap.
//!
//! CBC, MAC-then-encrypt:
//! ```text
//! fragment = [explicit_IV] || CBC(plaintext || MAC || padding)
//! MAC      = HMAC(mac_key, seq || type || version || length || plaintext)
//! ```
//! CBC, encrypt-then-MAC: `[explicit_IV] || CBC(plaintext || padding) || MAC`
//! with the MAC taken over the IV and ciphertext.
//!
//! GCM: `explicit_nonce(8) || ciphertext || tag`, nonce = salt(4) || seq.

use std::sync::Arc;

use crate::crypt::key_schedule::KeyBlock;
use crate::crypt::transcript::{SSL3_MD5_PAD_LEN, SSL3_PAD1, SSL3_PAD2, SSL3_SHA1_PAD_LEN};
use crate::crypt::CipherSuiteParams;
use crate::{TlsRole, TlsVersion};
use litetls_crypto::{Aead, BlockCipher, CryptoProvider, Mac};
use litetls_types::{AlertDescription, HashAlgId, TlsError};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, ConstantTimeLess};
use zeroize::Zeroize;

use super::MAX_PLAINTEXT_LEN;

const BLOCK_SIZE: usize = 16;
const AEAD_EXPLICIT_NONCE_LEN: usize = 8;
const AEAD_SALT_LEN: usize = 4;

fn bad_record_mac() -> TlsError {
    TlsError::alert(AlertDescription::BadRecordMac, "bad record MAC")
}

/// Record MAC: HMAC for TLS, the SSL 3.0 keyed hash before that.
enum RecordMac {
    Hmac(Box<dyn Mac>),
    Ssl3 { hash: HashAlgId, key: Vec<u8> },
}

struct CbcState {
    cipher: Box<dyn BlockCipher>,
    mac: RecordMac,
    mac_len: usize,
    /// Chained IV for SSL 3.0 / TLS 1.0 (last ciphertext block).
    iv: Vec<u8>,
    explicit_iv: bool,
    encrypt_then_mac: bool,
}

struct AeadState {
    aead: Box<dyn Aead>,
    salt: [u8; AEAD_SALT_LEN],
}

enum Protection {
    Null,
    Cbc(CbcState),
    Aead(AeadState),
}

/// Cipher, MAC and sequence number for one direction.
pub struct ConnectionState {
    provider: Option<Arc<dyn CryptoProvider>>,
    version: TlsVersion,
    seq: u64,
    protection: Protection,
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        if let Protection::Cbc(cbc) = &mut self.protection {
            cbc.iv.zeroize();
            if let RecordMac::Ssl3 { key, .. } = &mut cbc.mac {
                key.zeroize();
            }
        }
        if let Protection::Aead(aead) = &mut self.protection {
            aead.salt.zeroize();
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::null()
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.protection {
            Protection::Null => "null",
            Protection::Cbc(c) if c.encrypt_then_mac => "cbc-etm",
            Protection::Cbc(_) => "cbc",
            Protection::Aead(_) => "aead",
        };
        f.debug_struct("ConnectionState")
            .field("kind", &kind)
            .field("version", &self.version)
            .field("seq", &self.seq)
            .finish()
    }
}

impl ConnectionState {
    /// The initial state: no encryption, no MAC.
    pub fn null() -> Self {
        Self {
            provider: None,
            version: TlsVersion::Tls10,
            seq: 0,
            protection: Protection::Null,
        }
    }

    /// Build a protecting state from explicit key material.
    ///
    /// `iv` is the CBC IV (used only when the version chains IVs) or the
    /// 4-byte GCM salt.
    pub fn new(
        provider: Arc<dyn CryptoProvider>,
        params: &CipherSuiteParams,
        version: TlsVersion,
        mac_key: &[u8],
        key: &[u8],
        iv: &[u8],
        encrypt_then_mac: bool,
    ) -> Result<Self, TlsError> {
        let protection = if params.is_aead() {
            if iv.len() != AEAD_SALT_LEN {
                return Err(TlsError::alert(
                    AlertDescription::InternalError,
                    "bad AEAD salt length",
                ));
            }
            let mut salt = [0u8; AEAD_SALT_LEN];
            salt.copy_from_slice(iv);
            Protection::Aead(AeadState {
                aead: provider.aead(params.cipher, key)?,
                salt,
            })
        } else {
            let hash = params.mac.hash().ok_or_else(|| {
                TlsError::alert(AlertDescription::InternalError, "CBC suite without MAC")
            })?;
            let mac = if version == TlsVersion::Ssl30 {
                RecordMac::Ssl3 {
                    hash,
                    key: mac_key.to_vec(),
                }
            } else {
                RecordMac::Hmac(provider.hmac(hash, mac_key)?)
            };
            Protection::Cbc(CbcState {
                cipher: provider.block_cipher(params.cipher, key)?,
                mac,
                mac_len: hash.output_size(),
                iv: iv.to_vec(),
                explicit_iv: version >= TlsVersion::Tls11,
                encrypt_then_mac: encrypt_then_mac && version != TlsVersion::Ssl30,
            })
        };
        Ok(Self {
            provider: Some(provider),
            version,
            seq: 0,
            protection,
        })
    }

    /// Build the state protecting records written by `writer`.
    pub fn from_key_block(
        provider: Arc<dyn CryptoProvider>,
        params: &CipherSuiteParams,
        version: TlsVersion,
        key_block: &KeyBlock,
        writer: TlsRole,
        encrypt_then_mac: bool,
    ) -> Result<Self, TlsError> {
        let (mac_key, key, iv) = match writer {
            TlsRole::Client => (
                &key_block.client_write_mac_key,
                &key_block.client_write_key,
                &key_block.client_write_iv,
            ),
            TlsRole::Server => (
                &key_block.server_write_mac_key,
                &key_block.server_write_key,
                &key_block.server_write_iv,
            ),
        };
        Self::new(provider, params, version, mac_key, key, iv, encrypt_then_mac)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.protection, Protection::Null)
    }

    /// Whether a CBC suite is active.
    pub fn is_cbc(&self) -> bool {
        matches!(self.protection, Protection::Cbc(_))
    }

    pub fn version(&self) -> TlsVersion {
        self.version
    }

    /// Sequence number of the next record.
    pub fn sequence_number(&self) -> u64 {
        self.seq
    }

    fn next_seq(&mut self) -> Result<u64, TlsError> {
        let seq = self.seq;
        self.seq = seq.checked_add(1).ok_or_else(|| {
            TlsError::alert(AlertDescription::InternalError, "sequence number overflow")
        })?;
        Ok(seq)
    }

    fn provider(&self) -> Result<&dyn CryptoProvider, TlsError> {
        self.provider
            .as_deref()
            .ok_or_else(|| TlsError::alert(AlertDescription::InternalError, "no crypto provider"))
    }

    /// Protect one plaintext fragment, returning the record payload.
    pub fn seal(&mut self, content_type: u8, plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(TlsError::alert(
                AlertDescription::InternalError,
                "plaintext exceeds maximum fragment length",
            ));
        }
        if matches!(self.protection, Protection::Null) {
            return Ok(plaintext.to_vec());
        }
        let seq = self.next_seq()?;
        let version = self.version;
        let explicit_iv = match &self.protection {
            Protection::Cbc(cbc) if cbc.explicit_iv => {
                Some(self.provider()?.random_vec(BLOCK_SIZE)?)
            }
            _ => None,
        };
        let provider = self.provider.clone();
        match &mut self.protection {
            Protection::Null => Ok(plaintext.to_vec()),
            Protection::Aead(state) => {
                let explicit = seq.to_be_bytes();
                let nonce = aead_nonce(&state.salt, &explicit);
                let aad = mac_header(seq, content_type, version, plaintext.len());
                let sealed = state.aead.encrypt(&nonce, &aad, plaintext)?;
                let mut out = Vec::with_capacity(AEAD_EXPLICIT_NONCE_LEN + sealed.len());
                out.extend_from_slice(&explicit);
                out.extend_from_slice(&sealed);
                Ok(out)
            }
            Protection::Cbc(cbc) => {
                let provider = provider.as_deref();
                if cbc.encrypt_then_mac {
                    let mut data = plaintext.to_vec();
                    data.extend_from_slice(&tls_padding(data.len()));
                    let mut out = cbc.encrypt(explicit_iv.as_deref(), data)?;
                    let mac = cbc.compute_mac(provider, seq, content_type, version, &out)?;
                    out.extend_from_slice(&mac);
                    Ok(out)
                } else {
                    let mac = cbc.compute_mac(provider, seq, content_type, version, plaintext)?;
                    let mut data = Vec::with_capacity(plaintext.len() + mac.len() + BLOCK_SIZE);
                    data.extend_from_slice(plaintext);
                    data.extend_from_slice(&mac);
                    data.extend_from_slice(&tls_padding(data.len()));
                    cbc.encrypt(explicit_iv.as_deref(), data)
                }
            }
        }
    }

    /// Verify and decrypt one record payload.
    ///
    /// Every authentication failure (MAC, padding, tag, length) is reported
    /// as the same `bad_record_mac` error.
    pub fn open(&mut self, content_type: u8, fragment: &[u8]) -> Result<Vec<u8>, TlsError> {
        if matches!(self.protection, Protection::Null) {
            return check_plaintext_len(fragment.to_vec());
        }
        let seq = self.next_seq()?;
        let version = self.version;
        let provider = self.provider.clone();
        let plaintext = match &mut self.protection {
            Protection::Null => fragment.to_vec(),
            Protection::Aead(state) => {
                let tag_len = state.aead.tag_size();
                if fragment.len() < AEAD_EXPLICIT_NONCE_LEN + tag_len {
                    return Err(bad_record_mac());
                }
                let (explicit, sealed) = fragment.split_at(AEAD_EXPLICIT_NONCE_LEN);
                let nonce = aead_nonce(&state.salt, explicit);
                let aad = mac_header(seq, content_type, version, sealed.len() - tag_len);
                state
                    .aead
                    .decrypt(&nonce, &aad, sealed)
                    .map_err(|_| bad_record_mac())?
            }
            Protection::Cbc(cbc) => {
                let provider = provider.as_deref();
                if cbc.encrypt_then_mac {
                    cbc.open_etm(provider, seq, content_type, version, fragment)?
                } else {
                    cbc.open_mte(provider, seq, content_type, version, fragment)?
                }
            }
        };
        check_plaintext_len(plaintext)
    }
}

fn check_plaintext_len(plaintext: Vec<u8>) -> Result<Vec<u8>, TlsError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(TlsError::alert(
            AlertDescription::RecordOverflow,
            "plaintext fragment too long",
        ));
    }
    Ok(plaintext)
}

fn aead_nonce(salt: &[u8; AEAD_SALT_LEN], explicit: &[u8]) -> Vec<u8> {
    let mut nonce = Vec::with_capacity(AEAD_SALT_LEN + AEAD_EXPLICIT_NONCE_LEN);
    nonce.extend_from_slice(salt);
    nonce.extend_from_slice(explicit);
    nonce
}

/// `seq_num || type || version || length`, the MAC / AAD prefix.
fn mac_header(seq: u64, content_type: u8, version: TlsVersion, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.extend_from_slice(&seq.to_be_bytes());
    out.push(content_type);
    out.extend_from_slice(&version.wire().to_be_bytes());
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out
}

/// TLS padding: `padding_length + 1` bytes, all equal to `padding_length`.
fn tls_padding(data_len: usize) -> Vec<u8> {
    let padding_length = (BLOCK_SIZE - ((data_len + 1) % BLOCK_SIZE)) % BLOCK_SIZE;
    vec![padding_length as u8; padding_length + 1]
}

impl CbcState {
    fn compute_mac(
        &mut self,
        provider: Option<&dyn CryptoProvider>,
        seq: u64,
        content_type: u8,
        version: TlsVersion,
        data: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let mut out = vec![0u8; self.mac_len];
        match &mut self.mac {
            RecordMac::Hmac(mac) => {
                mac.update(&mac_header(seq, content_type, version, data.len()));
                mac.update(data);
                mac.finish(&mut out)?;
            }
            RecordMac::Ssl3 { hash, key } => {
                let provider = provider.ok_or_else(|| {
                    TlsError::alert(AlertDescription::InternalError, "no crypto provider")
                })?;
                let pad_len = if *hash == HashAlgId::Md5 {
                    SSL3_MD5_PAD_LEN
                } else {
                    SSL3_SHA1_PAD_LEN
                };
                // hash(key + pad2 + hash(key + pad1 + seq + type + length + data))
                let mut inner = provider.digest(*hash)?;
                inner.update(key);
                inner.update(&vec![SSL3_PAD1; pad_len]);
                inner.update(&seq.to_be_bytes());
                inner.update(&[content_type]);
                inner.update(&(data.len() as u16).to_be_bytes());
                inner.update(data);
                let mut inner_out = vec![0u8; self.mac_len];
                inner.finish(&mut inner_out)?;

                let mut outer = provider.digest(*hash)?;
                outer.update(key);
                outer.update(&vec![SSL3_PAD2; pad_len]);
                outer.update(&inner_out);
                outer.finish(&mut out)?;
            }
        }
        Ok(out)
    }

    /// CBC-encrypt `data` (already padded). With an explicit IV the IV is
    /// prefixed to the output; otherwise the chained IV is used and updated.
    fn encrypt(&mut self, explicit_iv: Option<&[u8]>, mut data: Vec<u8>) -> Result<Vec<u8>, TlsError> {
        let iv = match explicit_iv {
            Some(iv) => iv.to_vec(),
            None => self.iv.clone(),
        };
        let mut prev = [0u8; BLOCK_SIZE];
        prev.copy_from_slice(&iv[..BLOCK_SIZE]);
        for chunk in data.chunks_mut(BLOCK_SIZE) {
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            self.cipher.encrypt_block(chunk)?;
            prev.copy_from_slice(chunk);
        }
        match explicit_iv {
            Some(iv) => {
                let mut out = Vec::with_capacity(iv.len() + data.len());
                out.extend_from_slice(iv);
                out.extend_from_slice(&data);
                Ok(out)
            }
            None => {
                self.iv = prev.to_vec();
                Ok(data)
            }
        }
    }

    /// CBC-decrypt a record body (with its explicit IV, if any). The caller
    /// has checked the length is a positive multiple of the block size.
    fn decrypt(&mut self, body: &[u8]) -> Result<Vec<u8>, TlsError> {
        let (iv, ciphertext) = if self.explicit_iv {
            body.split_at(BLOCK_SIZE)
        } else {
            (self.iv.as_slice(), body)
        };
        let mut prev = [0u8; BLOCK_SIZE];
        prev.copy_from_slice(&iv[..BLOCK_SIZE]);
        let mut data = ciphertext.to_vec();
        for chunk in data.chunks_mut(BLOCK_SIZE) {
            let mut saved = [0u8; BLOCK_SIZE];
            saved.copy_from_slice(chunk);
            self.cipher.decrypt_block(chunk)?;
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            prev = saved;
        }
        if !self.explicit_iv {
            self.iv = prev.to_vec();
        }
        Ok(data)
    }

    fn iv_overhead(&self) -> usize {
        if self.explicit_iv {
            BLOCK_SIZE
        } else {
            0
        }
    }

    fn open_mte(
        &mut self,
        provider: Option<&dyn CryptoProvider>,
        seq: u64,
        content_type: u8,
        version: TlsVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let min_body = (self.mac_len + 1).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let body_len = fragment.len().saturating_sub(self.iv_overhead());
        if body_len < min_body || body_len % BLOCK_SIZE != 0 {
            return Err(bad_record_mac());
        }
        let decrypted = self.decrypt(fragment)?;
        let len = decrypted.len();
        let pad_len = decrypted[len - 1] as usize;
        let overhead = pad_len + 1 + self.mac_len;

        // overhead <= len
        let good_length = (overhead as u64).ct_lt(&(len as u64 + 1));
        let mut pad_ok = good_length;
        if version == TlsVersion::Ssl30 {
            pad_ok &= (pad_len as u64).ct_lt(&(BLOCK_SIZE as u64));
        } else {
            pad_ok &= check_padding_bytes(&decrypted, pad_len);
        }

        let fallback = (len - self.mac_len) as u64;
        let candidate = (len as u64).wrapping_sub(overhead as u64);
        let content_len = u64::conditional_select(&fallback, &candidate, good_length) as usize;

        let expected = self.compute_mac(
            provider,
            seq,
            content_type,
            version,
            &decrypted[..content_len],
        )?;
        let received = &decrypted[content_len..content_len + self.mac_len];
        let mac_ok = received.ct_eq(expected.as_slice());

        if bool::from(pad_ok & mac_ok) {
            let mut plaintext = decrypted;
            plaintext.truncate(content_len);
            Ok(plaintext)
        } else {
            Err(bad_record_mac())
        }
    }

    fn open_etm(
        &mut self,
        provider: Option<&dyn CryptoProvider>,
        seq: u64,
        content_type: u8,
        version: TlsVersion,
        fragment: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let min_len = self.iv_overhead() + BLOCK_SIZE + self.mac_len;
        if fragment.len() < min_len {
            return Err(bad_record_mac());
        }
        let (body, tag) = fragment.split_at(fragment.len() - self.mac_len);
        let expected = self.compute_mac(provider, seq, content_type, version, body)?;
        if !bool::from(tag.ct_eq(expected.as_slice())) {
            return Err(bad_record_mac());
        }
        if (body.len() - self.iv_overhead()) % BLOCK_SIZE != 0 {
            return Err(bad_record_mac());
        }
        let mut decrypted = self.decrypt(body)?;
        let len = decrypted.len();
        let pad_len = decrypted[len - 1] as usize;
        if pad_len + 1 > len || !bool::from(check_padding_bytes(&decrypted, pad_len)) {
            return Err(bad_record_mac());
        }
        decrypted.truncate(len - pad_len - 1);
        Ok(decrypted)
    }
}

/// Check the last `pad_len + 1` bytes all equal `pad_len`, scanning a
/// fixed window so the work done does not depend on `pad_len`.
fn check_padding_bytes(data: &[u8], pad_len: usize) -> Choice {
    let len = data.len();
    let window = len.min(256);
    let mut ok = Choice::from(1);
    for i in 0..window {
        let b = data[len - 1 - i];
        let in_padding = (i as u64).ct_lt(&(pad_len as u64 + 1));
        ok &= !in_padding | b.ct_eq(&(pad_len as u8));
    }
    // padding longer than the data cannot be valid
    ok & (pad_len as u64).ct_lt(&(len as u64))
}
