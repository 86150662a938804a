//! Sessions and the server-side session cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::{CipherSuite, TlsVersion};
use litetls_crypto::CertificateChain;
use zeroize::Zeroize;

/// Outcome of a completed handshake, reusable for resumption.
///
/// The resumable flag is shared by every clone: clearing it through a
/// connection also clears it for the copy held by a session cache. It can
/// only go from set to cleared.
#[derive(Clone)]
pub struct Session {
    /// Session identifier (empty when the server declined to cache).
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub version: TlsVersion,
    pub master_secret: Vec<u8>,
    /// SRP identity the session was authenticated with.
    pub srp_username: Option<String>,
    /// Certificate chain presented by the peer.
    pub peer_certificates: Option<CertificateChain>,
    /// Certificate chain this endpoint presented.
    pub local_certificates: Option<CertificateChain>,
    /// SNI host name sent by the client.
    pub server_name: Option<String>,
    /// Negotiated ALPN protocol.
    pub alpn_protocol: Option<Vec<u8>>,
    /// Whether the Extended Master Secret extension (RFC 7627) was used.
    pub extended_master_secret: bool,
    /// Whether Encrypt-then-MAC (RFC 7366) was negotiated.
    pub encrypt_then_mac: bool,
    /// Seconds since the UNIX epoch.
    pub created_at: u64,
    resumable: Arc<AtomicBool>,
}

impl Session {
    pub fn new(session_id: Vec<u8>, cipher_suite: CipherSuite, version: TlsVersion) -> Self {
        Self {
            session_id,
            cipher_suite,
            version,
            master_secret: Vec::new(),
            srp_username: None,
            peer_certificates: None,
            local_certificates: None,
            server_name: None,
            alpn_protocol: None,
            extended_master_secret: false,
            encrypt_then_mac: false,
            created_at: now_secs(),
            resumable: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable.load(Ordering::Acquire)
    }

    /// Permanently mark the session (and every clone) non-resumable.
    pub fn clear_resumable(&self) {
        self.resumable.store(false, Ordering::Release);
    }

    /// Whether a client may offer this session.
    pub fn can_resume(&self) -> bool {
        self.is_resumable() && !self.session_id.is_empty() && !self.master_secret.is_empty()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id_len", &self.session_id.len())
            .field("cipher_suite", &self.cipher_suite)
            .field("version", &self.version)
            .field("srp_username", &self.srp_username)
            .field("server_name", &self.server_name)
            .field("alpn_protocol", &self.alpn_protocol)
            .field("extended_master_secret", &self.extended_master_secret)
            .field("encrypt_then_mac", &self.encrypt_then_mac)
            .field("resumable", &self.is_resumable())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Mapping from session id to [`Session`], shared between connections.
///
/// Implementations synchronise internally; lookups carry no ordering
/// guarantee.
pub trait SessionCache: Send + Sync {
    /// Store a session under its id.
    fn put(&self, session: Session);
    /// Retrieve a session.
    fn get(&self, session_id: &[u8]) -> Option<Session>;
    /// Remove a session.
    fn remove(&self, session_id: &[u8]);
}

/// In-memory session cache with a maximum size and optional expiry.
pub struct InMemorySessionCache {
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
    max_size: usize,
    /// Session lifetime in seconds. 0 means no expiry.
    session_lifetime: u64,
}

impl InMemorySessionCache {
    /// Create a cache holding at most `max_size` sessions for two hours each.
    pub fn new(max_size: usize) -> Self {
        Self::with_lifetime(max_size, 7200)
    }

    /// A lifetime of 0 means sessions never expire.
    pub fn with_lifetime(max_size: usize, lifetime_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_size,
            session_lifetime: lifetime_secs,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Session>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, session: &Session) -> bool {
        self.session_lifetime != 0
            && now_secs().saturating_sub(session.created_at) > self.session_lifetime
    }
}

impl Default for InMemorySessionCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SessionCache for InMemorySessionCache {
    fn put(&self, session: Session) {
        if session.session_id.is_empty() || self.max_size == 0 {
            return;
        }
        let mut sessions = self.lock();
        if sessions.len() >= self.max_size && !sessions.contains_key(&session.session_id) {
            // Evict an arbitrary entry.
            if let Some(first_key) = sessions.keys().next().cloned() {
                sessions.remove(&first_key);
            }
        }
        sessions.insert(session.session_id.clone(), session);
    }

    fn get(&self, session_id: &[u8]) -> Option<Session> {
        let mut sessions = self.lock();
        let expired = self.is_expired(sessions.get(session_id)?);
        if expired {
            sessions.remove(session_id);
            return None;
        }
        sessions.get(session_id).cloned()
    }

    fn remove(&self, session_id: &[u8]) {
        self.lock().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u8) -> Session {
        let mut s = Session::new(
            vec![id; 32],
            CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
            TlsVersion::Tls12,
        );
        s.master_secret = vec![id; 48];
        s
    }

    #[test]
    fn test_resumable_flag_shared_between_clones() {
        let s = session(1);
        let copy = s.clone();
        assert!(copy.can_resume());
        s.clear_resumable();
        assert!(!copy.is_resumable());
        assert!(!copy.can_resume());
    }

    #[test]
    fn test_cache_put_get_remove() {
        let cache = InMemorySessionCache::new(4);
        cache.put(session(1));
        assert_eq!(cache.len(), 1);
        let got = cache.get(&[1u8; 32]).unwrap();
        assert_eq!(got.master_secret, vec![1u8; 48]);
        cache.remove(&[1u8; 32]);
        assert!(cache.get(&[1u8; 32]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_shares_flag_with_connection_copy() {
        let cache = InMemorySessionCache::new(4);
        let s = session(2);
        cache.put(s.clone());
        s.clear_resumable();
        assert!(!cache.get(&[2u8; 32]).unwrap().is_resumable());
    }

    #[test]
    fn test_cache_evicts_at_capacity() {
        let cache = InMemorySessionCache::new(2);
        cache.put(session(1));
        cache.put(session(2));
        cache.put(session(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[3u8; 32]).is_some());
    }

    #[test]
    fn test_cache_ignores_empty_id() {
        let cache = InMemorySessionCache::new(2);
        let mut s = session(1);
        s.session_id.clear();
        cache.put(s);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_expiry() {
        let cache = InMemorySessionCache::with_lifetime(4, 10);
        let mut s = session(5);
        s.created_at = now_secs() - 100;
        cache.put(s);
        assert!(cache.get(&[5u8; 32]).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_debug_hides_master_secret() {
        let dbg = format!("{:?}", session(9));
        assert!(!dbg.contains("master_secret"));
        assert!(dbg.contains("resumable: true"));
    }
}
