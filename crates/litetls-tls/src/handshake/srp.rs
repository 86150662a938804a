//! SRP key exchange (RFC 5054) with SHA-1.
//!
//! ```text
//! x = SHA1(s | SHA1(I | ":" | P))        v = g^x % N
//! k = SHA1(N | PAD(g))                   u = SHA1(PAD(A) | PAD(B))
//! A = g^a % N                            B = (k*v + g^b) % N
//! client S = (B - k*g^x) ^ (a + u*x) % N
//! server S = (A * v^u) ^ b % N
//! ```
//!
//! The premaster secret is S without leading zero bytes. Only the
//! RFC 5054 groups are accepted from a server.

use std::collections::HashMap;
use std::fmt;

use litetls_crypto::CryptoProvider;
use litetls_types::{AlertDescription, HashAlgId, TlsError};
use num_bigint::BigUint;
use zeroize::Zeroize;

/// Length of the random SRP exponents `a` and `b`.
const SRP_SECRET_LEN: usize = 32;
/// Length of generated salts.
pub const SRP_SALT_LEN: usize = 16;

// RFC 5054 Appendix A, all with generator 2.
const SRP_1024_N: &str = "\
EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C9C256576D674DF74\
96EA81D3383B4813D692C6E0E0D5D8E250B98BE48E495C1D6089DAD15DC7D7B46154D6B6\
CE8EF4AD69B15D4982559B297BCF1885C529F566660E57EC68EDBC3C05726CC02FD4CBF4\
976EAA9AFD5138FE8376435B9FC61D2FC0EB06E3";

const SRP_1536_N: &str = "\
9DEF3CAFB939277AB1F12A8617A47BBBDBA51DF499AC4C80BEEEA9614B19CC4D5F4F5F55\
6E27CBDE51C6A94BE4607A291558903BA0D0F84380B655BB9A22E8DCDF028A7CEC67F0D0\
8134B1C8B97989149B609E0BE3BAB63D47548381DBC5B1FC764E3F4B53DD9DA1158BFD3E\
2B9C8CF56EDF019539349627DB2FD53D24B7C48665772E437D6C7F8CE442734AF7CCB7AE\
837C264AE3A9BEB87F8A2FE9B8B5292E5A021FFF5E91479E8CE7A28C2442C6F315180F93\
499A234DCF76E3FED135F9BB";

const SRP_2048_N: &str = "\
AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC3192943DB56050A37329CB\
B4A099ED8193E0757767A13DD52312AB4B03310DCD7F48A9DA04FD50E8083969EDB767B0\
CF6095179A163AB3661A05FBD5FAAAE82918A9962F0B93B855F97993EC975EEAA80D740A\
DBF4FF747359D041D5C33EA71D281E446B14773BCA97B43A23FB801676BD207A436C6481\
F1D2B9078717461A5B9D32E688F87748544523B524B0D57D5EA77A2775D2ECFA032CFBDB\
F52FB3786160279004E57AE6AF874E7303CE53299CCC041C7BC308D82A5698F3A8D0C382\
71AE35F8E9DBFBB694B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F\
9E4AFF73";

const SRP_GENERATOR: u32 = 2;

/// An SRP group (prime modulus and generator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpGroup {
    pub n: BigUint,
    pub g: BigUint,
}

impl SrpGroup {
    /// The RFC 5054 group of `bits` bits (1024, 1536 or 2048).
    pub fn rfc5054(bits: usize) -> Option<Self> {
        let hex = match bits {
            1024 => SRP_1024_N,
            1536 => SRP_1536_N,
            2048 => SRP_2048_N,
            _ => return None,
        };
        Some(Self {
            n: BigUint::parse_bytes(hex.as_bytes(), 16)?,
            g: BigUint::from(SRP_GENERATOR),
        })
    }

    /// Look up server-supplied parameters in the allow-list.
    pub fn from_params(n: &[u8], g: &[u8]) -> Option<Self> {
        let n = BigUint::from_bytes_be(n);
        let g = BigUint::from_bytes_be(g);
        [1024, 1536, 2048]
            .into_iter()
            .filter_map(Self::rfc5054)
            .find(|group| group.n == n && group.g == g)
    }

    pub fn bits(&self) -> usize {
        self.n.bits() as usize
    }

    fn len(&self) -> usize {
        self.bits().div_ceil(8)
    }

    /// Left-pad `v` to the byte length of N.
    fn pad(&self, v: &BigUint) -> Vec<u8> {
        let bytes = v.to_bytes_be();
        let mut out = vec![0u8; self.len().saturating_sub(bytes.len())];
        out.extend_from_slice(&bytes);
        out
    }

    pub fn n_bytes(&self) -> Vec<u8> {
        self.n.to_bytes_be()
    }

    pub fn g_bytes(&self) -> Vec<u8> {
        self.g.to_bytes_be()
    }
}

fn sha1(provider: &dyn CryptoProvider, parts: &[&[u8]]) -> Result<BigUint, TlsError> {
    let mut ctx = provider.digest(HashAlgId::Sha1)?;
    for p in parts {
        ctx.update(p);
    }
    let mut out = [0u8; 20];
    ctx.finish(&mut out)?;
    Ok(BigUint::from_bytes_be(&out))
}

/// `x = SHA1(s | SHA1(I | ":" | P))`
pub fn compute_x(
    provider: &dyn CryptoProvider,
    salt: &[u8],
    username: &[u8],
    password: &[u8],
) -> Result<BigUint, TlsError> {
    let mut inner_ctx = provider.digest(HashAlgId::Sha1)?;
    inner_ctx.update(username);
    inner_ctx.update(b":");
    inner_ctx.update(password);
    let mut inner = [0u8; 20];
    inner_ctx.finish(&mut inner)?;
    let x = sha1(provider, &[salt, &inner]);
    inner.zeroize();
    x
}

/// `k = SHA1(N | PAD(g))`
pub fn compute_k(provider: &dyn CryptoProvider, group: &SrpGroup) -> Result<BigUint, TlsError> {
    sha1(provider, &[&group.n_bytes(), &group.pad(&group.g)])
}

/// `u = SHA1(PAD(A) | PAD(B))`
pub fn compute_u(
    provider: &dyn CryptoProvider,
    group: &SrpGroup,
    a_pub: &BigUint,
    b_pub: &BigUint,
) -> Result<BigUint, TlsError> {
    sha1(provider, &[&group.pad(a_pub), &group.pad(b_pub)])
}

/// Password verifier `v = g^x % N`.
pub fn compute_verifier(
    provider: &dyn CryptoProvider,
    group: &SrpGroup,
    salt: &[u8],
    username: &[u8],
    password: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let x = compute_x(provider, salt, username, password)?;
    Ok(group.g.modpow(&x, &group.n).to_bytes_be())
}

fn illegal_public_value(which: &str) -> TlsError {
    TlsError::alert(
        AlertDescription::IllegalParameter,
        format!("SRP public value {which} is 0 mod N"),
    )
}

/// Stored credential for one user.
#[derive(Clone)]
pub struct SrpVerifier {
    pub group: SrpGroup,
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
}

impl fmt::Debug for SrpVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpVerifier")
            .field("group_bits", &self.group.bits())
            .field("salt_len", &self.salt.len())
            .finish_non_exhaustive()
    }
}

/// Server-side verifier database keyed by username.
#[derive(Default, Clone)]
pub struct SrpVerifierDb {
    entries: HashMap<String, SrpVerifier>,
}

impl fmt::Debug for SrpVerifierDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpVerifierDb")
            .field("users", &self.entries.len())
            .finish()
    }
}

impl SrpVerifierDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: impl Into<String>, verifier: SrpVerifier) {
        self.entries.insert(username.into(), verifier);
    }

    /// Derive and store a verifier for `username` with a fresh salt in the
    /// `group_bits` RFC 5054 group.
    pub fn add_user(
        &mut self,
        provider: &dyn CryptoProvider,
        username: &str,
        password: &[u8],
        group_bits: usize,
    ) -> Result<(), TlsError> {
        let group = SrpGroup::rfc5054(group_bits).ok_or_else(|| {
            TlsError::InvalidConfig(format!("no RFC 5054 SRP group of {group_bits} bits"))
        })?;
        let salt = provider.random_vec(SRP_SALT_LEN)?;
        let verifier = compute_verifier(provider, &group, &salt, username.as_bytes(), password)?;
        self.insert(
            username,
            SrpVerifier {
                group,
                salt,
                verifier,
            },
        );
        Ok(())
    }

    pub fn get(&self, username: &str) -> Option<&SrpVerifier> {
        self.entries.get(username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Server half of an SRP exchange.
pub struct SrpServer {
    group: SrpGroup,
    v: BigUint,
    b: BigUint,
    b_pub: BigUint,
}

impl SrpServer {
    pub fn new(provider: &dyn CryptoProvider, verifier: &SrpVerifier) -> Result<Self, TlsError> {
        let mut secret = provider.random_vec(SRP_SECRET_LEN)?;
        let server = Self::with_secret(provider, verifier, &secret);
        secret.zeroize();
        server
    }

    fn with_secret(
        provider: &dyn CryptoProvider,
        verifier: &SrpVerifier,
        secret: &[u8],
    ) -> Result<Self, TlsError> {
        let group = verifier.group.clone();
        let v = BigUint::from_bytes_be(&verifier.verifier);
        let b = BigUint::from_bytes_be(secret);
        let k = compute_k(provider, &group)?;
        let b_pub = (&k * &v + group.g.modpow(&b, &group.n)) % &group.n;
        Ok(Self { group, v, b, b_pub })
    }

    /// `B`, as sent in ServerKeyExchange.
    pub fn public_value(&self) -> Vec<u8> {
        self.b_pub.to_bytes_be()
    }

    /// Premaster secret from the client's `A`.
    pub fn premaster(
        &self,
        provider: &dyn CryptoProvider,
        client_public: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let n = &self.group.n;
        let a_pub = BigUint::from_bytes_be(client_public);
        if (&a_pub % n) == BigUint::from(0u8) {
            return Err(illegal_public_value("A"));
        }
        let u = compute_u(provider, &self.group, &a_pub, &self.b_pub)?;
        let base = (&a_pub * self.v.modpow(&u, n)) % n;
        Ok(base.modpow(&self.b, n).to_bytes_be())
    }
}

/// Client half: returns `(A, premaster)`.
pub fn client_premaster(
    provider: &dyn CryptoProvider,
    group: &SrpGroup,
    salt: &[u8],
    server_public: &[u8],
    username: &[u8],
    password: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let mut secret = provider.random_vec(SRP_SECRET_LEN)?;
    let out = client_premaster_with_secret(
        provider,
        group,
        salt,
        server_public,
        username,
        password,
        &secret,
    );
    secret.zeroize();
    out
}

fn client_premaster_with_secret(
    provider: &dyn CryptoProvider,
    group: &SrpGroup,
    salt: &[u8],
    server_public: &[u8],
    username: &[u8],
    password: &[u8],
    secret: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
    let n = &group.n;
    let b_pub = BigUint::from_bytes_be(server_public);
    if (&b_pub % n) == BigUint::from(0u8) {
        return Err(illegal_public_value("B"));
    }
    let a = BigUint::from_bytes_be(secret);
    let a_pub = group.g.modpow(&a, n);
    let u = compute_u(provider, group, &a_pub, &b_pub)?;
    let x = compute_x(provider, salt, username, password)?;
    let k = compute_k(provider, group)?;
    let kgx = (&k * group.g.modpow(&x, n)) % n;
    let base = ((&b_pub % n) + n - kgx) % n;
    let exponent = &a + &u * &x;
    let premaster = base.modpow(&exponent, n).to_bytes_be();
    Ok((a_pub.to_bytes_be(), premaster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use litetls_crypto::RustCryptoProvider;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn big(s: &str) -> BigUint {
        BigUint::parse_bytes(s.as_bytes(), 16).unwrap()
    }

    // RFC 5054 Appendix B
    const SALT: &str = "BEB25379D1A8581EB5A727673A2441EE";
    const A_SECRET: &str = "60975527035CF2AD1989806F0407210BC81EDC04E2762A56AFD529DDDA2D4393";
    const B_SECRET: &str = "E487CB59D31AC550471E81F00F6928E01DDA08E974A004F49E61F5D105284D20";
    const PREMASTER: &str = "B0DC82BABCF30674AE450C0287745E7990A3381F63B387AAF271A10D233861E3\
59B48220F7C4693C9AE12B0A6F67809F0876E2D013800D6C41BB59B6D5979B5C00A172B4A2A5903A0BDCAF8A70958\
5EB2AFAFA8F3499B200210DCC1F10EB33943CD67FC88A2F39A4BE5BEC4EC0A3212DC346D7E474B29EDE8A469FFECA\
686E5A";

    #[test]
    fn test_group_sizes() {
        for bits in [1024, 1536, 2048] {
            let g = SrpGroup::rfc5054(bits).unwrap();
            assert_eq!(g.bits(), bits);
            assert_eq!(g.g, BigUint::from(2u8));
            assert_eq!(SrpGroup::from_params(&g.n_bytes(), &g.g_bytes()), Some(g));
        }
        assert!(SrpGroup::rfc5054(512).is_none());
    }

    #[test]
    fn test_from_params_rejects_unknown() {
        let g = SrpGroup::rfc5054(1024).unwrap();
        let mut n = g.n_bytes();
        n[10] ^= 1;
        assert!(SrpGroup::from_params(&n, &g.g_bytes()).is_none());
        assert!(SrpGroup::from_params(&g.n_bytes(), &[5]).is_none());
    }

    #[test]
    fn test_rfc5054_vectors() {
        let p = RustCryptoProvider::new();
        let group = SrpGroup::rfc5054(1024).unwrap();
        let salt = hex(SALT);
        assert_eq!(
            compute_k(&p, &group).unwrap(),
            big("7556AA045AEF2CDD07ABAF0F665C3E818913186F")
        );
        assert_eq!(
            compute_x(&p, &salt, b"alice", b"password123").unwrap(),
            big("94B7555AABE9127CC58CCF4993DB6CF84D16C124")
        );
        let v = compute_verifier(&p, &group, &salt, b"alice", b"password123").unwrap();
        assert_eq!(
            BigUint::from_bytes_be(&v),
            big("7E273DE8696FFC4F4E337D05B4B375BEB0DDE1569E8FA00A9886D8129BADA1F1\
822223CA1A605B530E379BA4729FDC59F105B4787E5186F5C671085A1447B52A48CF1970B4FB6F8400BBF4CEBF\
BB168152E08AB5EA53D15C1AFF87B2B9DA6E04E058AD51CC72BFC9033B564E26480D78E955A5E29E7AB245DB2BE\
315E2099AFB")
        );

        let verifier = SrpVerifier {
            group: group.clone(),
            salt: salt.clone(),
            verifier: v,
        };
        let server = SrpServer::with_secret(&p, &verifier, &hex(B_SECRET)).unwrap();
        let (a_pub, client_pms) = client_premaster_with_secret(
            &p,
            &group,
            &salt,
            &server.public_value(),
            b"alice",
            b"password123",
            &hex(A_SECRET),
        )
        .unwrap();
        let server_pms = server.premaster(&p, &a_pub).unwrap();
        assert_eq!(client_pms, server_pms);
        assert_eq!(BigUint::from_bytes_be(&client_pms), big(PREMASTER));
    }

    #[test]
    fn test_random_exchange_agrees() {
        let p = RustCryptoProvider::new();
        let mut db = SrpVerifierDb::new();
        db.add_user(&p, "bob", b"hunter2", 2048).unwrap();
        assert_eq!(db.len(), 1);
        let entry = db.get("bob").unwrap();
        assert_eq!(entry.salt.len(), SRP_SALT_LEN);
        let server = SrpServer::new(&p, entry).unwrap();
        let (a_pub, client_pms) = client_premaster(
            &p,
            &entry.group,
            &entry.salt,
            &server.public_value(),
            b"bob",
            b"hunter2",
        )
        .unwrap();
        assert_eq!(server.premaster(&p, &a_pub).unwrap(), client_pms);
        assert!(db.get("mallory").is_none());
    }

    #[test]
    fn test_wrong_password_disagrees() {
        let p = RustCryptoProvider::new();
        let mut db = SrpVerifierDb::new();
        db.add_user(&p, "bob", b"right", 1024).unwrap();
        let entry = db.get("bob").unwrap();
        let server = SrpServer::new(&p, entry).unwrap();
        let (a_pub, client_pms) = client_premaster(
            &p,
            &entry.group,
            &entry.salt,
            &server.public_value(),
            b"bob",
            b"wrong",
        )
        .unwrap();
        assert_ne!(server.premaster(&p, &a_pub).unwrap(), client_pms);
    }

    #[test]
    fn test_zero_mod_n_rejected() {
        let p = RustCryptoProvider::new();
        let group = SrpGroup::rfc5054(1024).unwrap();
        let n = group.n_bytes();
        let err = client_premaster(&p, &group, b"salt", &n, b"u", b"p").unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::IllegalParameter));
        let err = client_premaster(&p, &group, b"salt", &[0], b"u", b"p").unwrap_err();
        assert_eq!(err.alert_description(), Some(AlertDescription::IllegalParameter));

        let verifier = SrpVerifier {
            group: group.clone(),
            salt: b"salt".to_vec(),
            verifier: vec![7],
        };
        let server = SrpServer::new(&p, &verifier).unwrap();
        let two_n = (&group.n * 2u8).to_bytes_be();
        assert!(server.premaster(&p, &two_n).is_err());
    }

    #[test]
    fn test_unknown_group_size_rejected_by_db() {
        let p = RustCryptoProvider::new();
        let mut db = SrpVerifierDb::new();
        assert!(matches!(
            db.add_user(&p, "x", b"y", 768),
            Err(TlsError::InvalidConfig(_))
        ));
        assert!(db.is_empty());
    }
}
