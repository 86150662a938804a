//! Premaster secret agreement for the RSA, finite-field DHE and ECDHE
//! families.

use std::sync::Arc;

use crate::crypt::NamedGroup;
use litetls_crypto::{AsymmetricKey, CryptoProvider, KeyAgreement};
use litetls_types::{AlertDescription, TlsError};
use num_bigint::BigUint;
use subtle::{ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroize;

/// Length of an RSA-transported premaster secret.
pub const RSA_PREMASTER_LEN: usize = 48;

/// Private exponent length for finite-field DH.
const DH_SECRET_LEN: usize = 32;

// RFC 7919 Appendix A.1, generator 2.
const FFDHE2048_P: &str = "\
FFFFFFFFFFFFFFFFADF85458A2BB4A9AAFDC5620273D3CF1D8B9C583CE2D3695A9E13641\
146433FBCC939DCE249B3EF97D2FE363630C75D8F681B202AEC4617AD3DF1ED5D5FD6561\
2433F51F5F066ED0856365553DED1AF3B557135E7F57C935984F0C70E0E68B77E2A689DA\
F3EFE8721DF158A136ADE73530ACCA4F483A797ABC0AB182B324FB61D108A94BB2C8E3FB\
B96ADAB760D7F4681D4F42A3DE394DF4AE56EDE76372BB190B07A7C8EE0A6D709E02FCE1\
CDF7E2ECC03404CD28342F619172FE9CE98583FF8E4F1232EEF28183C3FE3B1B4C6FAD73\
3BB5FCBC2EC22005C58EF1837D1683B2C6F34A26C1B2EFFA886B423861285C97FFFFFFFF\
FFFFFFFF";

/// Finite-field DH group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    pub p: BigUint,
    pub g: BigUint,
}

impl DhGroup {
    pub fn ffdhe2048() -> Self {
        Self {
            p: BigUint::parse_bytes(FFDHE2048_P.as_bytes(), 16).unwrap_or_default(),
            g: BigUint::from(2u8),
        }
    }

    /// The group for a configured named group.
    pub fn named(group: NamedGroup) -> Result<Self, TlsError> {
        if group == NamedGroup::FFDHE2048 {
            Ok(Self::ffdhe2048())
        } else {
            Err(TlsError::InvalidConfig(format!(
                "unsupported finite-field group 0x{:04x}",
                group.0
            )))
        }
    }

    /// Group parameters received in a ServerKeyExchange.
    ///
    /// The prime must be odd and the generator must lie in `(1, p - 1)`.
    pub fn from_params(p: &[u8], g: &[u8]) -> Result<Self, TlsError> {
        let p = BigUint::from_bytes_be(p);
        let g = BigUint::from_bytes_be(g);
        let one = BigUint::from(1u8);
        if p.bits() < 2 || !p.bit(0) || g <= one || g >= &p - &one {
            return Err(TlsError::alert(
                AlertDescription::IllegalParameter,
                "malformed DH group parameters",
            ));
        }
        Ok(Self { p, g })
    }

    pub fn bits(&self) -> usize {
        self.p.bits() as usize
    }

    pub fn p_bytes(&self) -> Vec<u8> {
        self.p.to_bytes_be()
    }

    pub fn g_bytes(&self) -> Vec<u8> {
        self.g.to_bytes_be()
    }

    /// Reject public values outside `(1, p - 1)`.
    fn check_public(&self, y: &BigUint) -> Result<(), TlsError> {
        let one = BigUint::from(1u8);
        if *y <= one || *y >= &self.p - &one {
            return Err(TlsError::alert(
                AlertDescription::IllegalParameter,
                "DH public value out of range",
            ));
        }
        Ok(())
    }
}

/// An ephemeral finite-field DH key pair.
pub struct DhKeyPair {
    group: DhGroup,
    x: BigUint,
    public: Vec<u8>,
}

impl DhKeyPair {
    pub fn generate(provider: &dyn CryptoProvider, group: DhGroup) -> Result<Self, TlsError> {
        let mut secret = provider.random_vec(DH_SECRET_LEN)?;
        let x = BigUint::from_bytes_be(&secret);
        secret.zeroize();
        let public = group.g.modpow(&x, &group.p).to_bytes_be();
        Ok(Self { group, x, public })
    }

    pub fn group(&self) -> &DhGroup {
        &self.group
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// `Z = Y^x mod p` with leading zero bytes stripped.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        let y = BigUint::from_bytes_be(peer_public);
        self.group.check_public(&y)?;
        Ok(y.modpow(&self.x, &self.group.p).to_bytes_be())
    }
}

/// Ephemeral key of the server (or client) for one handshake.
pub enum EphemeralKey {
    Dh(DhKeyPair),
    Ecdh {
        group: NamedGroup,
        pair: Box<dyn KeyAgreement>,
    },
}

impl EphemeralKey {
    pub fn generate_ecdh(
        provider: &dyn CryptoProvider,
        group: NamedGroup,
    ) -> Result<Self, TlsError> {
        let curve = group.curve().ok_or_else(|| {
            TlsError::alert(
                AlertDescription::IllegalParameter,
                format!("unsupported curve 0x{:04x}", group.0),
            )
        })?;
        Ok(EphemeralKey::Ecdh {
            group,
            pair: provider.generate_key_agreement(curve)?,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        match self {
            EphemeralKey::Dh(pair) => pair.public_key(),
            EphemeralKey::Ecdh { pair, .. } => pair.public_key(),
        }
    }

    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        match self {
            EphemeralKey::Dh(pair) => pair.compute_shared_secret(peer_public),
            EphemeralKey::Ecdh { pair, .. } => pair.compute_shared_secret(peer_public).map_err(|e| {
                TlsError::alert(
                    AlertDescription::IllegalParameter,
                    format!("bad ECDH public value: {e}"),
                )
            }),
        }
    }
}

/// Fresh RSA premaster: `client_version || random[46]`.
pub fn rsa_premaster(
    provider: &dyn CryptoProvider,
    client_version: u16,
) -> Result<Vec<u8>, TlsError> {
    let mut pms = provider.random_vec(RSA_PREMASTER_LEN)?;
    pms[..2].copy_from_slice(&client_version.to_be_bytes());
    Ok(pms)
}

/// Server side of RSA key transport.
///
/// Decryption failures, a wrong length and a version mismatch all yield a
/// random premaster chosen without a data-dependent branch, so the
/// handshake fails later at Finished (RFC 5246 §7.4.7.1).
pub fn rsa_decrypt_premaster(
    provider: &dyn CryptoProvider,
    key: &Arc<dyn AsymmetricKey>,
    encrypted: &[u8],
    client_version: u16,
) -> Result<Vec<u8>, TlsError> {
    let mut substitute = provider.random_vec(RSA_PREMASTER_LEN)?;
    let mut decrypted = key.decrypt(encrypted).ok().flatten().unwrap_or_default();

    let len_ok = (decrypted.len() as u64).ct_eq(&(RSA_PREMASTER_LEN as u64));
    decrypted.resize(RSA_PREMASTER_LEN, 0);
    let version = client_version.to_be_bytes();
    let version_ok = decrypted[0].ct_eq(&version[0]) & decrypted[1].ct_eq(&version[1]);
    let accept = len_ok & version_ok;

    let pms = decrypted
        .iter()
        .zip(substitute.iter())
        .map(|(d, s)| u8::conditional_select(s, d, accept))
        .collect();
    decrypted.zeroize();
    substitute.zeroize();
    Ok(pms)
}
