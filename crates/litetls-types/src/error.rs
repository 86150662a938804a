use crate::alert::{AlertDescription, AlertLevel};

/// Cryptographic operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid argument")]
    InvalidArg,
    #[error("operation not supported")]
    NotSupported,
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid iv length")]
    InvalidIvLength,
    #[error("input not a multiple of the block size")]
    InvalidBlockLength,
    #[error("aead: tag verification failed")]
    AeadTagVerifyFail,
    #[error("rsa: {0}")]
    Rsa(String),
    #[error("rsa: private key not available")]
    RsaNoPrivateKey,
    #[error("ecc: invalid public key")]
    EccInvalidPublicKey,
    #[error("key agreement produced a non-contributory secret")]
    NonContributory,
    #[error("random number generation failed")]
    RandFail,
    #[error("decode: {0}")]
    Decode(String),
}

/// TLS protocol errors.
///
/// Every protocol violation detected locally becomes a `LocalAlert`: the
/// matching fatal alert has been (or is being) sent to the peer and the
/// connection is unusable afterwards.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("{description}: {reason}")]
    LocalAlert {
        description: AlertDescription,
        reason: String,
    },
    #[error("alert received from peer: {level} {description}")]
    RemoteAlert {
        level: AlertLevel,
        description: AlertDescription,
    },
    #[error("connection closed by peer without close_notify")]
    UnexpectedEof,
    #[error("connection closed")]
    Closed,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

impl TlsError {
    /// Shorthand for a locally detected violation.
    pub fn alert(description: AlertDescription, reason: impl Into<String>) -> Self {
        TlsError::LocalAlert {
            description,
            reason: reason.into(),
        }
    }

    /// The alert description carried by this error, if any.
    pub fn alert_description(&self) -> Option<AlertDescription> {
        match self {
            TlsError::LocalAlert { description, .. } | TlsError::RemoteAlert { description, .. } => {
                Some(*description)
            }
            _ => None,
        }
    }

    /// Whether this error was raised by the local endpoint (as opposed to
    /// a peer alert or a transport failure).
    pub fn is_local_alert(&self) -> bool {
        matches!(self, TlsError::LocalAlert { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_alert_display() {
        let err = TlsError::alert(AlertDescription::IllegalParameter, "bad cipher suite");
        assert_eq!(err.to_string(), "illegal_parameter: bad cipher suite");
        assert_eq!(err.alert_description(), Some(AlertDescription::IllegalParameter));
        assert!(err.is_local_alert());
    }

    #[test]
    fn test_remote_alert_display() {
        let err = TlsError::RemoteAlert {
            level: AlertLevel::Fatal,
            description: AlertDescription::HandshakeFailure,
        };
        assert_eq!(
            err.to_string(),
            "alert received from peer: fatal handshake_failure"
        );
        assert!(!err.is_local_alert());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: TlsError = io.into();
        assert!(matches!(err, TlsError::IoError(_)));
        assert_eq!(err.alert_description(), None);
    }
}
