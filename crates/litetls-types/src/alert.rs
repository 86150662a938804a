//! Alert levels and descriptions (RFC 5246 §7.2, RFC 6101 §5.4.2).

use std::fmt;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    /// Deprecated in TLS 1.1; never sent, still recognised.
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    /// SSL 3.0 only: the client has no certificate to send.
    NoCertificate = 41,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ExportRestriction = 60,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    UnknownPskIdentity = 115,
    NoApplicationProtocol = 120,
}

impl AlertLevel {
    /// Convert from u8 to AlertLevel.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

impl AlertDescription {
    /// Convert from u8 to AlertDescription.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(AlertDescription::CloseNotify),
            10 => Ok(AlertDescription::UnexpectedMessage),
            20 => Ok(AlertDescription::BadRecordMac),
            21 => Ok(AlertDescription::DecryptionFailed),
            22 => Ok(AlertDescription::RecordOverflow),
            30 => Ok(AlertDescription::DecompressionFailure),
            40 => Ok(AlertDescription::HandshakeFailure),
            41 => Ok(AlertDescription::NoCertificate),
            42 => Ok(AlertDescription::BadCertificate),
            43 => Ok(AlertDescription::UnsupportedCertificate),
            44 => Ok(AlertDescription::CertificateRevoked),
            45 => Ok(AlertDescription::CertificateExpired),
            46 => Ok(AlertDescription::CertificateUnknown),
            47 => Ok(AlertDescription::IllegalParameter),
            48 => Ok(AlertDescription::UnknownCa),
            49 => Ok(AlertDescription::AccessDenied),
            50 => Ok(AlertDescription::DecodeError),
            51 => Ok(AlertDescription::DecryptError),
            60 => Ok(AlertDescription::ExportRestriction),
            70 => Ok(AlertDescription::ProtocolVersion),
            71 => Ok(AlertDescription::InsufficientSecurity),
            80 => Ok(AlertDescription::InternalError),
            86 => Ok(AlertDescription::InappropriateFallback),
            90 => Ok(AlertDescription::UserCanceled),
            100 => Ok(AlertDescription::NoRenegotiation),
            110 => Ok(AlertDescription::UnsupportedExtension),
            112 => Ok(AlertDescription::UnrecognizedName),
            115 => Ok(AlertDescription::UnknownPskIdentity),
            120 => Ok(AlertDescription::NoApplicationProtocol),
            _ => Err(v),
        }
    }

    /// Descriptions that RFC 5246 only ever defines at fatal level.
    ///
    /// A peer that sends one of these as a warning is not speaking a
    /// coherent protocol, so the connection is ended anyway.
    pub fn is_always_fatal(self) -> bool {
        matches!(
            self,
            AlertDescription::UnexpectedMessage
                | AlertDescription::BadRecordMac
                | AlertDescription::DecryptionFailed
                | AlertDescription::RecordOverflow
                | AlertDescription::DecompressionFailure
                | AlertDescription::HandshakeFailure
                | AlertDescription::IllegalParameter
                | AlertDescription::UnknownCa
                | AlertDescription::AccessDenied
                | AlertDescription::DecodeError
                | AlertDescription::ExportRestriction
                | AlertDescription::ProtocolVersion
                | AlertDescription::InsufficientSecurity
                | AlertDescription::InternalError
                | AlertDescription::InappropriateFallback
                | AlertDescription::UnknownPskIdentity
                | AlertDescription::NoApplicationProtocol
        )
    }

    /// RFC name of the description (`bad_record_mac`, ...).
    pub fn name(self) -> &'static str {
        match self {
            AlertDescription::CloseNotify => "close_notify",
            AlertDescription::UnexpectedMessage => "unexpected_message",
            AlertDescription::BadRecordMac => "bad_record_mac",
            AlertDescription::DecryptionFailed => "decryption_failed",
            AlertDescription::RecordOverflow => "record_overflow",
            AlertDescription::DecompressionFailure => "decompression_failure",
            AlertDescription::HandshakeFailure => "handshake_failure",
            AlertDescription::NoCertificate => "no_certificate",
            AlertDescription::BadCertificate => "bad_certificate",
            AlertDescription::UnsupportedCertificate => "unsupported_certificate",
            AlertDescription::CertificateRevoked => "certificate_revoked",
            AlertDescription::CertificateExpired => "certificate_expired",
            AlertDescription::CertificateUnknown => "certificate_unknown",
            AlertDescription::IllegalParameter => "illegal_parameter",
            AlertDescription::UnknownCa => "unknown_ca",
            AlertDescription::AccessDenied => "access_denied",
            AlertDescription::DecodeError => "decode_error",
            AlertDescription::DecryptError => "decrypt_error",
            AlertDescription::ExportRestriction => "export_restriction",
            AlertDescription::ProtocolVersion => "protocol_version",
            AlertDescription::InsufficientSecurity => "insufficient_security",
            AlertDescription::InternalError => "internal_error",
            AlertDescription::InappropriateFallback => "inappropriate_fallback",
            AlertDescription::UserCanceled => "user_canceled",
            AlertDescription::NoRenegotiation => "no_renegotiation",
            AlertDescription::UnsupportedExtension => "unsupported_extension",
            AlertDescription::UnrecognizedName => "unrecognized_name",
            AlertDescription::UnknownPskIdentity => "unknown_psk_identity",
            AlertDescription::NoApplicationProtocol => "no_application_protocol",
        }
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Warning => f.write_str("warning"),
            AlertLevel::Fatal => f.write_str("fatal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_values() {
        assert_eq!(AlertLevel::Warning as u8, 1);
        assert_eq!(AlertLevel::Fatal as u8, 2);
        assert_eq!(AlertLevel::from_u8(3), Err(3));
    }

    #[test]
    fn test_alert_description_round_trip() {
        for v in 0..=255u8 {
            if let Ok(desc) = AlertDescription::from_u8(v) {
                assert_eq!(desc as u8, v);
            }
        }
        assert_eq!(AlertDescription::from_u8(86), Ok(AlertDescription::InappropriateFallback));
        assert_eq!(AlertDescription::from_u8(200), Err(200));
    }

    #[test]
    fn test_alert_always_fatal() {
        assert!(AlertDescription::BadRecordMac.is_always_fatal());
        assert!(!AlertDescription::CloseNotify.is_always_fatal());
        assert!(!AlertDescription::NoRenegotiation.is_always_fatal());
        assert!(!AlertDescription::UserCanceled.is_always_fatal());
    }

    #[test]
    fn test_alert_names() {
        assert_eq!(AlertDescription::BadRecordMac.to_string(), "bad_record_mac");
        assert_eq!(AlertLevel::Fatal.to_string(), "fatal");
    }
}
