//! Alert protocol messages.
//!
//! Level and description codes live in `litetls-types` so errors can carry
//! them; this module owns the two-byte wire form.

pub use litetls_types::{AlertDescription, AlertLevel};

/// A TLS alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

/// Result of decoding an alert record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecodeError {
    /// Body was not exactly two bytes.
    Length,
    /// Level byte outside {1, 2}.
    Level(u8),
    /// Description code this implementation does not know.
    Description(u8),
}

impl Alert {
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub fn warning(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Warning,
            description,
        }
    }

    pub fn close_notify() -> Self {
        Self::warning(AlertDescription::CloseNotify)
    }

    pub fn encode(&self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }

    pub fn decode(data: &[u8]) -> Result<Self, AlertDecodeError> {
        if data.len() != 2 {
            return Err(AlertDecodeError::Length);
        }
        let level = AlertLevel::from_u8(data[0]).map_err(AlertDecodeError::Level)?;
        let description =
            AlertDescription::from_u8(data[1]).map_err(AlertDecodeError::Description)?;
        Ok(Self { level, description })
    }

    /// Whether receiving this alert ends the connection.
    ///
    /// Fatal alerts and close_notify always do. Warnings whose description
    /// is only defined as fatal are treated the same way.
    pub fn terminates(&self) -> bool {
        self.level == AlertLevel::Fatal
            || self.description == AlertDescription::CloseNotify
            || self.description.is_always_fatal()
    }
}
