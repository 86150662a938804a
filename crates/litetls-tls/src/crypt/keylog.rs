//! NSS Key Log Format support (SSLKEYLOGFILE).
//!
//! Wireshark-compatible lines: `CLIENT_RANDOM <client_random_hex> <master_secret_hex>`.

use crate::config::HandshakeSettings;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Format a key log line.
pub fn format_line(label: &str, client_random: &[u8; 32], secret: &[u8]) -> String {
    format!("{} {} {}", label, to_hex(client_random), to_hex(secret))
}

/// Hand the master secret to the configured key-log callback, if any.
pub fn log_master_secret(
    settings: &HandshakeSettings,
    client_random: &[u8; 32],
    master_secret: &[u8],
) {
    if let Some(cb) = &settings.key_log {
        cb(&format_line("CLIENT_RANDOM", client_random, master_secret));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x01, 0xab, 0xff]), "01abff");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_no_callback_is_noop() {
        let settings = HandshakeSettings::default();
        log_master_secret(&settings, &[0u8; 32], &[1, 2, 3]);
    }

    #[test]
    fn test_log_master_secret() {
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let settings = HandshakeSettings::builder()
            .key_log(Arc::new(move |line: &str| {
                sink.lock().unwrap().push(line.to_string());
            }))
            .build();

        log_master_secret(&settings, &[0x42u8; 32], &[0xAB, 0xCD]);

        let logged = lines.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0], format!("CLIENT_RANDOM {} abcd", "42".repeat(32)));
    }
}
