//! Utility functions for quire

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encoding set for cursor components (includes the cursor field
/// separator, %, and control chars)
const CURSOR_ENCODE_SET: &AsciiSet = &CONTROLS.add(b',').add(b'%').add(b' ');

/// Encode one cursor component
pub fn encode_component(part: &str) -> String {
    utf8_percent_encode(part, CURSOR_ENCODE_SET).to_string()
}

/// Decode a percent-encoded cursor component
pub fn decode_component(encoded: &str) -> crate::Result<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|s| s.to_string())
        .map_err(|e| crate::Error::InvalidQuery(format!("bad cursor component: {}", e)))
}

/// Install a formatted `tracing` subscriber honoring `RUST_LOG`, falling
/// back to `info`. Call once from the embedding application; a second call
/// is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_component() {
        let part = "a,b%c d";
        let encoded = encode_component(part);
        assert!(!encoded.contains(','));
        assert_eq!(decode_component(&encoded).unwrap(), part);
    }

    #[test]
    fn test_timestamps_monotonic_enough() {
        let a = timestamp_now_millis();
        let b = timestamp_now_millis();
        assert!(b >= a);
    }
}
