//! Blake3 helpers for idempotence markers

/// Idempotence marker for a scraped record: full blake3 hex of the raw request key.
pub fn record_marker(key: &[u8]) -> String {
    blake3::hash(key).to_hex().to_string()
}

/// Return the first 8 hex characters of a marker.
pub fn short_hash(marker: &str) -> &str {
    &marker[..marker.len().min(8)]
}
