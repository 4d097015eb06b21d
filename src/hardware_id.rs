//! Decoding of the raw unique hardware identifier reported by adapter drivers.
//!
//! Drivers hand out a 16-byte blob. Adapters with a factory serial number store
//! it as ASCII behind an `HW` marker; everything else is a plain GUID.

use uuid::Uuid;

const SERIAL_MARKER: &[u8; 2] = b"HW";

/// Renders a raw hardware identifier as display text.
///
/// `HW`-prefixed blobs yield the serial that follows the marker, up to the
/// first zero byte. A 16-byte blob otherwise renders as a GUID using the
/// driver's mixed-endian layout, and any other length as hyphen-joined hex.
pub fn decode_hardware_id(raw: &[u8]) -> String {
    if let Some(serial) = raw.strip_prefix(SERIAL_MARKER) {
        return serial
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();
    }

    match <[u8; 16]>::try_from(raw) {
        Ok(bytes) => Uuid::from_bytes_le(bytes).hyphenated().to_string(),
        Err(_) => {
            tracing::debug!(len = raw.len(), "hardware id is not a GUID, rendering as hex");
            raw.iter()
                .map(|b| hex::encode([*b]))
                .collect::<Vec<_>>()
                .join("-")
        }
    }
}
