//! CheckSum8 Modulo 256 over hex byte strings.

use crate::core::error::PayloadError;

/// Sums the bytes of `hex` modulo 256.
///
/// Whitespace is ignored and a trailing odd nibble is dropped.
pub fn checksum8(hex: &str) -> Result<u8, PayloadError> {
    let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();

    let mut sum: u32 = 0;
    for pair in digits.chunks_exact(2) {
        let byte = std::str::from_utf8(pair)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or_else(|| PayloadError::InvalidPayloadFormat(hex.to_string()))?;
        sum += u32::from(byte);
    }

    Ok((sum % 256) as u8)
}

/// [`checksum8`] rendered as two upper-case hex digits
pub fn checksum(hex: &str) -> Result<String, PayloadError> {
    checksum8(hex).map(|sum| format!("{:02X}", sum))
}
