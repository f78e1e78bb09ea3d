//! Type-directed formatting of parameter values into hex.

use crate::core::error::PayloadError;
use crate::core::payload::template::ValueTransform;

/// Formats `input` for the given transform. `key` names the parameter in errors.
pub fn transform_value(
    key: &str,
    input: &str,
    transform: ValueTransform,
) -> Result<String, PayloadError> {
    match transform {
        ValueTransform::Equal => Ok(input.to_string()),
        ValueTransform::Int4 => transform_int4(key, input),
        ValueTransform::Ip => transform_ip(key, input),
    }
}

/// Integer as a 4-byte big-endian hex string, e.g. `5013 -> 00001395`
fn transform_int4(key: &str, input: &str) -> Result<String, PayloadError> {
    let value: i32 = input
        .parse()
        .map_err(|_| PayloadError::invalid_value(key, format!("invalid integer: {}", input)))?;
    Ok(format!("{:08X}", value as u32))
}

/// Dotted quad as 4 hex bytes, e.g. `021.042.063.084 -> 152A3F54`
fn transform_ip(key: &str, input: &str) -> Result<String, PayloadError> {
    let invalid = || PayloadError::invalid_value(key, format!("invalid IP address: {}", input));

    let octets: Vec<&str> = input.split('.').collect();
    if octets.len() != 4 {
        return Err(invalid());
    }

    let mut hex = String::with_capacity(8);
    for octet in octets {
        let value: u8 = octet.trim().parse().map_err(|_| invalid())?;
        hex.push_str(&format!("{:02X}", value));
    }
    Ok(hex)
}
