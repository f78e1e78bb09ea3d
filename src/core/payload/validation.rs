//! Input checks run on user-supplied values before a command is dispatched.

use std::collections::HashMap;

use regex::Regex;

use crate::core::error::PayloadError;
use crate::core::payload::template::{checksum_key, is_checksum_key, ParameterSpec, ParameterType};

/// Checks a parameter binding against its specs.
///
/// Every non-checksum parameter needs a non-empty value that matches its
/// `required` pattern; `int` parameters must also sit within `[min, max]`.
/// Values for the checksum slot or for unknown keys are rejected.
pub fn validate_binding(
    values: &HashMap<String, String>,
    specs: &HashMap<String, ParameterSpec>,
) -> Result<(), PayloadError> {
    let declared = checksum_key(specs)?;

    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort();
    for key in keys {
        if is_checksum_key(key, declared) {
            return Err(PayloadError::invalid_value(key, "checksum is computed, not supplied"));
        }
        let Some(spec) = specs.get(key) else {
            return Err(PayloadError::invalid_value(key, "unknown parameter"));
        };
        validate_value(spec, &values[key])?;
    }

    let mut missing: Vec<&String> = specs
        .keys()
        .filter(|key| !is_checksum_key(key, declared) && !values.contains_key(*key))
        .collect();
    missing.sort();
    if let Some(key) = missing.first() {
        return Err(PayloadError::invalid_value(key, "value is required"));
    }

    Ok(())
}

/// Checks one value against its spec
pub fn validate_value(spec: &ParameterSpec, value: &str) -> Result<(), PayloadError> {
    if value.is_empty() {
        return Err(PayloadError::invalid_value(&spec.key, "value is required"));
    }

    if let Some(pattern) = spec.required.as_deref() {
        if !matches_pattern(pattern, value) {
            return Err(PayloadError::invalid_value(
                &spec.key,
                format!("does not match required format {}", pattern),
            ));
        }
    }

    if spec.kind == ParameterType::Int {
        check_range(spec, value)?;
    }

    Ok(())
}

/// Whole-value match. A pattern that does not compile matches nothing.
fn matches_pattern(pattern: &str, value: &str) -> bool {
    match Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            log::warn!("Invalid parameter pattern {:?}: {}", pattern, e);
            false
        }
    }
}

fn check_range(spec: &ParameterSpec, value: &str) -> Result<(), PayloadError> {
    let number: i64 = value
        .parse()
        .map_err(|_| PayloadError::invalid_value(&spec.key, format!("not an integer: {}", value)))?;

    if spec.min.is_some_and(|min| number < min) || spec.max.is_some_and(|max| number > max) {
        let bound = |b: Option<i64>| b.map(|v| v.to_string()).unwrap_or_else(|| "..".to_string());
        return Err(PayloadError::invalid_value(
            &spec.key,
            format!("{} is outside [{}, {}]", number, bound(spec.min), bound(spec.max)),
        ));
    }
    Ok(())
}
