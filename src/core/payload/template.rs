//! Command templates and payload building
//! A template is a hex string with `{KEY}` placeholders. Parameters are
//! substituted after formatting and the checksum slot is filled last.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::core::error::PayloadError;
use crate::core::payload::checksum::checksum;
use crate::core::payload::transform::transform_value;

/// Placeholder name used for the checksum when no parameter declares it
pub const FALLBACK_CHECKSUM_KEY: &str = "CHK";

/// What kind of input a parameter takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterType {
    #[default]
    Equal,
    Int,
    Int4,
    Ip,
    Checksum,
}

impl ParameterType {
    /// Case-insensitive; unknown names fall back to `Equal`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" => Self::Int,
            "int4" => Self::Int4,
            "ip" => Self::Ip,
            "checksum" => Self::Checksum,
            _ => Self::Equal,
        }
    }
}

/// How a parameter value is formatted before substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueTransform {
    #[default]
    Equal,
    Int4,
    Ip,
}

impl ValueTransform {
    /// Case-insensitive; unknown names fall back to `Equal`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "int4" => Self::Int4,
            "ip" => Self::Ip,
            _ => Self::Equal,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawParameter {
    label: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    value: Option<String>,
    required: Option<String>,
    min: Option<i64>,
    max: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterSpec {
    pub key: String,
    pub label: String,
    pub kind: ParameterType,
    pub value_transform: ValueTransform,
    /// Regex the whole value must match; `None` accepts anything non-empty
    pub required: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl ParameterSpec {
    pub fn new(key: &str, kind: ParameterType, value_transform: ValueTransform) -> Self {
        Self {
            key: key.to_string(),
            label: key.to_string(),
            kind,
            value_transform,
            ..Default::default()
        }
    }

    fn from_raw(key: &str, raw: RawParameter) -> Self {
        Self {
            key: key.to_string(),
            label: raw
                .label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| key.to_string()),
            kind: raw.kind.as_deref().map(ParameterType::parse).unwrap_or_default(),
            value_transform: raw.value.as_deref().map(ValueTransform::parse).unwrap_or_default(),
            required: raw.required.filter(|r| !r.is_empty()),
            min: raw.min,
            max: raw.max,
        }
    }

    pub fn is_checksum(&self) -> bool {
        self.kind == ParameterType::Checksum
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCommand {
    label: String,
    payload: String,
    parameters: HashMap<String, RawParameter>,
}

/// A command as served in the permission JSON
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "RawCommand")]
pub struct CommandTemplate {
    pub label: String,
    pub payload: String,
    pub parameters: HashMap<String, ParameterSpec>,
}

impl From<RawCommand> for CommandTemplate {
    fn from(raw: RawCommand) -> Self {
        let parameters = raw
            .parameters
            .into_iter()
            .map(|(key, param)| {
                let spec = ParameterSpec::from_raw(&key, param);
                (key, spec)
            })
            .collect();
        Self {
            label: raw.label,
            payload: raw.payload,
            parameters,
        }
    }
}

impl CommandTemplate {
    pub fn from_json(json: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(json).map_err(|e| PayloadError::InvalidPayload(e.to_string()))
    }

    /// Builds the wire payload from this template's parameter specs
    pub fn build(&self, values: &HashMap<String, String>) -> Result<String, PayloadError> {
        build_payload(&self.payload, values, &self.parameters)
    }

    /// Parameters the caller has to supply, sorted by key
    pub fn input_parameters(&self) -> Vec<&ParameterSpec> {
        let checksum_key = checksum_key(&self.parameters).ok().flatten();
        let mut inputs: Vec<&ParameterSpec> = self
            .parameters
            .values()
            .filter(|spec| !is_checksum_key(&spec.key, checksum_key))
            .collect();
        inputs.sort_by(|a, b| a.key.cmp(&b.key));
        inputs
    }
}

/// The declared checksum parameter, if any. More than one is an error.
pub(crate) fn checksum_key(
    specs: &HashMap<String, ParameterSpec>,
) -> Result<Option<&str>, PayloadError> {
    let mut declared = specs.values().filter(|spec| spec.is_checksum());
    let first = declared.next();
    if let Some(second) = declared.next() {
        return Err(PayloadError::InvalidPayload(format!(
            "more than one checksum parameter ({}, {})",
            first.map(|s| s.key.as_str()).unwrap_or_default(),
            second.key
        )));
    }
    Ok(first.map(|spec| spec.key.as_str()))
}

/// True for the declared checksum key and for the `CHK` fallback in any case
pub(crate) fn is_checksum_key(key: &str, declared: Option<&str>) -> bool {
    declared == Some(key) || key.eq_ignore_ascii_case(FALLBACK_CHECKSUM_KEY)
}

/// Substitutes `values` into `template` and fills the checksum slot.
///
/// Placeholders without a value are left in place. The checksum covers the
/// substituted text before its slot only.
pub fn build_payload(
    template: &str,
    values: &HashMap<String, String>,
    specs: &HashMap<String, ParameterSpec>,
) -> Result<String, PayloadError> {
    if template.is_empty() {
        return Err(PayloadError::InvalidPayload("template is empty".to_string()));
    }

    let declared = checksum_key(specs)?;
    let mut result = template.to_string();

    let ordered: BTreeMap<&String, &String> = values.iter().collect();
    for (key, value) in ordered {
        if is_checksum_key(key, declared) {
            debug!("Ignoring supplied value for checksum slot {}", key);
            continue;
        }
        let transform = specs
            .get(key)
            .map(|spec| spec.value_transform)
            .unwrap_or_default();
        let formatted = transform_value(key, value, transform)?;
        result = result.replace(&format!("{{{}}}", key), &formatted);
    }

    let Some((start, end)) = find_checksum_slot(&result, declared) else {
        return Ok(result);
    };

    let sum = checksum(&result[..start])?;
    result.replace_range(start..end, &sum);
    Ok(result)
}

/// Byte range of the checksum placeholder: the declared one first, then `{CHK}`
fn find_checksum_slot(payload: &str, declared: Option<&str>) -> Option<(usize, usize)> {
    if let Some(key) = declared {
        let placeholder = format!("{{{}}}", key);
        if let Some(start) = payload.find(&placeholder) {
            return Some((start, start + placeholder.len()));
        }
    }

    static FALLBACK: OnceLock<Regex> = OnceLock::new();
    let re = FALLBACK.get_or_init(|| Regex::new(r"(?i)\{CHK\}").unwrap());
    re.find(payload).map(|m| (m.start(), m.end()))
}
