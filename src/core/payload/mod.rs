//! Payload templating engine: parameter formatting, placeholder substitution
//! and the CheckSum8 slot.

mod checksum;
mod template;
mod transform;
mod validation;

pub use checksum::{checksum, checksum8};
pub use template::{
    build_payload, CommandTemplate, ParameterSpec, ParameterType, ValueTransform,
    FALLBACK_CHECKSUM_KEY,
};
pub use transform::transform_value;
pub use validation::{validate_binding, validate_value};
