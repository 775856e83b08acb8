use std::path::Path;

use placecard_core::models::FieldKind;
use placecard_core::photo::content_hash;
use placecard_core::validate::{validate, validate_photo, ValidationRules};

use crate::error::CliError;
use crate::settings::load_engine_config;

pub fn run_check(
    field: &str,
    value_parts: &[String],
    config_path: Option<&Path>,
) -> Result<(), CliError> {
    let config = load_engine_config(config_path)?;
    let line = check_value(field, &value_parts.join(" "), &config.validation)?;
    println!("{line}");
    Ok(())
}

/// Normalize `raw` for `field`. Photos accept a path to an image file.
pub fn check_value(field: &str, raw: &str, rules: &ValidationRules) -> Result<String, CliError> {
    let kind = FieldKind::parse(field).ok_or_else(|| CliError::UnknownField(field.to_string()))?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CliError::EmptyValue);
    }

    if kind == FieldKind::Photos && Path::new(raw).is_file() {
        let bytes = std::fs::read(raw)?;
        let format = validate_photo(&bytes)?;
        return Ok(format!(
            "{} {} ({} bytes)",
            format.content_type(),
            content_hash(&bytes),
            bytes.len()
        ));
    }

    let value = validate(kind, raw, rules)?;
    Ok(format!("{}: {}", kind.label(), value.render()))
}
