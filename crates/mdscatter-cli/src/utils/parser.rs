use mdscatter::core::value::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid --set format: '{0}'. Expected KEY=VALUE.")]
    MissingEquals(String),

    #[error("Parameter name cannot be empty in '{0}'.")]
    EmptyKey(String),
}

/// Parses a command-line value as a TOML value, falling back to a plain string so that
/// paths and bare words need no quoting.
pub fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    toml::from_str::<toml::Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .map(Value::from)
        .unwrap_or_else(|| Value::from(raw))
}

/// Splits `KEY=VALUE` and parses the value with [`parse_value`].
pub fn parse_assignment(pair: &str) -> Result<(String, Value), ParseError> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| ParseError::MissingEquals(pair.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ParseError::EmptyKey(pair.to_string()));
    }
    Ok((key.to_string(), parse_value(value)))
}
