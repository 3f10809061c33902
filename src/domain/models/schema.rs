//! Field schemas declared by business applications, and conversion of raw
//! parameter values into the declared types.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

use super::group::Record;

/// Error converting a raw value into a declared field type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The value could not be interpreted as the declared type
    #[error("Invalid value for field '{field}' of type {field_type}: {value}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Declared type
        field_type: FieldType,
        /// Offending raw value
        value: String,
    },

    /// A required field had no value
    #[error("Required field '{0}' has no value")]
    MissingRequired(String),
}

/// Declared type of a request or result field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 text
    String,
    /// true/false
    Boolean,
    /// Signed 64-bit integer
    Integer,
    /// 64-bit float
    Double,
    /// ISO-8601 date (`YYYY-MM-DD`)
    Date,
    /// Any JSON value, passed through unchanged
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Date => "date",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

impl FieldType {
    /// Convert a raw value into this type.
    ///
    /// Values already of the right JSON shape pass through; strings are parsed.
    /// `Null` is always returned unchanged.
    pub fn convert(self, field: &str, value: &Value) -> Result<Value, ConversionError> {
        let invalid = || ConversionError::InvalidValue {
            field: field.to_string(),
            field_type: self,
            value: value.to_string(),
        };

        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Self::Json => Ok(value.clone()),
            Self::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(invalid()),
            },
            Self::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "y" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "n" | "" => Ok(Value::Bool(false)),
                    _ => Err(invalid()),
                },
                Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|v| v != 0.0))),
                _ => Err(invalid()),
            },
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|v| Value::Number(v.into()))
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            Self::Double => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(invalid),
                _ => Err(invalid()),
            },
            Self::Date => match value {
                Value::String(s) => chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
        }
    }

    /// A representative value used to fill result fields in test mode.
    pub fn test_value(self) -> Value {
        match self {
            Self::String => Value::String("test".to_string()),
            Self::Boolean => Value::Bool(true),
            Self::Integer => Value::Number(1.into()),
            Self::Double => Number::from_f64(1.0).map_or(Value::Null, Value::Number),
            Self::Date => Value::String("2000-01-01".to_string()),
            Self::Json => Value::Object(serde_json::Map::new()),
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Declared type
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: FieldType,
    /// Whether a value must be present
    #[serde(default)]
    pub required: bool,
}

const fn default_field_type() -> FieldType {
    FieldType::String
}

impl FieldSpec {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Mark the field as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Convert every declared field present in `record` in place.
///
/// Undeclared fields are left untouched. Missing required fields are an error
/// only when `check_required` is set; job-level parameters are converted
/// without that check because the per-request record may still supply them.
pub fn convert_record(
    fields: &[FieldSpec],
    record: &mut Record,
    check_required: bool,
) -> Result<(), ConversionError> {
    for field in fields {
        match record.get_mut(&field.name) {
            Some(value) if !value.is_null() => {
                *value = field.field_type.convert(&field.name, value)?;
            }
            _ if check_required && field.required => {
                return Err(ConversionError::MissingRequired(field.name.clone()));
            }
            _ => {}
        }
    }
    Ok(())
}
