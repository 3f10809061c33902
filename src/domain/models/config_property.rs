//! Module configuration properties stored by the coordinator.
//!
//! The coordinator answers a `moduleConfigLoad` with property rows, each
//! holding the value as text and an XML-schema style type name such as
//! `xs:int`. Rows are converted into a [`Record`] of typed JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::group::Record;
use super::schema::FieldType;

/// Component name of the properties shared by a whole module.
pub const GLOBAL_COMPONENT: &str = "GLOBAL";

/// One property row as the coordinator sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPropertyRecord {
    /// Property name
    #[serde(rename = "PROPERTY_NAME", default)]
    pub name: String,
    /// Value as text
    #[serde(rename = "PROPERTY_VALUE", default)]
    pub value: Option<String>,
    /// Type name of the value
    #[serde(rename = "PROPERTY_VALUE_TYPE", default)]
    pub value_type: Option<String>,
}

impl ConfigPropertyRecord {
    /// Row with a typed value.
    pub fn new(name: impl Into<String>, value: impl Into<String>, value_type: &str) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_type: Some(value_type.to_string()),
        }
    }
}

/// Field type for a property type name, ignoring any namespace prefix
/// (`xs:int`, `{http://www.w3.org/2001/XMLSchema}int` and `int` agree).
pub fn property_type(type_name: &str) -> Option<FieldType> {
    let local = type_name
        .rsplit([':', '}'])
        .next()
        .unwrap_or(type_name)
        .trim()
        .to_ascii_lowercase();
    let field_type = match local.as_str() {
        "string" | "normalizedstring" | "token" | "anyuri" => FieldType::String,
        "boolean" => FieldType::Boolean,
        "byte" | "short" | "int" | "integer" | "long" | "unsignedbyte" | "unsignedshort"
        | "unsignedint" | "positiveinteger" | "nonnegativeinteger" => FieldType::Integer,
        "float" | "double" | "decimal" => FieldType::Double,
        "date" => FieldType::Date,
        _ => return None,
    };
    Some(field_type)
}

/// Convert property rows into typed values.
///
/// Rows without a name are skipped and blank values become `null`. A value
/// of an unknown type, or one that does not parse as its type, is kept as
/// text.
pub fn convert_properties(rows: &[ConfigPropertyRecord]) -> Record {
    let mut properties = Record::new();
    for row in rows {
        let name = row.name.trim();
        if name.is_empty() {
            continue;
        }
        let value = match row.value.as_deref().filter(|v| !v.trim().is_empty()) {
            None => Value::Null,
            Some(text) => {
                let raw = Value::String(text.to_string());
                row.value_type
                    .as_deref()
                    .and_then(property_type)
                    .and_then(|field_type| field_type.convert(name, &raw).ok())
                    .unwrap_or(raw)
            }
        };
        properties.insert(name.to_string(), value);
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_names_ignore_namespace() {
        assert_eq!(property_type("xs:int"), Some(FieldType::Integer));
        assert_eq!(
            property_type("{http://www.w3.org/2001/XMLSchema}boolean"),
            Some(FieldType::Boolean)
        );
        assert_eq!(property_type("decimal"), Some(FieldType::Double));
        assert_eq!(property_type("gml:geometry"), None);
    }

    #[test]
    fn test_rows_are_converted_by_type() {
        let rows: Vec<ConfigPropertyRecord> = serde_json::from_value(json!([
            {"PROPERTY_NAME": "maxRows", "PROPERTY_VALUE": "25", "PROPERTY_VALUE_TYPE": "xs:int"},
            {"PROPERTY_NAME": "enabled", "PROPERTY_VALUE": "true", "PROPERTY_VALUE_TYPE": "xs:boolean"},
            {"PROPERTY_NAME": "scale", "PROPERTY_VALUE": "0.5", "PROPERTY_VALUE_TYPE": "xs:double"},
            {"PROPERTY_NAME": "url", "PROPERTY_VALUE": "http://x", "PROPERTY_VALUE_TYPE": "xs:anyURI"},
            {"PROPERTY_NAME": "shape", "PROPERTY_VALUE": "POINT(1 2)", "PROPERTY_VALUE_TYPE": "gml:geometry"},
            {"PROPERTY_NAME": "broken", "PROPERTY_VALUE": "many", "PROPERTY_VALUE_TYPE": "xs:int"},
            {"PROPERTY_NAME": "unset", "PROPERTY_VALUE": " ", "PROPERTY_VALUE_TYPE": "xs:string"},
            {"PROPERTY_NAME": "", "PROPERTY_VALUE": "ignored"}
        ]))
        .unwrap();

        let properties = convert_properties(&rows);
        assert_eq!(
            Value::Object(properties),
            json!({
                "maxRows": 25,
                "enabled": true,
                "scale": 0.5,
                "url": "http://x",
                "shape": "POINT(1 2)",
                "broken": "many",
                "unset": null
            })
        );
    }
}
