//! Property schema: validation, coercion, and sanitization.
//!
//! A schema declares the typed properties of a collection. Payloads are
//! coerced and checked against it on the way in; unknown keys are
//! stripped on ingress but never on egress, so documents written by
//! other paths keep their extra fields.

use crate::error::ValidationErrors;
use depot_store::{Document, Query, ID_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Declared type of a collection property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// UTF-8 text.
    String,
    /// Integer or float.
    Number,
    /// True or false.
    Boolean,
    /// Ordered sequence of values.
    Array,
    /// Nested mapping.
    Object,
    /// RFC 3339 string or epoch milliseconds.
    Date,
}

impl PropertyType {
    /// Returns the lowercase name used in error messages and configs.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Date => "date",
        }
    }

    /// Returns true if `value` satisfies this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Date => match value {
                Value::Number(n) => n.as_f64().is_some_and(f64::is_finite),
                Value::String(s) => chrono::DateTime::parse_from_rfc3339(s).is_ok(),
                _ => false,
            },
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            "date" => Ok(Self::Date),
            other => Err(format!("unknown property type: {other}")),
        }
    }
}

/// A declared property: name, type, and whether it must be present on
/// create. Immutable for the lifetime of the collection instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name; the key under which values are stored.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Whether the property must be present when creating a document.
    #[serde(default)]
    pub required: bool,
}

impl PropertyDescriptor {
    /// Creates an optional property.
    #[must_use]
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: false,
        }
    }

    /// Marks the property as required on create.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// The property declarations of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    properties: BTreeMap<String, PropertyDescriptor>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property declaration.
    #[must_use]
    pub fn with(mut self, descriptor: PropertyDescriptor) -> Self {
        self.properties.insert(descriptor.name.clone(), descriptor);
        self
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    /// Iterates over the declared properties.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }

    /// Validates `body` against the schema.
    ///
    /// Values are coerced first (numeric strings for `number`
    /// properties), then checked against the declared type. Missing
    /// required properties error only when `create` is true: partial
    /// updates are allowed. Missing `boolean` properties default to
    /// `false`, in place.
    ///
    /// An empty map means no errors.
    pub fn validate(&self, body: &mut Document, create: bool) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for (name, prop) in &self.properties {
            if prop.property_type == PropertyType::Number {
                if let Some(Value::String(raw)) = body.get(name) {
                    if let Some(coerced) = parse_number(raw) {
                        body.insert(name.clone(), Value::Number(coerced));
                    }
                }
            }

            match body.get(name) {
                Some(value) if exists(value) => {
                    if !prop.property_type.matches(value) {
                        errors.insert(
                            name.clone(),
                            format!("must be a {}", prop.property_type.type_name()),
                        );
                    }
                }
                _ if prop.required && create => {
                    errors.insert(name.clone(), "is required".to_string());
                }
                _ if prop.property_type == PropertyType::Boolean => {
                    body.insert(name.clone(), Value::Bool(false));
                }
                _ => {}
            }
        }

        errors
    }

    /// Produces a new document containing only declared properties.
    ///
    /// Values of the declared type are kept; numeric strings coerce
    /// for `number` properties. Everything else is dropped silently.
    #[must_use]
    pub fn sanitize(&self, body: &Map<String, Value>) -> Document {
        let mut clean = Document::new();

        for (name, prop) in &self.properties {
            let Some(value) = body.get(name) else { continue };

            if prop.property_type.matches(value) {
                clean.insert(name.clone(), value.clone());
            } else if prop.property_type == PropertyType::Number {
                if let Value::String(raw) = value {
                    if let Some(coerced) = parse_number(raw) {
                        clean.insert(name.clone(), Value::Number(coerced));
                    }
                }
            }
        }

        clean
    }

    /// Sanitizes a request query into a store query.
    ///
    /// `$`-prefixed keys pass through unchanged, except
    /// `$limitRecursion` and `$skipEvents`, which are stripped. `id`
    /// passes through unchanged. Declared properties coerce like
    /// [`Schema::sanitize`], plus `boolean` properties accept the
    /// literal string `"true"` (anything else reads as false); values
    /// that still don't match their declared type are kept as-is, so
    /// operator mappings like `{"$gt": 3}` reach the store. Undeclared
    /// plain keys are dropped. (JSON cannot carry `undefined`; `null`
    /// is a defined value and passes through.)
    #[must_use]
    pub fn sanitize_query(&self, query: &Map<String, Value>) -> Query {
        let mut clean = Query::new();

        for (key, value) in query {
            if key == "$limitRecursion" || key == "$skipEvents" {
                continue;
            }
            if key.starts_with('$') || key == ID_KEY {
                clean.insert(key.clone(), value.clone());
                continue;
            }
            let Some(prop) = self.get(key) else { continue };

            let coerced = match (prop.property_type, value) {
                (PropertyType::Number, Value::String(raw)) => {
                    parse_number(raw).map(Value::Number).unwrap_or_else(|| value.clone())
                }
                (PropertyType::Boolean, Value::String(raw)) => Value::Bool(raw == "true"),
                _ => value.clone(),
            };
            clean.insert(key.clone(), coerced);
        }

        clean
    }
}

impl FromIterator<PropertyDescriptor> for Schema {
    fn from_iter<I: IntoIterator<Item = PropertyDescriptor>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Schema::with)
    }
}

/// Presence test: null and the empty string count as absent.
fn exists(value: &Value) -> bool {
    !matches!(value, Value::Null) && value.as_str() != Some("")
}

/// Parses a full decimal string into a JSON number.
///
/// Integral values stay integral. Partial parses (`"7abc"`) fail.
fn parse_number(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Some(Number::from(integer));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_schema() -> Schema {
        Schema::new()
            .with(PropertyDescriptor::new("title", PropertyType::String).required())
            .with(PropertyDescriptor::new("votes", PropertyType::Number))
            .with(PropertyDescriptor::new("done", PropertyType::Boolean))
    }

    fn body(value: Value) -> Document {
        match value {
            Value::Object(map) => Document(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn validate_missing_required_on_create() {
        let schema = todo_schema();
        let mut item = body(json!({"votes": 3}));
        let errors = schema.validate(&mut item, true);
        assert_eq!(errors.get("title").map(String::as_str), Some("is required"));
    }

    #[test]
    fn validate_missing_required_on_update_is_fine() {
        let schema = todo_schema();
        let mut item = body(json!({"votes": 3}));
        let errors = schema.validate(&mut item, false);
        assert!(!errors.contains_key("title"));
    }

    #[test]
    fn validate_coerces_numeric_strings() {
        let schema = todo_schema();
        let mut item = body(json!({"title": "a", "votes": "7"}));
        let errors = schema.validate(&mut item, true);
        assert!(errors.is_empty());
        assert_eq!(item.get("votes"), Some(&json!(7)));
    }

    #[test]
    fn validate_reports_type_mismatch() {
        let schema = todo_schema();
        let mut item = body(json!({"title": 9, "votes": "not a number"}));
        let errors = schema.validate(&mut item, true);
        assert_eq!(
            errors.get("title").map(String::as_str),
            Some("must be a string")
        );
        assert_eq!(
            errors.get("votes").map(String::as_str),
            Some("must be a number")
        );
    }

    #[test]
    fn validate_defaults_missing_booleans() {
        let schema = todo_schema();
        let mut item = body(json!({"title": "a"}));
        let errors = schema.validate(&mut item, true);
        assert!(errors.is_empty());
        assert_eq!(item.get("done"), Some(&json!(false)));
    }

    #[test]
    fn validate_required_beats_boolean_default() {
        let schema = Schema::new()
            .with(PropertyDescriptor::new("flag", PropertyType::Boolean).required());
        let mut item = body(json!({}));
        let errors = schema.validate(&mut item, true);
        assert_eq!(errors.get("flag").map(String::as_str), Some("is required"));
        assert!(item.get("flag").is_none());
    }

    #[test]
    fn validate_empty_string_counts_as_absent() {
        let schema = todo_schema();
        let mut item = body(json!({"title": ""}));
        let errors = schema.validate(&mut item, true);
        assert_eq!(errors.get("title").map(String::as_str), Some("is required"));
    }

    #[test]
    fn validate_date_properties() {
        let schema =
            Schema::new().with(PropertyDescriptor::new("due", PropertyType::Date));

        let mut item = body(json!({"due": "2026-01-15T10:00:00Z"}));
        assert!(schema.validate(&mut item, true).is_empty());

        let mut item = body(json!({"due": 1736935200000i64}));
        assert!(schema.validate(&mut item, true).is_empty());

        let mut item = body(json!({"due": "tomorrow"}));
        let errors = schema.validate(&mut item, true);
        assert_eq!(errors.get("due").map(String::as_str), Some("must be a date"));
    }

    #[test]
    fn sanitize_strips_unknown_keys() {
        let schema = todo_schema();
        let clean =
            schema.sanitize(&body(json!({"title": "a", "hacker": true, "id": "x"})));
        assert!(clean.get("hacker").is_none());
        assert!(clean.get("id").is_none());
        assert_eq!(clean.get("title"), Some(&json!("a")));
    }

    #[test]
    fn sanitize_drops_type_mismatches() {
        let schema = todo_schema();
        let clean = schema.sanitize(&body(json!({"title": 42, "votes": [1]})));
        assert!(clean.is_empty());
    }

    #[test]
    fn sanitize_coerces_numeric_strings() {
        let schema = todo_schema();
        let clean = schema.sanitize(&body(json!({"votes": "7.5"})));
        assert_eq!(clean.get("votes"), Some(&json!(7.5)));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let schema = todo_schema();
        let raw = body(json!({"title": "a", "votes": "7", "junk": 1}));
        let once = schema.sanitize(&raw);
        let twice = schema.sanitize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_query_passes_operators_and_id() {
        let schema = todo_schema();
        let clean = schema.sanitize_query(&body(json!({
            "id": "x",
            "$limit": 10,
            "$limitRecursion": 2,
            "$skipEvents": true,
            "junk": 1
        })));
        assert_eq!(clean.get("id"), Some(&json!("x")));
        assert_eq!(clean.get("$limit"), Some(&json!(10)));
        assert!(clean.get("$limitRecursion").is_none());
        assert!(clean.get("$skipEvents").is_none());
        assert!(clean.get("junk").is_none());
    }

    #[test]
    fn sanitize_query_boolean_strings() {
        let schema = todo_schema();
        let clean = schema.sanitize_query(&body(json!({"done": "true"})));
        assert_eq!(clean.get("done"), Some(&json!(true)));

        let clean = schema.sanitize_query(&body(json!({"done": "yes"})));
        assert_eq!(clean.get("done"), Some(&json!(false)));
    }

    #[test]
    fn sanitize_query_keeps_operator_mappings() {
        let schema = todo_schema();
        let clean = schema.sanitize_query(&body(json!({"votes": {"$gt": 3}})));
        assert_eq!(clean.get("votes"), Some(&json!({"$gt": 3})));
    }

    #[test]
    fn sanitize_query_passes_nulls_through() {
        let schema = todo_schema();
        let clean = schema.sanitize_query(&body(json!({"votes": null, "$sort": null})));
        assert_eq!(clean.get("votes"), Some(&Value::Null));
        assert_eq!(clean.get("$sort"), Some(&Value::Null));
    }

    #[test]
    fn property_type_parsing() {
        assert_eq!("number".parse::<PropertyType>(), Ok(PropertyType::Number));
        assert!("blob".parse::<PropertyType>().is_err());
        assert_eq!(PropertyType::Date.to_string(), "date");
    }

    #[test]
    fn partial_number_parse_fails() {
        assert!(parse_number("7abc").is_none());
        assert!(parse_number("NaN").is_none());
        assert_eq!(parse_number(" 42 "), Some(Number::from(42)));
    }
}
