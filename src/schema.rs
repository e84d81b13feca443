//! JSON schema descriptors for structured (`json`) extraction.
//!
//! A [`JsonSchema`] is compiled once per run and shared by every page
//! request. It can come from a literal `serde_json::Value` (for example a
//! schema file loaded by the CLI) or be derived from a Rust type with
//! [`schemars`], which is the natural way to say "the answer must look like
//! this struct".

use crate::error::VlenseError;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;
use std::fmt;

/// A compiled JSON schema plus its source document.
pub struct JsonSchema {
    raw: Value,
    compiled: JSONSchema,
}

impl JsonSchema {
    /// Compile a schema from its JSON representation.
    pub fn from_value(raw: Value) -> Result<Self, VlenseError> {
        if !raw.is_object() {
            return Err(VlenseError::InvalidSchema {
                detail: "schema must be a JSON object".into(),
            });
        }
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&raw)
            .map_err(|e| VlenseError::InvalidSchema {
                detail: e.to_string(),
            })?;
        Ok(Self { raw, compiled })
    }

    /// Parse and compile a schema from JSON text.
    pub fn parse(text: &str) -> Result<Self, VlenseError> {
        let raw: Value = serde_json::from_str(text).map_err(|e| VlenseError::InvalidSchema {
            detail: format!("not valid JSON: {e}"),
        })?;
        Self::from_value(raw)
    }

    /// Derive the schema from a Rust type.
    ///
    /// ```rust
    /// use vlense::JsonSchema;
    ///
    /// #[derive(schemars::JsonSchema)]
    /// struct Invoice {
    ///     number: String,
    ///     total: f64,
    /// }
    ///
    /// let schema = JsonSchema::for_type::<Invoice>().unwrap();
    /// assert!(schema.as_value()["properties"]["total"].is_object());
    /// ```
    pub fn for_type<T: schemars::JsonSchema>() -> Result<Self, VlenseError> {
        let raw = serde_json::to_value(schemars::schema_for!(T)).map_err(|e| {
            VlenseError::InvalidSchema {
                detail: e.to_string(),
            }
        })?;
        Self::from_value(raw)
    }

    /// The schema document as given.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    /// Pretty-printed schema, used when embedding it in prompts.
    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }

    /// Validate `instance`, returning every violation joined into one message.
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        match self.compiled.validate(instance) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let messages: Vec<String> = errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        if path.is_empty() {
                            e.to_string()
                        } else {
                            format!("{path}: {e}")
                        }
                    })
                    .collect();
                Err(messages.join("; "))
            }
        }
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema").field("raw", &self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_schema() -> JsonSchema {
        JsonSchema::from_value(json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": { "type": "string" },
                "age": { "type": "integer", "minimum": 0 }
            }
        }))
        .expect("schema compiles")
    }

    #[test]
    fn accepts_conforming_instance() {
        let schema = person_schema();
        assert!(schema.validate(&json!({"name": "Ada", "age": 36})).is_ok());
    }

    #[test]
    fn reports_violations() {
        let schema = person_schema();
        let err = schema.validate(&json!({"age": -1})).unwrap_err();
        assert!(err.contains("name"), "got: {err}");
    }

    #[test]
    fn rejects_non_object_schema() {
        let err = JsonSchema::from_value(json!(["not", "a", "schema"])).unwrap_err();
        assert!(matches!(err, VlenseError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_malformed_text() {
        let err = JsonSchema::parse("{ nope").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn derives_from_rust_type() {
        #[allow(dead_code)]
        #[derive(schemars::JsonSchema)]
        struct Receipt {
            merchant: String,
            total: f64,
        }

        let schema = JsonSchema::for_type::<Receipt>().unwrap();
        assert!(schema
            .validate(&json!({"merchant": "Cafe", "total": 4.5}))
            .is_ok());
        assert!(schema.validate(&json!({"merchant": "Cafe"})).is_err());
    }
}
