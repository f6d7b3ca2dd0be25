//! Turns the JSON schema a tool server declares for a tool into a validator
//! that checks and coerces arguments before they are sent back to that server.

use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};

/// Local type a declared JSON schema type maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Text,
    Integer,
    Number,
    Flag,
    Sequence,
    Mapping,
}

impl ParamType {
    /// Map a JSON schema `type` onto a local type; anything unrecognised is text.
    pub fn from_json_type(json_type: Option<&str>) -> Self {
        match json_type {
            Some("integer") => ParamType::Integer,
            Some("number") => ParamType::Number,
            Some("boolean") => ParamType::Flag,
            Some("array") => ParamType::Sequence,
            Some("object") => ParamType::Mapping,
            _ => ParamType::Text,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            ParamType::Text => "a string",
            ParamType::Integer => "an integer",
            ParamType::Number => "a number",
            ParamType::Flag => "a boolean",
            ParamType::Sequence => "an array",
            ParamType::Mapping => "an object",
        }
    }

    /// Check a supplied value, coercing the loose forms models tend to produce
    /// (numeric strings, whole floats, "true"/"false").
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamType::Text, Value::String(_)) => Some(value.clone()),
            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    // Whole floats outside the i64 range are rejected, not saturated
                    let range = i64::MIN as f64..i64::MAX as f64;
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && range.contains(f))
                        .map(|f| Value::from(f as i64))
                }
            }
            (ParamType::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (ParamType::Number, Value::Number(_)) => Some(value.clone()),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from),
            (ParamType::Flag, Value::Bool(_)) => Some(value.clone()),
            (ParamType::Flag, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Value::Bool(true)),
                "false" | "0" | "no" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParamType::Sequence, Value::Array(_)) => Some(value.clone()),
            (ParamType::Mapping, Value::Object(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

/// Structural validator derived from a tool's input schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputValidator {
    params: Vec<ParamSpec>,
}

impl InputValidator {
    /// Build a validator from a schema with `properties` and `required`.
    ///
    /// Schemas without `properties` produce a validator that accepts no
    /// declared parameters.
    pub fn from_schema(schema: &Value) -> Self {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let params = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, info)| ParamSpec {
                        name: name.clone(),
                        param_type: ParamType::from_json_type(
                            info.get("type").and_then(|t| t.as_str()),
                        ),
                        description: info
                            .get("description")
                            .and_then(|d| d.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        required: required.contains(&name.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate and coerce caller-supplied arguments.
    ///
    /// The result holds only the declared parameters the caller supplied,
    /// coerced to their declared type. Absent optional parameters are left
    /// out so the server applies its own defaults.
    pub fn validate(&self, arguments: &Value) -> AgentResult<Map<String, Value>> {
        let empty = Map::new();
        let supplied = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(AgentError::InvalidArguments(format!(
                    "expected an object of arguments, got {}",
                    other
                )))
            }
        };

        let mut validated = Map::new();
        for param in &self.params {
            match supplied.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::InvalidArguments(format!(
                        "missing required argument '{}'",
                        param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    let coerced = param.param_type.coerce(value).ok_or_else(|| {
                        AgentError::InvalidArguments(format!(
                            "argument '{}' must be {}, got {}",
                            param.name,
                            param.param_type.expected(),
                            value
                        ))
                    })?;
                    validated.insert(param.name.clone(), coerced);
                }
            }
        }

        for key in supplied.keys() {
            if self.param(key).is_none() {
                tracing::debug!(argument = %key, "dropping undeclared tool argument");
            }
        }

        Ok(validated)
    }
}
