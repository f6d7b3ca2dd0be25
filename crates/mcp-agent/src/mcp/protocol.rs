//! Tool descriptors and call results as the rest of the crate sees them,
//! converted once from the MCP client's wire types.

use std::borrow::Cow;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A tool as reported by a server's `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

impl From<rmcp::model::Tool> for RemoteTool {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(Cow::into_owned),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }
}

/// Raw `tools/call` result envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(rename = "isError", default, deserialize_with = "null_as_false")]
    pub is_error: bool,
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Re-read a client result in its wire shape, so content items of any
    /// kind survive as plain JSON
    pub fn from_rmcp(result: &rmcp::model::CallToolResult) -> Result<Self> {
        let value = serde_json::to_value(result)?;
        serde_json::from_value(value).context("malformed tools/call result")
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: vec![serde_json::json!({"type": "text", "text": text.into()})],
            ..Default::default()
        }
    }

    /// Plain rendering of the whole envelope, used when it carries no content items
    pub fn string_form(&self) -> String {
        match &self.structured_content {
            Some(structured) => render_value(structured),
            None => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

/// The payload of a tool result, decoded once from the envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// First content item carried a `text` field
    Text(String),
    /// First content item carried a nested `content` field instead
    Nested(Value),
    /// Anything else, kept in its string form
    Opaque(String),
}

impl ToolOutput {
    pub fn from_result(result: &CallToolResult) -> Self {
        let Some(first) = result.content.first() else {
            return ToolOutput::Opaque(result.string_form());
        };

        if let Some(text) = first.get("text").and_then(|t| t.as_str()) {
            return ToolOutput::Text(text.to_string());
        }

        match first.get("content") {
            Some(nested) => ToolOutput::Nested(nested.clone()),
            None => ToolOutput::Opaque(render_value(first)),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) | ToolOutput::Opaque(text) => text,
            ToolOutput::Nested(value) => render_value(&value),
        }
    }
}

fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// Strings render bare, everything else as compact JSON
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
