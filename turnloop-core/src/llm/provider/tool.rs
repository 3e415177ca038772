use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: String, description: String, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_owned(),
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function.name
    }
}

/// A tool request issued by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as the raw JSON text the model produced
    pub arguments: String,
}

impl ToolCall {
    pub fn function(id: String, name: String, arguments: String) -> Self {
        Self {
            id,
            call_type: "function".to_owned(),
            function: FunctionCall { name, arguments },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the arguments. Blank arguments are treated as an empty object.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_arguments_parse_as_empty_object() {
        let call = ToolCall::function("c1".into(), "read_file".into(), "  ".into());
        assert_eq!(call.parsed_arguments().expect("parses"), json!({}));
    }

    #[test]
    fn malformed_arguments_are_reported() {
        let call = ToolCall::function("c1".into(), "read_file".into(), "{path:".into());
        assert!(call.parsed_arguments().is_err());
    }

    #[test]
    fn definition_serializes_in_openai_shape() {
        let tool = ToolDefinition::function(
            "web_search".into(),
            "Search".into(),
            json!({"type": "object"}),
        );
        let value = serde_json::to_value(&tool).expect("serializes");
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "web_search");
    }
}
