use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Static catalog entry describing one tool the LLM may call.
///
/// `input_schema` is kept as an opaque JSON schema value, validated once
/// when the catalog is loaded; runtime lookup is by `name` only.
/// `capability_name` gates which agents see the tool and `action_name` is
/// what the dispatcher actually executes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub capability_name: String,
    pub action_name: String,
    pub is_active: bool,
}

impl ToolDefinition {
    /// A schema must at minimum be an object declaring `type`. Anything
    /// else is rejected at load so the executor never ships a malformed
    /// schema to the model.
    pub fn validate_schema(&self) -> Result<(), String> {
        let Some(obj) = self.input_schema.as_object() else {
            return Err(format!("tool {}: input_schema is not an object", self.name));
        };
        if obj.get("type").and_then(Value::as_str) != Some("object") {
            return Err(format!(
                "tool {}: input_schema must declare type \"object\"",
                self.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_validation() {
        let mut tool = ToolDefinition {
            name: "crm_search".into(),
            description: "Search CRM contacts".into(),
            input_schema: json!({"type": "object", "properties": {"q": {"type": "string"}}}),
            capability_name: "crm".into(),
            action_name: "crm.search".into(),
            is_active: true,
        };
        assert!(tool.validate_schema().is_ok());

        tool.input_schema = json!("not a schema");
        assert!(tool.validate_schema().is_err());
    }
}
