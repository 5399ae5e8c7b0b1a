use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// The minimal schema descriptor a [`ToolSpec`] validates `args` against:
/// `{type: "object", properties: {name -> {type}}, required: [names]}`.
/// Supported scalar field types are `string`, `integer`, `number`, `boolean`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: String,
}

pub type ToolHandler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A named, schema-checked tool the orchestrator or worker can invoke.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish()
    }
}

/// Process-wide singleton holding registered tools. Created once at
/// startup; there is no dependency injection beyond construction.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Registers a tool. Fails with `DuplicateTool` if the name already exists.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.tools.contains_key(&spec.name) {
            return Err(Error::DuplicateTool(spec.name));
        }
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Validates `args` against `schema`: every required key present, no
    /// unexpected keys, each typed field matching its declared scalar type.
    pub fn validate_args(schema: &ToolSchema, args: &Value) -> Result<()> {
        if schema.kind != "object" {
            return Err(Error::InvalidArgument("tool schema must be type=object".into()));
        }
        let args_obj = args
            .as_object()
            .ok_or_else(|| Error::InvalidArgument("tool args must be a JSON object".into()))?;

        for key in &schema.required {
            if !args_obj.contains_key(key) {
                return Err(Error::InvalidArgument(format!("missing required arg: {key}")));
            }
        }

        for (key, value) in args_obj {
            let prop = schema
                .properties
                .get(key)
                .ok_or_else(|| Error::InvalidArgument(format!("unexpected arg: {key}")))?;
            let ok = match prop.kind.as_str() {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                _ => true,
            };
            if !ok {
                return Err(Error::InvalidArgument(format!("arg '{key}' must be {}", prop.kind)));
            }
        }
        Ok(())
    }

    /// Looks up `name` (`UnknownTool` if absent), validates `args`
    /// (`InvalidArgument` on mismatch), then invokes the handler.
    pub fn run(&self, name: &str, args: &Value) -> Result<Value> {
        let tool = self.get(name).ok_or_else(|| Error::UnknownTool(name.to_string()))?;
        Self::validate_args(&tool.schema, args)?;
        (tool.handler)(args)
    }
}

/// Builds the default registry: just the `ping` connectivity tool.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(ToolSpec {
            name: "ping".into(),
            description: "Connectivity sanity tool: echoes a message.".into(),
            schema: ToolSchema {
                kind: "object".into(),
                properties: HashMap::from([(
                    "message".into(),
                    PropertySchema { kind: "string".into() },
                )]),
                required: vec![],
            },
            handler: Arc::new(|args| {
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("pong")
                    .to_string();
                Ok(serde_json::json!({"ok": true, "tool": "ping", "echo": message}))
            }),
        })
        .expect("ping registers into an empty registry");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_echoes_default_message() {
        let registry = default_registry();
        let result = registry.run("ping", &json!({})).unwrap();
        assert_eq!(result["echo"], "pong");
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn ping_echoes_provided_message() {
        let registry = default_registry();
        let result = registry.run("ping", &json!({"message": "hi"})).unwrap();
        assert_eq!(result["echo"], "hi");
    }

    #[test]
    fn unknown_tool_is_error() {
        let registry = default_registry();
        assert!(matches!(registry.run("frobnicate", &json!({})), Err(Error::UnknownTool(_))));
    }

    #[test]
    fn duplicate_registration_is_error() {
        let mut registry = ToolRegistry::new();
        let spec = |name: &str| ToolSpec {
            name: name.into(),
            description: "d".into(),
            schema: ToolSchema { kind: "object".into(), properties: HashMap::new(), required: vec![] },
            handler: Arc::new(|_| Ok(json!({}))),
        };
        registry.register(spec("dup")).unwrap();
        assert!(matches!(registry.register(spec("dup")), Err(Error::DuplicateTool(_))));
    }

    #[test]
    fn missing_required_arg_is_invalid_argument() {
        let schema = ToolSchema {
            kind: "object".into(),
            properties: HashMap::from([("name".into(), PropertySchema { kind: "string".into() })]),
            required: vec!["name".into()],
        };
        assert!(matches!(
            ToolRegistry::validate_args(&schema, &json!({})),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn unexpected_arg_is_invalid_argument() {
        let schema = ToolSchema { kind: "object".into(), properties: HashMap::new(), required: vec![] };
        assert!(matches!(
            ToolRegistry::validate_args(&schema, &json!({"surprise": 1})),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn wrong_scalar_type_is_invalid_argument() {
        let schema = ToolSchema {
            kind: "object".into(),
            properties: HashMap::from([("count".into(), PropertySchema { kind: "integer".into() })]),
            required: vec![],
        };
        assert!(matches!(
            ToolRegistry::validate_args(&schema, &json!({"count": "not a number"})),
            Err(Error::InvalidArgument(_))
        ));
        assert!(ToolRegistry::validate_args(&schema, &json!({"count": 5})).is_ok());
    }
}
