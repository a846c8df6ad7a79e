//! # Tool System
//!
//! Tool definitions and the static registry the agent loop executes against.
//!
//! A [`Tool`] couples metadata (name, description, parameter schema) with an
//! async handler. Handlers are stored as `Arc<dyn Fn(...) -> Pin<Box<dyn
//! Future>>>`: the `Arc` makes tools cheap to clone into the registry and
//! across tasks, the pinned boxed future erases each handler's concrete
//! async type, and the `Send + Sync` bounds let the registry be shared by
//! every session.
//!
//! ## Execution contract
//!
//! [`ToolRegistry::execute`] **never fails**. Unknown tools, schema-invalid
//! arguments, and handler errors all come back as a `ToolError: ...` string;
//! the agent reads that observation and reacts to it, so a bad tool call
//! never crashes the loop.
//!
//! ## Schema notation
//!
//! Schemas accept the same shorthand the rest of the codebase uses: a flat
//! `{"param": "string"}` map, an extended `{"param": {"type": ..,
//! "description": .., "optional": true}}` map, or a full JSON Schema object;
//! all are normalized to `{"type": "object", "properties": ..,
//! "required": [..]}`.

use crate::{Result, calc};
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Type-erased async tool handler.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A named, schema-described, executable tool.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    /// Create a tool. The schema may be shorthand (see module docs); it is
    /// normalized to full JSON Schema here.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: normalize_schema(input_schema),
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Run the handler with raw arguments. Prefer
    /// [`ToolRegistry::execute`], which validates first.
    pub async fn execute(&self, arguments: Value) -> Result<Value> {
        (self.handler)(arguments).await
    }

    /// Descriptor object served by the admin surface:
    /// `{name, description, parameters}`.
    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.input_schema,
        })
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Normalize shorthand schemas to `{"type": "object", "properties", "required"}`.
fn normalize_schema(schema: Value) -> Value {
    if let Some(obj) = schema.as_object() {
        if obj.contains_key("type") && obj.contains_key("properties") {
            return schema;
        }

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for (param, spec) in obj {
            if let Some(type_str) = spec.as_str() {
                properties.insert(param.clone(), type_to_schema(type_str));
                required.push(param.clone());
            } else if spec.is_object() {
                let mut prop = spec.clone();
                let prop_obj = prop
                    .as_object_mut()
                    .unwrap_or_else(|| unreachable!("is_object checked above"));

                let optional = prop_obj
                    .remove("optional")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let explicit_required = prop_obj.remove("required").and_then(|v| v.as_bool());
                let has_default = prop_obj.contains_key("default");

                properties.insert(param.clone(), prop);

                match explicit_required {
                    Some(true) => required.push(param.clone()),
                    Some(false) => {}
                    None if optional || has_default => {}
                    None => required.push(param.clone()),
                }
            }
        }

        return json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
    }

    json!({ "type": "object", "properties": {}, "required": [] })
}

fn type_to_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    json!({ "type": json_type })
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Static set of tools, registered at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<Tool>>,
}

impl ToolRegistry {
    /// An empty registry (the agent still works; it just answers directly).
    pub fn new() -> Self {
        Self::default()
    }

    /// The gateway's built-in tool set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(calculator_tool());
        registry.register(current_time_tool());
        registry.register(weather_tool());
        registry.register(search_knowledge_tool());
        registry
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.push(Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Descriptor list for the admin surface.
    pub fn descriptors(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Render every tool for the agent's system prompt.
    pub fn render_for_prompt(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                format!(
                    "- {}: {}\n  Parameters: {}",
                    t.name(),
                    t.description(),
                    t.input_schema()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute `name` with `args`, returning the observation string. Every
    /// failure mode is folded into a readable `ToolError: ...` result; this
    /// method cannot fail.
    pub async fn execute(&self, name: &str, args: &Value) -> String {
        let Some(tool) = self.get(name) else {
            return format!(
                "ToolError: unknown tool '{name}' (available: {})",
                self.names().join(", ")
            );
        };

        if let Err(reason) = validate_args(tool.input_schema(), args) {
            return format!("ToolError: invalid arguments for '{name}': {reason}");
        }

        match tool.execute(args.clone()).await {
            Ok(Value::String(s)) => s,
            Ok(value) => value.to_string(),
            Err(e) => format!("ToolError: {e}"),
        }
    }
}

/// Check `args` against a normalized schema: required parameters must be
/// present and parameter types must match. Extra arguments are tolerated.
fn validate_args(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let properties = schema.get("properties").and_then(|p| p.as_object());
    let required = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| {
            r.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<&str>>()
        })
        .unwrap_or_default();

    let args_obj = match args {
        Value::Object(o) => o.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return Err("arguments must be a JSON object".to_string()),
    };

    for param in &required {
        if !args_obj.contains_key(*param) {
            return Err(format!("missing required parameter '{param}'"));
        }
    }

    if let Some(props) = properties {
        for (param, value) in &args_obj {
            let Some(spec) = props.get(param) else {
                continue;
            };
            let expected = spec.get("type").and_then(|t| t.as_str()).unwrap_or("string");
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("parameter '{param}' must be of type {expected}"));
            }
        }
    }

    Ok(())
}

// ============================================================================
// BUILT-IN TOOLS
// ============================================================================

fn calculator_tool() -> Tool {
    Tool::new(
        "calculator",
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, \
         the functions sqrt, sin, cos, tan, log, exp, abs, and the constants pi and e. \
         Nothing else is evaluated.",
        json!({
            "expression": {
                "type": "string",
                "description": "The arithmetic expression to evaluate, e.g. \"25 * 8\""
            }
        }),
        |args| async move {
            let expression = args
                .get("expression")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let value = calc::evaluate(expression)?;
            Ok(json!(calc::format_number(value)))
        },
    )
}

fn current_time_tool() -> Tool {
    Tool::new(
        "get_current_time",
        "Get the current date and time. Takes no parameters.",
        json!({}),
        |_args| async move {
            let now = chrono::Local::now();
            Ok(json!({
                "iso8601": now.to_rfc3339(),
                "date": now.format("%A, %B %d, %Y").to_string(),
                "time": now.format("%H:%M:%S").to_string(),
            }))
        },
    )
}

fn weather_tool() -> Tool {
    Tool::new(
        "get_weather",
        "Get the current weather for a location. This is a demonstration tool \
         returning mock data, not a live forecast.",
        json!({
            "location": {
                "type": "string",
                "description": "City or place name"
            }
        }),
        |args| async move {
            let location = args
                .get("location")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            Ok(json!({
                "location": location,
                "temperature_c": 21,
                "conditions": "partly cloudy",
                "humidity_percent": 55,
                "note": "mock data for demonstration purposes, not a live forecast",
            }))
        },
    )
}

fn search_knowledge_tool() -> Tool {
    Tool::new(
        "search_knowledge",
        "Search the internal knowledge base. This is a demonstration tool \
         returning mock results.",
        json!({
            "query": {
                "type": "string",
                "description": "What to look up"
            }
        }),
        |args| async move {
            let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!({
                "query": query,
                "results": [
                    { "title": "Getting started", "snippet": "Overview of the platform and its capabilities." },
                    { "title": "Frequently asked questions", "snippet": "Answers to common questions." },
                ],
                "note": "mock knowledge base for demonstration purposes",
            }))
        },
    )
}
