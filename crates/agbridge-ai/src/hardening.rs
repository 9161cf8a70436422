//! Tool hardening applied before tool schemas cross into the target protocol.
//!
//! Four passes run in a fixed order and each is idempotent:
//! 1. `forbid_additional_properties` closes every object schema,
//! 2. `sign_tool` embeds a fingerprint of the closed definition,
//! 3. `prepend_system_fragment` adds the tool-use expectations to the system text,
//! 4. `namespace_tool` prefixes the tool name.
//!
//! Signing happens before namespacing and is computed over the bare name, so a
//! namespaced tool still verifies.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::{translate::GeminiContent, ToolDefinition};

pub const TOOL_NAMESPACE_PREFIX: &str = "agb__";
pub const TOOL_USE_SYSTEM_FRAGMENT: &str = "Tool use: call only the functions declared in this request and pass arguments that match each declared schema exactly. Do not invent parameters or function names.";

const SIGNATURE_OPEN: &str = "[agbridge-sig:";
const SIGNATURE_HEX_CHARS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Runs the hardening passes with a configurable namespace and system fragment.
pub struct ToolHardening {
    pub namespace: String,
    pub system_fragment: String,
}

impl Default for ToolHardening {
    fn default() -> Self {
        Self {
            namespace: TOOL_NAMESPACE_PREFIX.to_string(),
            system_fragment: TOOL_USE_SYSTEM_FRAGMENT.to_string(),
        }
    }
}

impl ToolHardening {
    /// Applies all four passes. Returns the hardened tools and system text.
    pub fn apply(&self, tools: &[ToolDefinition], system: &str) -> (Vec<ToolDefinition>, String) {
        let mut hardened = tools.to_vec();
        for tool in &mut hardened {
            forbid_additional_properties(&mut tool.parameters);
        }
        for tool in &mut hardened {
            sign_tool(tool, &self.namespace);
        }
        let system = prepend_system_fragment(system, &self.system_fragment);
        for tool in &mut hardened {
            namespace_tool(tool, &self.namespace);
        }
        (hardened, system)
    }

    /// Prefixes the function-call and function-response names already in the
    /// conversation so they match the namespaced declarations.
    pub fn namespace_history(&self, contents: &mut [GeminiContent]) {
        for part in contents.iter_mut().flat_map(|content| content.parts.iter_mut()) {
            if let Some(call) = part.function_call.as_mut() {
                call.name = namespaced_name(&call.name, &self.namespace);
            }
            if let Some(response) = part.function_response.as_mut() {
                response.name = namespaced_name(&response.name, &self.namespace);
            }
        }
    }

    pub fn restore_name<'a>(&self, name: &'a str) -> &'a str {
        strip_namespace(name, &self.namespace)
    }
}

/// Pass 1: sets `additionalProperties: false` on every object schema.
///
/// A missing (null) schema becomes an empty closed object.
pub fn forbid_additional_properties(schema: &mut Value) {
    if schema.is_null() {
        *schema = json!({"type": "object", "properties": {}});
    }
    close_object_schemas(schema);
}

fn close_object_schemas(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for (key, nested) in map.iter_mut() {
                if key == "additionalProperties" {
                    continue;
                }
                close_object_schemas(nested);
            }
        }
        Value::Array(values) => values.iter_mut().for_each(close_object_schemas),
        _ => {}
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    let typed_object = match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|kind| kind == "object"),
        _ => false,
    };
    typed_object || map.get("properties").is_some_and(Value::is_object)
}

/// Pass 2: appends a fingerprint of the definition to its description.
pub fn sign_tool(tool: &mut ToolDefinition, namespace: &str) {
    let base_description = unsigned_description(&tool.description).to_string();
    let signature = tool_signature(
        strip_namespace(&tool.name, namespace),
        &base_description,
        &tool.parameters,
    );
    tool.description = if base_description.is_empty() {
        format!("{SIGNATURE_OPEN}{signature}]")
    } else {
        format!("{base_description}\n\n{SIGNATURE_OPEN}{signature}]")
    };
}

/// Computes the fingerprint over the canonical (key-sorted) definition.
pub fn tool_signature(name: &str, description: &str, parameters: &Value) -> String {
    let canonical = json!({
        "name": name,
        "description": description,
        "parameters": parameters,
    })
    .to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    hex[..SIGNATURE_HEX_CHARS].to_string()
}

/// Returns true when the embedded fingerprint matches the definition.
pub fn verify_tool_signature(tool: &ToolDefinition, namespace: &str) -> bool {
    let Some(embedded) = embedded_signature(&tool.description) else {
        return false;
    };
    let expected = tool_signature(
        strip_namespace(&tool.name, namespace),
        unsigned_description(&tool.description),
        &tool.parameters,
    );
    embedded == expected
}

fn embedded_signature(description: &str) -> Option<&str> {
    let start = description.rfind(SIGNATURE_OPEN)?;
    let tail = &description[start + SIGNATURE_OPEN.len()..];
    tail.strip_suffix(']')
}

fn unsigned_description(description: &str) -> &str {
    match description.rfind(SIGNATURE_OPEN) {
        Some(start) if description.ends_with(']') => description[..start].trim_end(),
        _ => description,
    }
}

/// Pass 3: puts the tool-use fragment in front of the system text once.
pub fn prepend_system_fragment(system: &str, fragment: &str) -> String {
    if system.starts_with(fragment) {
        return system.to_string();
    }
    if system.trim().is_empty() {
        return fragment.to_string();
    }
    format!("{fragment}\n\n{system}")
}

/// Pass 4: prefixes the tool name with the namespace once.
pub fn namespace_tool(tool: &mut ToolDefinition, namespace: &str) {
    tool.name = namespaced_name(&tool.name, namespace);
}

fn namespaced_name(name: &str, namespace: &str) -> String {
    if name.starts_with(namespace) {
        name.to_string()
    } else {
        format!("{namespace}{name}")
    }
}

/// Removes the namespace prefix from a tool name returned by the model.
pub fn strip_namespace<'a>(name: &'a str, namespace: &str) -> &'a str {
    name.strip_prefix(namespace).unwrap_or(name)
}
