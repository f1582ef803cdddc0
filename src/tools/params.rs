//! Argument key normalization for tool calls.
//!
//! Assistants and tool servers disagree on `camelCase` vs `snake_case`
//! argument names. Keys are rewritten to the tool schema's spelling in two
//! steps, and nothing else about the value is touched:
//!
//! 1. An explicit table of known pairs.
//! 2. A fallback that case-converts a key only when the converted name is a
//!    schema property and the original is not.
//!
//! Keys the schema already declares, and keys with no match, pass through.

use crate::tools::ToolDescriptor;
use serde_json::{Map, Value};
use tracing::debug;

/// Known `(camelCase, snake_case)` spellings seen from assistants and MQTT tools.
const KNOWN_PAIRS: &[(&str, &str)] = &[
    ("deviceId", "device_id"),
    ("deviceName", "device_name"),
    ("entityId", "entity_id"),
    ("topicFilter", "topic_filter"),
    ("messageCount", "message_count"),
    ("timeoutSeconds", "timeout_seconds"),
    ("brightnessPct", "brightness_pct"),
    ("colorTemp", "color_temp"),
    ("qosLevel", "qos"),
];

/// Rewrite the keys of an arguments object to the names `tool` declares.
///
/// Non-object arguments are returned unchanged.
pub fn normalize_arguments(tool: &ToolDescriptor, arguments: Value) -> Value {
    let Value::Object(map) = arguments else {
        return arguments;
    };

    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let name = resolve_key(tool, &key);
        if name != key {
            debug!("tool {}: argument '{key}' mapped to '{name}'", tool.name);
        }
        out.insert(name, value);
    }
    Value::Object(out)
}

fn resolve_key(tool: &ToolDescriptor, key: &str) -> String {
    if tool.has_property(key) {
        return key.to_owned();
    }

    let from_table = KNOWN_PAIRS.iter().find_map(|&(camel, snake)| {
        if key == camel {
            Some(snake)
        } else if key == snake {
            Some(camel)
        } else {
            None
        }
    });
    if let Some(mapped) = from_table.filter(|m| tool.has_property(m)) {
        return mapped.to_owned();
    }

    [to_snake_case(key), to_camel_case(key)]
        .into_iter()
        .find(|candidate| candidate != key && tool.has_property(candidate))
        .unwrap_or_else(|| key.to_owned())
}

/// `deviceId` → `device_id`.
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `device_id` → `deviceId`.
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
