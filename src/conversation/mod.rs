//! 会话归一化：把异构的消息/工具调用形态转换为统一的会话条目序列。
//!
//! Conversation normalization.
//!
//! Converts heterogeneous message and tool-call shapes (plain strings, chat
//! messages, tool calls/outputs, content-part arrays) into one canonical
//! sequence of [`NormalizedEntry`] values. Consumed by the LLM check runner
//! and the prompt-injection check.
//!
//! Entries are always derived fresh from the raw input and never mutated in
//! place; merge helpers copy the base sequence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical conversation unit. Only populated fields serialize, keeping
/// payloads sent to the analysis model compact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl NormalizedEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Some("user".into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Some("assistant".into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Tool calls and tool outputs, as opposed to plain user/assistant text.
    pub fn is_actionable(&self) -> bool {
        if self.role.as_deref() == Some("tool") {
            return true;
        }
        matches!(
            self.entry_type.as_deref(),
            Some("function_call") | Some("function_call_output") | Some("tool_call")
                | Some("tool_result")
        )
    }

    pub fn is_user(&self) -> bool {
        self.role.as_deref() == Some("user")
    }
}

/// Content-part types that contribute text when flattening Responses-style
/// content arrays. Anything else is dropped silently.
const TEXT_PART_TYPES: [&str; 4] = ["input_text", "text", "output_text", "summary_text"];

/// Well-known container keys searched (in order) for a conversation array.
const CONTAINER_KEYS: [&str; 9] = [
    "messages",
    "conversation",
    "conversation_history",
    "conversationHistory",
    "recent_messages",
    "recentMessages",
    "turns",
    "output",
    "outputs",
];

/// Normalize arbitrary conversation input into canonical entries.
///
/// Accepts a plain string (single user entry), an array of mixed items, or a
/// single message-like object. Normalizing already-normalized entries is
/// stable: role/content/type/call_id survive a round trip unchanged.
pub fn normalize_conversation(input: &Value) -> Vec<NormalizedEntry> {
    match input {
        Value::String(s) => vec![NormalizedEntry::user(s.clone())],
        Value::Array(items) => items.iter().flat_map(normalize_item).collect(),
        Value::Object(_) => normalize_item(input),
        _ => Vec::new(),
    }
}

/// Normalize one raw item. A message carrying attached `tool_calls` expands
/// into [message entry, one function_call entry per call], which is why this
/// returns a vector and the caller flat-maps.
fn normalize_item(item: &Value) -> Vec<NormalizedEntry> {
    if let Value::String(s) = item {
        return vec![NormalizedEntry::user(s.clone())];
    }
    let Value::Object(obj) = item else {
        return Vec::new();
    };

    let item_type = obj.get("type").and_then(Value::as_str);
    match item_type {
        Some("function_call") | Some("tool_call") => {
            return vec![normalize_function_call(item)];
        }
        Some("function_call_output") => {
            return vec![NormalizedEntry {
                entry_type: Some("function_call_output".into()),
                tool_name: str_field(item, &["tool_name", "name"]),
                arguments: stringified_field(item, &["arguments"]),
                output: stringified_field(item, &["output"]),
                call_id: str_field(item, &["call_id", "id"]),
                ..Default::default()
            }];
        }
        _ => {}
    }

    let mut entries = vec![NormalizedEntry {
        role: str_field(item, &["role"]),
        content: obj.get("content").and_then(extract_text),
        entry_type: item_type.map(String::from),
        call_id: str_field(item, &["call_id"]),
        ..Default::default()
    }];

    // Assistant messages with attached calls additionally emit each call as
    // its own function_call entry after the message entry.
    if let Some(calls) = obj.get("tool_calls").and_then(Value::as_array) {
        entries.extend(calls.iter().map(normalize_function_call));
    }

    entries
}

fn normalize_function_call(item: &Value) -> NormalizedEntry {
    // Name and arguments may live at top level or under a nested `function`
    // sub-object (chat-completions shape).
    let function = item.get("function");
    let tool_name = str_field(item, &["tool_name", "name"])
        .or_else(|| function.and_then(|f| str_field(f, &["name"])));
    let arguments = stringified_field(item, &["arguments"])
        .or_else(|| function.and_then(|f| stringified_field(f, &["arguments"])));

    NormalizedEntry {
        entry_type: Some("function_call".into()),
        tool_name,
        arguments,
        call_id: str_field(item, &["call_id", "id"]),
        ..Default::default()
    }
}

/// Recursively extract text from a content value.
///
/// Strings pass through. Content-part arrays contribute only parts whose
/// `type` is a recognized text type; contributing parts are joined with a
/// single space and trimmed.
pub fn extract_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let texts: Vec<String> = parts
                .iter()
                .filter_map(|part| {
                    let part_type = part.get("type").and_then(Value::as_str)?;
                    if !TEXT_PART_TYPES.contains(&part_type) {
                        return None;
                    }
                    part.get("text")
                        .or_else(|| part.get("content"))
                        .and_then(extract_text)
                })
                .filter(|t| !t.is_empty())
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join(" ").trim().to_string())
            }
        }
        Value::Object(obj) => obj.get("text").and_then(extract_text),
        _ => None,
    }
}

/// Parse an arbitrary raw payload as a possible conversation.
///
/// JSON arrays normalize directly; objects are searched through the
/// well-known container keys (recursively, in priority order) for an array;
/// a non-JSON-parseable string becomes a single user message. Returns an
/// empty vector when nothing recognizable is found.
pub fn parse_conversation_input(raw: &str) -> Vec<NormalizedEntry> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => parse_conversation_value(&value),
        Err(_) => vec![NormalizedEntry::user(trimmed)],
    }
}

/// Object/array form of [`parse_conversation_input`].
pub fn parse_conversation_value(value: &Value) -> Vec<NormalizedEntry> {
    match value {
        Value::Array(_) => normalize_conversation(value),
        Value::String(s) if !s.trim().is_empty() => vec![NormalizedEntry::user(s.trim())],
        Value::Object(_) => find_conversation_array(value)
            .map(normalize_conversation)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn find_conversation_array(value: &Value) -> Option<&Value> {
    let obj = value.as_object()?;
    for key in CONTAINER_KEYS {
        if let Some(candidate) = obj.get(key) {
            if candidate.is_array() {
                return Some(candidate);
            }
        }
    }
    for key in CONTAINER_KEYS {
        if let Some(nested) = obj.get(key) {
            if nested.is_object() {
                if let Some(found) = find_conversation_array(nested) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// Extend a cached conversation with newly observed raw items. Append-only;
/// the base slice is copied, never mutated.
pub fn merge_conversation_with_items(
    base: &[NormalizedEntry],
    items: &Value,
) -> Vec<NormalizedEntry> {
    let mut merged = base.to_vec();
    merged.extend(normalize_conversation(items));
    merged
}

/// Append the assistant's turn extracted from an LLM response. Understands
/// chat-completion-shaped responses (`choices[0].message`) and output-array
/// shapes (`output: [...]`), falling back to a bare `output_text` field.
pub fn append_assistant_response(
    base: &[NormalizedEntry],
    response: &Value,
) -> Vec<NormalizedEntry> {
    let mut merged = base.to_vec();

    if let Some(message) = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
    {
        let mut entries = normalize_item(message);
        for entry in &mut entries {
            if entry.role.is_none() && entry.entry_type.is_none() {
                entry.role = Some("assistant".into());
            }
        }
        merged.extend(entries);
        return merged;
    }

    if let Some(output) = response.get("output").filter(|o| o.is_array()) {
        merged.extend(normalize_conversation(output));
        return merged;
    }

    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.is_empty() {
            merged.push(NormalizedEntry::assistant(text));
        }
    }
    merged
}

fn str_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| item.get(*k).and_then(Value::as_str))
        .map(String::from)
}

/// Stringify a field: strings pass through, other JSON values are serialized.
fn stringified_field(item: &Value, keys: &[&str]) -> Option<String> {
    let value = keys.iter().find_map(|k| item.get(*k))?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => serde_json::to_string(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_becomes_single_user_entry() {
        let entries = normalize_conversation(&json!("hello"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role.as_deref(), Some("user"));
        assert_eq!(entries[0].content.as_deref(), Some("hello"));
    }

    #[test]
    fn function_call_pulls_from_nested_function() {
        let entries = normalize_conversation(&json!([{
            "type": "tool_call",
            "id": "call_1",
            "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
        }]));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type.as_deref(), Some("function_call"));
        assert_eq!(entries[0].tool_name.as_deref(), Some("get_weather"));
        assert_eq!(entries[0].arguments.as_deref(), Some("{\"city\":\"Paris\"}"));
        assert_eq!(entries[0].call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn function_call_output_stringifies_structured_output() {
        let entries = normalize_conversation(&json!([{
            "type": "function_call_output",
            "call_id": "call_2",
            "output": {"ok": true}
        }]));
        assert_eq!(entries[0].output.as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn message_with_tool_calls_expands() {
        let entries = normalize_conversation(&json!([{
            "role": "assistant",
            "content": "Looking that up.",
            "tool_calls": [
                {"id": "a", "function": {"name": "search", "arguments": "{}"}},
                {"id": "b", "function": {"name": "fetch", "arguments": "{}"}}
            ]
        }]));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].role.as_deref(), Some("assistant"));
        assert_eq!(entries[1].entry_type.as_deref(), Some("function_call"));
        assert_eq!(entries[1].tool_name.as_deref(), Some("search"));
        assert_eq!(entries[2].call_id.as_deref(), Some("b"));
    }

    #[test]
    fn content_parts_flatten_and_drop_non_text() {
        let entries = normalize_conversation(&json!([{
            "role": "user",
            "content": [
                {"type": "input_text", "text": "first"},
                {"type": "input_image", "image_url": "http://x/y.png"},
                {"type": "text", "text": "second"}
            ]
        }]));
        assert_eq!(entries[0].content.as_deref(), Some("first second"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!([
            {"role": "user", "content": "hi"},
            {"type": "function_call", "name": "t", "arguments": "{}", "call_id": "c1"},
            {"role": "assistant", "content": "done"}
        ]);
        let once = normalize_conversation(&raw);
        let twice = normalize_conversation(&serde_json::to_value(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_finds_nested_container_keys() {
        let entries =
            parse_conversation_input(r#"{"payload": 1, "conversation": [{"role":"user","content":"q"}]}"#);
        assert_eq!(entries.len(), 1);
        let nested = parse_conversation_input(
            r#"{"output": {"messages": [{"role":"user","content":"deep"}]}}"#,
        );
        assert_eq!(nested[0].content.as_deref(), Some("deep"));
    }

    #[test]
    fn parse_wraps_non_json_string() {
        let entries = parse_conversation_input("just some text");
        assert_eq!(entries[0].role.as_deref(), Some("user"));
        assert_eq!(entries[0].content.as_deref(), Some("just some text"));
    }

    #[test]
    fn parse_returns_empty_when_unrecognizable() {
        assert!(parse_conversation_input("{\"foo\": 1}").is_empty());
        assert!(parse_conversation_input("").is_empty());
    }

    #[test]
    fn merge_copies_base() {
        let base = vec![NormalizedEntry::user("a")];
        let merged = merge_conversation_with_items(&base, &json!([{"role":"assistant","content":"b"}]));
        assert_eq!(base.len(), 1);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn append_assistant_from_chat_completion() {
        let base = vec![NormalizedEntry::user("q")];
        let merged = append_assistant_response(
            &base,
            &json!({"choices": [{"message": {"role": "assistant", "content": "a"}}]}),
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].role.as_deref(), Some("assistant"));
        assert_eq!(merged[1].content.as_deref(), Some("a"));
    }

    #[test]
    fn append_assistant_from_output_text() {
        let merged = append_assistant_response(&[], &json!({"output_text": "plain"}));
        assert_eq!(merged[0].content.as_deref(), Some("plain"));
    }
}
