//! Property-based tests for the chat-completions translation layer
//!
//! - Message translation keeps role, text and tool linkage
//! - Tool call arguments survive serialization to the wire string
//! - Response normalization drops unnamed tool calls and never fails on
//!   malformed argument JSON

#![allow(clippy::redundant_closure)]

use super::openai::{translate_message, OpenAIResponse, OpenAIService};
use super::types::{Message, Role, ToolCall};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.!?,]{1,80}"
}

fn arb_json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z ]{0,20}".prop_map(Value::String),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop::collection::hash_map("[a-z]{1,8}", inner, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    })
}

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    ("call_[a-z0-9]{5,12}", "[a-z_]{3,16}", arb_json_value())
        .prop_map(|(id, name, args)| ToolCall::new(id, name, args))
}

fn arb_plain_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        arb_text().prop_map(|t| Message::system(t)),
        arb_text().prop_map(|t| Message::user(t)),
        arb_text().prop_map(|t| Message::assistant(t)),
        ("call_[a-z0-9]{5,12}", arb_text()).prop_map(|(id, text)| Message::tool_result(id, text)),
    ]
}

fn wire_tool_call(id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "id": id,
        "type": "function",
        "function": {"name": name, "arguments": arguments}
    })
}

fn response_with(tool_calls: Vec<Value>) -> OpenAIResponse {
    serde_json::from_value(json!({
        "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": tool_calls}}]
    }))
    .unwrap()
}

// ============================================================================
// Request translation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_translate_preserves_role_and_text(msg in arb_plain_message()) {
        let wire = serde_json::to_value(translate_message(&msg)).unwrap();
        prop_assert_eq!(wire["role"].as_str(), Some(msg.role.as_str()));
        prop_assert_eq!(wire["content"].as_str(), Some(msg.content.as_str()));
        prop_assert_eq!(wire["tool_call_id"].as_str(), msg.tool_call_id.as_deref());
    }

    #[test]
    fn prop_tool_arguments_roundtrip(calls in prop::collection::vec(arb_tool_call(), 1..4)) {
        let msg = Message::assistant_with_tools("", calls.clone());
        let wire = serde_json::to_value(translate_message(&msg)).unwrap();

        prop_assert!(wire["content"].is_null());
        let wire_calls = wire["tool_calls"].as_array().unwrap();
        prop_assert_eq!(wire_calls.len(), calls.len());
        for (wire_call, call) in wire_calls.iter().zip(&calls) {
            prop_assert_eq!(wire_call["id"].as_str(), Some(call.id.as_str()));
            let args: Value =
                serde_json::from_str(wire_call["function"]["arguments"].as_str().unwrap()).unwrap();
            prop_assert_eq!(&args, &call.arguments);
        }
    }
}

// ============================================================================
// Response normalization
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_normalize_keeps_only_named_calls(
        named in prop::collection::vec("[a-z_]{3,12}", 0..4),
        unnamed in 0usize..3,
    ) {
        let mut calls: Vec<Value> = named
            .iter()
            .enumerate()
            .map(|(i, name)| wire_tool_call(&format!("c{i}"), name, "{}"))
            .collect();
        calls.extend((0..unnamed).map(|i| wire_tool_call(&format!("x{i}"), "", "{}")));

        let response = OpenAIService::normalize_response(response_with(calls)).unwrap();
        prop_assert_eq!(response.message.role, Role::Assistant);
        let names: Vec<_> = response.message.tool_calls.iter().map(|c| c.name.clone()).collect();
        prop_assert_eq!(names, named);
    }

    #[test]
    fn prop_normalize_tolerates_malformed_arguments(garbage in "[{a-z:,]{1,20}") {
        prop_assume!(serde_json::from_str::<Value>(&garbage).is_err());
        let response = OpenAIService::normalize_response(response_with(vec![
            wire_tool_call("c1", "search", &garbage),
        ]))
        .unwrap();
        prop_assert_eq!(&response.message.tool_calls[0].arguments, &json!({}));
    }
}

#[test]
fn test_normalize_rejects_empty_choices() {
    let empty: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
    assert!(OpenAIService::normalize_response(empty).is_err());
}
