//! Property-based tests for the turn graph
//!
//! These tests verify key invariants hold across all possible inputs.

use super::transition::*;
use super::*;
use crate::llm::{Message, ToolCall};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("github".to_string()),
        Just("slack".to_string()),
        Just("search".to_string()),
        Just("calendar".to_string()),
    ]
}

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    ("[a-z]{8}", arb_tool_name()).prop_map(|(id, name)| ToolCall::new(id, name, json!({})))
}

fn arb_assistant_message() -> impl Strategy<Value = Message> {
    (
        "[a-zA-Z ]{0,30}",
        proptest::collection::vec(arb_tool_call(), 0..4),
    )
        .prop_map(|(text, calls)| Message::assistant_with_tools(text, calls))
}

fn arb_pending() -> impl Strategy<Value = PendingAuthorization> {
    (arb_tool_name(), proptest::option::of("https://auth\\.example/[a-z]{4}")).prop_map(
        |(tool, url)| PendingAuthorization::new(tool, url),
    )
}

fn arb_state() -> impl Strategy<Value = ConversationState> {
    (
        proptest::collection::vec("[a-zA-Z ]{1,20}", 1..4),
        proptest::option::of("[a-zA-Z ]{1,30}"),
    )
        .prop_map(|(texts, pending)| {
            let mut state =
                ConversationState::new(texts.into_iter().map(Message::user).collect());
            state.pending_auth_message = pending;
            state
        })
}

fn arb_node() -> impl Strategy<Value = Node> {
    prop_oneof![
        Just(Node::Agent),
        Just(Node::CheckAuth),
        Just(Node::AuthInterrupt),
        Just(Node::Tools),
        Just(Node::Done),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        (
            arb_assistant_message(),
            proptest::collection::vec(arb_tool_name(), 0..3)
        )
            .prop_map(|(message, auth_gated)| Event::ModelResponded {
                message,
                auth_gated
            }),
        proptest::collection::vec(arb_pending(), 0..4)
            .prop_map(|pending| Event::AuthChecked { pending }),
        Just(Event::GateReached),
        Just(Event::Resume {
            signal: ResumeSignal::post_auth()
        }),
        proptest::collection::vec("[a-z]{4}", 0..3).prop_map(|ids| Event::ToolsExecuted {
            results: ids
                .into_iter()
                .map(|id| Message::tool_result(id, "ok"))
                .collect()
        }),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // A resume signal never survives a transition
    #[test]
    fn prop_resume_signal_never_persists(
        node in arb_node(),
        state in arb_state(),
        event in arb_event()
    ) {
        if let Ok(result) = transition(node, &state, event) {
            prop_assert!(result.new_state.resume_signal.is_none());
        }
    }

    // Resuming at the gate always clears the pending message and proceeds
    #[test]
    fn prop_resume_always_opens_gate(state in arb_state()) {
        let result = transition(
            Node::AuthInterrupt,
            &state,
            Event::Resume { signal: ResumeSignal::post_auth() },
        ).unwrap();
        prop_assert_eq!(result.next, Next::Goto(Node::Tools));
        prop_assert!(result.new_state.pending_auth_message.is_none());
    }

    // Routing depends only on tool calls and gating
    #[test]
    fn prop_route_matches_calls(
        message in arb_assistant_message(),
        gated in proptest::collection::vec(arb_tool_name(), 0..3)
    ) {
        let node = route(&message, &gated);
        match (message.has_tool_calls(), gated.is_empty()) {
            (false, _) => prop_assert_eq!(node, Node::Done),
            (true, true) => prop_assert_eq!(node, Node::Tools),
            (true, false) => prop_assert_eq!(node, Node::CheckAuth),
        }
    }

    // Messages are only ever appended, never rewritten
    #[test]
    fn prop_history_is_append_only(
        node in arb_node(),
        state in arb_state(),
        event in arb_event()
    ) {
        if let Ok(result) = transition(node, &state, event) {
            let before = &state.messages;
            let after = &result.new_state.messages;
            prop_assert!(after.len() >= before.len());
            prop_assert_eq!(&after[..before.len()], &before[..]);
        }
    }

    // Suspension only happens at the gate and only with a message to show
    #[test]
    fn prop_suspend_only_at_gate(
        node in arb_node(),
        state in arb_state(),
        event in arb_event()
    ) {
        if let Ok(result) = transition(node, &state, event) {
            if let Next::Suspend { message } = result.next {
                prop_assert_eq!(node, Node::AuthInterrupt);
                prop_assert_eq!(result.new_state.pending_auth_message, Some(message));
            }
        }
    }

    // Every pending tool is named exactly once in the auth message
    #[test]
    fn prop_auth_message_names_each_tool_once(
        pending in proptest::collection::vec(arb_pending(), 2..6)
    ) {
        let message = format_auth_message(&pending);
        let mut names: Vec<&str> = pending.iter().map(|p| p.tool_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() > 1 {
            for name in names {
                let needle = format!(". {name}:");
                prop_assert_eq!(message.matches(needle.as_str()).count(), 1);
            }
        }
    }

    // Nothing leaves the terminal node
    #[test]
    fn prop_done_is_terminal(state in arb_state(), event in arb_event()) {
        prop_assert!(transition(Node::Done, &state, event).is_err());
    }
}
