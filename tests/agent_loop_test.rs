//! End-to-end agent loop scenarios against a scripted provider.
//!
//! These tests drive full turns through the real executor, policy engine
//! and audit journal; only the LLM is a double.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tamalebot::agent::Agent;
use tamalebot::audit::{AuditDecision, AuditLog, AuditQuery};
use tamalebot::policy::{PolicyConfig, PolicyEngine};
use tamalebot::provider::{LlmProvider, LlmResponse, ToolCall, ToolSchema};
use tamalebot::tools::ToolExecutor;
use tamalebot::types::{Message, MessageRole};
use tempfile::TempDir;

/// Replays a script of responses; repeats the last one if the loop asks for
/// more.
struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    repeat_last: Option<LlmResponse>,
}

impl ScriptedProvider {
    fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            repeat_last: None,
        }
    }

    fn repeating(response: LlmResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            repeat_last: Some(response),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn send(
        &self,
        _history: &[Message],
        _tools: &[ToolSchema],
    ) -> tamalebot::Result<LlmResponse> {
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return Ok(next);
        }
        Ok(self.repeat_last.clone().unwrap_or_default())
    }
}

struct Harness {
    agent: Agent,
    audit: Arc<AuditLog>,
    _tmp: TempDir,
}

fn harness(provider: ScriptedProvider, policy: PolicyConfig) -> Harness {
    let tmp = TempDir::new().unwrap();
    let audit = Arc::new(AuditLog::new(tmp.path().join("audit")).unwrap());
    let engine = Arc::new(PolicyEngine::new(policy));
    let executor = Arc::new(
        ToolExecutor::new("e2e-agent", tmp.path().to_path_buf(), engine, audit.clone()).unwrap(),
    );
    Harness {
        agent: Agent::new(Box::new(provider), executor),
        audit,
        _tmp: tmp,
    }
}

fn tool_call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input,
    }
}

#[tokio::test]
async fn safe_turn() {
    let h = harness(
        ScriptedProvider::new(vec![LlmResponse {
            text: "Hello! How can I help?".to_string(),
            ..Default::default()
        }]),
        PolicyConfig::default(),
    );

    let mut history = Vec::new();
    let result = h.agent.run_turn("Hi there", &mut history).await.unwrap();

    assert_eq!(result.text, "Hello! How can I help?");
    assert_eq!(result.tool_call_count, 0);
    assert_eq!(result.iterations, 1);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[0].content.text(), "Hi there");
    assert_eq!(history[1].role, MessageRole::Assistant);
}

#[tokio::test]
async fn tool_roundtrip() {
    let h = harness(
        ScriptedProvider::new(vec![
            LlmResponse {
                text: "Let me check that for you.".to_string(),
                tool_calls: vec![tool_call("tool_1", "shell", json!({"command": "echo hello"}))],
                ..Default::default()
            },
            LlmResponse {
                text: "The command output was: hello".to_string(),
                ..Default::default()
            },
        ]),
        PolicyConfig::default(),
    );

    let mut history = Vec::new();
    let result = h.agent.run_turn("What does echo say?", &mut history).await.unwrap();

    assert_eq!(result.text, "The command output was: hello");
    assert_eq!(result.tool_call_count, 1);
    assert_eq!(result.iterations, 2);

    // The tool actually ran: its result block carries the echo output.
    let results = history[2].content.tool_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, "hello");
    assert!(!results[0].is_error);
}

#[tokio::test]
async fn denial_surfaces_as_error_result_and_audit_entry() {
    let h = harness(
        ScriptedProvider::new(vec![
            LlmResponse {
                tool_calls: vec![tool_call("tool_1", "shell", json!({"command": "rm -rf /"}))],
                ..Default::default()
            },
            LlmResponse {
                text: "Understood, I won't do that.".to_string(),
                ..Default::default()
            },
        ]),
        PolicyConfig::standard(),
    );

    let mut history = Vec::new();
    let result = h.agent.run_turn("wipe the disk", &mut history).await.unwrap();
    assert_eq!(result.text, "Understood, I won't do that.");

    let results = history[2].content.tool_results();
    assert!(results[0].is_error);
    assert!(results[0].content.starts_with("BLOCKED by security policy:"));

    let blocked = h
        .audit
        .entries(&AuditQuery {
            decision: Some(AuditDecision::Blocked),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].action_type, "command");
    assert_eq!(blocked[0].target, "rm -rf /");
}

#[tokio::test]
async fn iteration_cap_terminates_loop() {
    let h = harness(
        ScriptedProvider::repeating(LlmResponse {
            tool_calls: vec![tool_call("tool_n", "shell", json!({"command": "true"}))],
            ..Default::default()
        }),
        PolicyConfig::default(),
    );
    let agent = h.agent.with_max_iterations(3);

    let mut history = Vec::new();
    let result = agent.run_turn("never stop", &mut history).await.unwrap();

    assert_eq!(result.iterations, 3);
    assert_eq!(result.tool_call_count, 3);
}

#[tokio::test]
async fn history_invariants_hold_across_a_long_turn() {
    let h = harness(
        ScriptedProvider::new(vec![
            LlmResponse {
                text: "step one".to_string(),
                tool_calls: vec![
                    tool_call("a", "shell", json!({"command": "echo 1"})),
                    tool_call("b", "shell", json!({"command": "echo 2"})),
                ],
                ..Default::default()
            },
            LlmResponse {
                tool_calls: vec![tool_call("c", "shell", json!({"command": "echo 3"}))],
                ..Default::default()
            },
            LlmResponse {
                text: "done".to_string(),
                ..Default::default()
            },
        ]),
        PolicyConfig::default(),
    );

    let mut history = Vec::new();
    let result = h.agent.run_turn("go", &mut history).await.unwrap();
    assert_eq!(result.iterations, 3);
    assert_eq!(result.tool_call_count, 3);

    // First message is user; roles and pairing line up throughout.
    assert_eq!(history[0].role, MessageRole::User);
    let mut assistant_count = 0;
    let mut user_count = 0;
    let mut tool_use_messages = 0;
    for (i, message) in history.iter().enumerate() {
        match message.role {
            MessageRole::Assistant => {
                assistant_count += 1;
                let uses = message.content.tool_uses();
                if !uses.is_empty() {
                    tool_use_messages += 1;
                    // Every tool use pairs with a result in the next message.
                    let next = &history[i + 1];
                    assert_eq!(next.role, MessageRole::User);
                    let results = next.content.tool_results();
                    assert_eq!(uses.len(), results.len());
                    for (u, r) in uses.iter().zip(results) {
                        assert_eq!(u.id, r.tool_use_id);
                    }
                }
            }
            MessageRole::User => user_count += 1,
        }
    }
    // One appended user message per tool batch, plus the original prompt.
    assert_eq!(user_count, 1 + tool_use_messages);
    assert_eq!(assistant_count, result.iterations as usize);
}

#[tokio::test]
async fn provider_failure_is_fatal_to_the_turn() {
    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn send(
            &self,
            _history: &[Message],
            _tools: &[ToolSchema],
        ) -> tamalebot::Result<LlmResponse> {
            Err(tamalebot::Error::provider("API error 401: bad key"))
        }
    }

    let tmp = TempDir::new().unwrap();
    let audit = Arc::new(AuditLog::new(tmp.path().join("audit")).unwrap());
    let engine = Arc::new(PolicyEngine::new(PolicyConfig::default()));
    let executor =
        Arc::new(ToolExecutor::new("e2e", tmp.path().to_path_buf(), engine, audit).unwrap());
    let agent = Agent::new(Box::new(FailingProvider), executor);

    let mut history = Vec::new();
    let result = agent.run_turn("hello", &mut history).await;
    assert!(result.is_err());
}
