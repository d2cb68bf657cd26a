//! Orchestrator integration tests
//!
//! Exercises the full handle() cycle against a scripted LLM and a recording
//! executor: happy-path action execution, refusals, degraded replies,
//! clarifications, the confirmation flow, at-most-once execution, and the
//! busy signal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use neko_engine::audit::{AuditSink, MemoryAuditSink};
use neko_engine::config::Config;
use neko_engine::executor::{ActionExecutor, ExecutionResult};
use neko_engine::llm::{LLMClient, LLMError};
use neko_engine::memory::{ConversationMemory, Role, Turn};
use neko_engine::orchestrator::{Orchestrator, OrchestratorSettings, OutcomeKind};
use neko_engine::parser::{ActionRequest, ResponseParser};
use neko_engine::policy::{PermissionPolicy, TrustContext};

/// LLM double that replays a scripted sequence of responses
struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, LLMError>>>,
}

impl ScriptedLlm {
    fn new(script: Vec<Result<String, LLMError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _turns: &[Turn]) -> Result<String, LLMError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok("I'm out of script.".to_string()))
    }
}

/// LLM double that never answers within any reasonable timeout
struct StalledLlm;

#[async_trait]
impl LLMClient for StalledLlm {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _turns: &[Turn]) -> Result<String, LLMError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

/// Executor double that records every invocation
struct RecordingExecutor {
    calls: AtomicUsize,
    names: Mutex<Vec<String>>,
    result: ExecutionResult,
}

impl RecordingExecutor {
    fn succeeding(output: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            names: Mutex::new(Vec::new()),
            result: ExecutionResult::ok(output),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn executed_names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn run(&self, request: &ActionRequest) -> ExecutionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.names.lock().unwrap().push(request.name.clone());
        self.result.clone()
    }
}

fn settings() -> OrchestratorSettings {
    let config = Config::default();
    OrchestratorSettings {
        llm_timeout: Duration::from_millis(200),
        execution_timeout: Duration::from_secs(5),
        degraded_reply: config.llm.degraded_reply.clone(),
        trust: TrustContext::local(),
    }
}

fn session(
    llm: Arc<dyn LLMClient>,
    executor: Arc<RecordingExecutor>,
) -> (Orchestrator, Arc<MemoryAuditSink>) {
    let config = Config::default();
    let sink = Arc::new(MemoryAuditSink::new());
    let policy = PermissionPolicy::new(
        config.policy_rules(),
        Arc::clone(&sink) as Arc<dyn AuditSink>,
    );
    let memory = ConversationMemory::with_preamble(20, "You are Neko").unwrap();
    let orchestrator = Orchestrator::new(
        memory,
        llm,
        ResponseParser::default(),
        policy,
        executor,
        settings(),
    );
    (orchestrator, sink)
}

#[tokio::test]
async fn test_open_youtube_happy_path() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok(
        r#"{"action": "open_url", "args": {"url": "https://youtube.com"}}"#.to_string(),
    )]));
    let executor = RecordingExecutor::succeeding("Opening YouTube in your browser!");
    let (session, sink) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("open youtube").await;

    assert_eq!(outcome.kind, OutcomeKind::ActionReport);
    assert_eq!(outcome.text, "Opening YouTube in your browser!");
    assert_eq!(executor.call_count(), 1);
    assert_eq!(executor.executed_names(), vec!["open_url".to_string()]);

    // Final reply is appended to memory as an assistant turn
    let history = session.history().await;
    let last = history.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "Opening YouTube in your browser!");

    // The evaluation left an audit record
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, "open_url");
}

#[tokio::test]
async fn test_delete_everything_is_refused() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok(
        r#"{"action": "delete_path", "args": {"path": "/"}}"#.to_string(),
    )]));
    let executor = RecordingExecutor::succeeding("should never run");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("delete all my files").await;

    assert_eq!(outcome.kind, OutcomeKind::Refusal);
    assert!(outcome.text.contains("sandbox"));
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_llm_failure_degrades() {
    let llm = Arc::new(ScriptedLlm::new(vec![Err(LLMError::RateLimited)]));
    let executor = RecordingExecutor::succeeding("unused");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("hello").await;

    assert_eq!(outcome.kind, OutcomeKind::Degraded);
    assert_eq!(outcome.text, Config::default().llm.degraded_reply);
    assert_eq!(executor.call_count(), 0);

    // Only the user turn and the degraded reply were appended
    let history = session.history().await;
    assert_eq!(history.len(), 3); // preamble + user + degraded reply
    assert_eq!(history[2].role, Role::Assistant);
}

#[tokio::test]
async fn test_llm_timeout_degrades() {
    let executor = RecordingExecutor::succeeding("unused");
    let (session, _) = self::session(Arc::new(StalledLlm), Arc::clone(&executor));

    let outcome = session.handle("hello").await;

    assert_eq!(outcome.kind, OutcomeKind::Degraded);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_directive_asks_for_clarification() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok(
        r#"{"action": "open_url", "args": {}}"#.to_string(),
    )]));
    let executor = RecordingExecutor::succeeding("should never run");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("open that thing").await;

    assert_eq!(outcome.kind, OutcomeKind::Clarification);
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_plain_reply_passes_through() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok(
        "Paris is the capital of France.".to_string(),
    )]));
    let executor = RecordingExecutor::succeeding("unused");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("capital of france?").await;

    assert_eq!(outcome.kind, OutcomeKind::Reply);
    assert_eq!(outcome.text, "Paris is the capital of France.");
}

#[tokio::test]
async fn test_confirmation_flow_yes_executes_once() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok(r#"{"action": "delete_path", "args": {"path": "notes/old.txt"}}"#.to_string()),
        Ok("Anything else?".to_string()),
    ]));
    let executor = RecordingExecutor::succeeding("Deleted notes/old.txt");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("delete my old notes").await;
    assert_eq!(outcome.kind, OutcomeKind::ConfirmationPrompt);
    assert!(session.awaiting_confirmation().await);
    assert_eq!(executor.call_count(), 0);

    let outcome = session.handle("yes").await;
    assert_eq!(outcome.kind, OutcomeKind::ActionReport);
    assert_eq!(executor.call_count(), 1);
    assert!(!session.awaiting_confirmation().await);

    // A second yes has nothing left to execute: it goes to the model
    let outcome = session.handle("yes").await;
    assert_eq!(outcome.kind, OutcomeKind::Reply);
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_confirmation_flow_no_cancels() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok(
        r#"{"action": "run_command", "args": {"command": "ls"}}"#.to_string(),
    )]));
    let executor = RecordingExecutor::succeeding("should never run");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    let outcome = session.handle("list my files").await;
    assert_eq!(outcome.kind, OutcomeKind::ConfirmationPrompt);

    let outcome = session.handle("no").await;
    assert_eq!(outcome.kind, OutcomeKind::Reply);
    assert_eq!(executor.call_count(), 0);
    assert!(!session.awaiting_confirmation().await);
}

#[tokio::test]
async fn test_unrelated_followup_drops_pending_action() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok(r#"{"action": "run_command", "args": {"command": "ls"}}"#.to_string()),
        Ok("It's 3pm.".to_string()),
    ]));
    let executor = RecordingExecutor::succeeding("should never run");
    let (session, _) = self::session(llm, Arc::clone(&executor));

    session.handle("list my files").await;
    assert!(session.awaiting_confirmation().await);

    // Not a yes, not a no: the pending action is dropped, never executed
    let outcome = session.handle("what time is it").await;
    assert_eq!(outcome.kind, OutcomeKind::Reply);
    assert_eq!(executor.call_count(), 0);
    assert!(!session.awaiting_confirmation().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_try_handle_rejects_while_busy() {
    let executor = RecordingExecutor::succeeding("unused");
    let (session, _) = self::session(Arc::new(StalledLlm), executor);
    let session = Arc::new(session);

    let in_flight = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.handle("slow one").await })
    };

    // Give the in-flight call time to take the session lock
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = session.try_handle("impatient follow-up").await;
    assert!(matches!(
        result,
        Err(neko_engine::errors::AssistantError::Busy)
    ));

    // The stalled call eventually degrades rather than crashing
    let outcome = in_flight.await.unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Degraded);
}

#[tokio::test]
async fn test_queued_handles_run_in_order() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok("first answer".to_string()),
        Ok("second answer".to_string()),
    ]));
    let executor = RecordingExecutor::succeeding("unused");
    let (session, _) = self::session(llm, executor);
    let session = Arc::new(session);

    let first = session.handle("first").await;
    let second = session.handle("second").await;

    assert_eq!(first.text, "first answer");
    assert_eq!(second.text, "second answer");

    let history = session.history().await;
    let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
    let first_pos = contents.iter().position(|c| *c == "first").unwrap();
    let second_pos = contents.iter().position(|c| *c == "second").unwrap();
    assert!(first_pos < second_pos);
}
