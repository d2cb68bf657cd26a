//! Request/response orchestration
//!
//! This module implements the per-session cycle that turns one user
//! utterance into one user-facing reply:
//!
//! 1. Append the utterance to conversation memory and snapshot it
//! 2. Call the LLM (bounded by the configured timeout)
//! 3. Parse the raw text into a reply or an action request
//! 4. If an action: evaluate it against the permission policy
//! 5. Execute, ask for confirmation, or refuse
//! 6. Append the final reply to memory and return it
//!
//! One session processes one utterance at a time. `handle` queues callers
//! FIFO behind the in-flight cycle; `try_handle` rejects with `Busy`
//! instead. Either way no utterance is ever processed against a stale
//! snapshot concurrently with another.
//!
//! Every failure past construction resolves to a user-visible message; the
//! session never crashes over a bad model response, a denied action, or an
//! unavailable provider.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::AssistantError;
use crate::executor::{ActionExecutor, ExecutionResult};
use crate::llm::LLMClient;
use crate::memory::{ConversationMemory, Turn};
use crate::parser::{ActionRequest, ModelOutput, ResponseParser};
use crate::policy::{PermissionDecision, PermissionPolicy, TrustContext};

/// Classification of the final user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Plain conversational reply
    Reply,

    /// Apology reply after an LLM failure
    Degraded,

    /// Clarification request after a malformed directive
    Clarification,

    /// Prompt asking the user to confirm a suspended action
    ConfirmationPrompt,

    /// Refusal naming the policy reason
    Refusal,

    /// Report of an executed (or failed) action
    ActionReport,
}

/// Final result of one `handle` cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// User-facing message, already appended to memory
    pub text: String,

    /// What kind of message this is
    pub kind: OutcomeKind,
}

impl Outcome {
    fn new(text: impl Into<String>, kind: OutcomeKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// Session state, tracked for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    AwaitingModel,
    Parsing,
    EvaluatingAction,
    Executing,
    AwaitingConfirmation,
    Finalizing,
}

/// How a follow-up utterance relates to a pending confirmation
#[derive(Debug, PartialEq, Eq)]
enum ConfirmationAnswer {
    Affirmative,
    Negative,
    Unrelated,
}

/// Tunable orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wall-clock bound for one LLM call
    pub llm_timeout: Duration,

    /// Wall-clock bound for one action execution
    pub execution_timeout: Duration,

    /// Reply used when the model is unavailable
    pub degraded_reply: String,

    /// Trust signal for this session
    pub trust: TrustContext,
}

impl OrchestratorSettings {
    /// Settings for a local interactive session over the given config
    pub fn from_config(config: &Config) -> Self {
        Self {
            llm_timeout: Duration::from_secs(config.llm.request_timeout_secs),
            execution_timeout: Duration::from_secs(config.actions.max_execution_time_secs),
            degraded_reply: config.llm.degraded_reply.clone(),
            trust: TrustContext::local(),
        }
    }
}

/// Mutable per-session state, serialized behind the session lock
struct SessionInner {
    memory: ConversationMemory,
    pending: Option<ActionRequest>,
    state: SessionState,
}

/// One conversational session
///
/// Owns the memory, the parser, the policy and the collaborator handles.
/// Construct one per session; sessions share nothing mutable.
pub struct Orchestrator {
    inner: tokio::sync::Mutex<SessionInner>,
    llm: Arc<dyn LLMClient>,
    parser: ResponseParser,
    policy: PermissionPolicy,
    executor: Arc<dyn ActionExecutor>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Create a session over the given collaborators
    pub fn new(
        memory: ConversationMemory,
        llm: Arc<dyn LLMClient>,
        parser: ResponseParser,
        policy: PermissionPolicy,
        executor: Arc<dyn ActionExecutor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(SessionInner {
                memory,
                pending: None,
                state: SessionState::Idle,
            }),
            llm,
            parser,
            policy,
            executor,
            settings,
        }
    }

    /// Process one utterance, queueing FIFO behind any in-flight cycle
    pub async fn handle(&self, utterance: &str) -> Outcome {
        let mut inner = self.inner.lock().await;
        self.process(&mut inner, utterance).await
    }

    /// Process one utterance, or fail with `Busy` if a cycle is in flight
    pub async fn try_handle(&self, utterance: &str) -> Result<Outcome, AssistantError> {
        let mut inner = self.inner.try_lock().map_err(|_| AssistantError::Busy)?;
        Ok(self.process(&mut inner, utterance).await)
    }

    /// Whether an action is suspended awaiting confirmation
    pub async fn awaiting_confirmation(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    /// Ordered snapshot of the session history, preamble first
    pub async fn history(&self) -> Vec<Turn> {
        self.inner.lock().await.memory.snapshot()
    }

    async fn process(&self, inner: &mut SessionInner, utterance: &str) -> Outcome {
        // A pending action intercepts the utterance first
        if inner.pending.is_some() {
            inner.state = SessionState::AwaitingConfirmation;
            match classify_confirmation(utterance) {
                ConfirmationAnswer::Affirmative => {
                    // take() is the at-most-once guarantee: a second yes has
                    // nothing left to execute
                    if let Some(action) = inner.pending.take() {
                        inner.memory.append(Turn::user(utterance));
                        let outcome = self.execute(inner, action).await;
                        return self.finalize(inner, outcome);
                    }
                }
                ConfirmationAnswer::Negative => {
                    inner.pending = None;
                    inner.memory.append(Turn::user(utterance));
                    return self.finalize(
                        inner,
                        Outcome::new("Okay, I won't do that.", OutcomeKind::Reply),
                    );
                }
                ConfirmationAnswer::Unrelated => {
                    // Never execute without an explicit yes: the suspended
                    // action is dropped and the utterance handled fresh
                    let dropped = inner.pending.take();
                    if let Some(dropped) = dropped {
                        info!("dropping unconfirmed action '{}'", dropped.name);
                    }
                }
            }
        }

        inner.memory.append(Turn::user(utterance));
        let snapshot = inner.memory.snapshot();

        inner.state = SessionState::AwaitingModel;
        let raw = match timeout(self.settings.llm_timeout, self.llm.complete(&snapshot)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!("LLM call failed: {}", e);
                return self.finalize(
                    inner,
                    Outcome::new(self.settings.degraded_reply.clone(), OutcomeKind::Degraded),
                );
            }
            Err(_) => {
                warn!(
                    "LLM call timed out after {:?}",
                    self.settings.llm_timeout
                );
                return self.finalize(
                    inner,
                    Outcome::new(self.settings.degraded_reply.clone(), OutcomeKind::Degraded),
                );
            }
        };

        inner.state = SessionState::Parsing;
        let output = match self.parser.parse(&raw) {
            Ok(output) => output,
            Err(e) => {
                debug!("malformed directive: {}", e);
                return self.finalize(
                    inner,
                    Outcome::new(
                        "I wasn't sure how to do that safely. Could you rephrase what \
                         you'd like me to do?",
                        OutcomeKind::Clarification,
                    ),
                );
            }
        };

        let action = match output {
            ModelOutput::Reply(text) => {
                return self.finalize(inner, Outcome::new(text, OutcomeKind::Reply));
            }
            ModelOutput::Action(action) => action,
        };

        inner.state = SessionState::EvaluatingAction;
        let verdict = self.policy.evaluate(&action, &self.settings.trust);
        match verdict.decision {
            PermissionDecision::Deny => self.finalize(
                inner,
                Outcome::new(
                    format!("I can't do that: {}.", verdict.reason),
                    OutcomeKind::Refusal,
                ),
            ),
            PermissionDecision::AllowWithConfirmation => {
                let prompt = format!(
                    "I'd like to {}. Should I go ahead? (yes/no)",
                    describe_action(&action)
                );
                inner.pending = Some(action);
                inner.state = SessionState::AwaitingConfirmation;
                inner.memory.append(Turn::assistant(&prompt));
                Outcome::new(prompt, OutcomeKind::ConfirmationPrompt)
            }
            PermissionDecision::Allow => {
                let outcome = self.execute(inner, action).await;
                self.finalize(inner, outcome)
            }
        }
    }

    /// Run an approved action, bounded by the execution timeout
    async fn execute(&self, inner: &mut SessionInner, action: ActionRequest) -> Outcome {
        inner.state = SessionState::Executing;
        info!("executing action '{}' ({})", action.name, action.id);

        let result = match timeout(
            self.settings.execution_timeout,
            self.executor.run(&action),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => ExecutionResult::fail(format!(
                "timed out after {:?}",
                self.settings.execution_timeout
            )),
        };

        // Failures are reported, never retried: re-running a system action
        // behind the user's back is unsafe
        let text = if result.success {
            if result.output.is_empty() {
                "Done.".to_string()
            } else {
                result.output
            }
        } else {
            format!(
                "I tried to {} but it failed: {}.",
                describe_action(&action),
                result.error.unwrap_or_else(|| "unknown error".to_string())
            )
        };
        Outcome::new(text, OutcomeKind::ActionReport)
    }

    /// Append the final message to memory and return to Idle
    fn finalize(&self, inner: &mut SessionInner, outcome: Outcome) -> Outcome {
        inner.state = SessionState::Finalizing;
        inner.memory.append(Turn::assistant(&outcome.text));
        inner.state = SessionState::Idle;
        outcome
    }
}

/// Short human rendering of an action for prompts and reports
fn describe_action(action: &ActionRequest) -> String {
    if action.arguments.is_empty() {
        return format!("run '{}'", action.name);
    }
    let args = action
        .arguments
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("run '{}' with {}", action.name, args)
}

/// Classify a follow-up utterance against a pending confirmation
fn classify_confirmation(utterance: &str) -> ConfirmationAnswer {
    const AFFIRMATIVE: &[&str] = &[
        "yes", "y", "yeah", "yep", "sure", "ok", "okay", "confirm", "go ahead", "do it",
    ];
    const NEGATIVE: &[&str] = &[
        "no", "n", "nope", "cancel", "stop", "don't", "dont", "never mind", "nevermind",
    ];

    let normalized = utterance.trim().trim_end_matches(['.', '!']).to_lowercase();
    if AFFIRMATIVE.contains(&normalized.as_str()) {
        ConfirmationAnswer::Affirmative
    } else if NEGATIVE.contains(&normalized.as_str()) {
        ConfirmationAnswer::Negative
    } else {
        ConfirmationAnswer::Unrelated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_confirmation() {
        assert_eq!(
            classify_confirmation("Yes!"),
            ConfirmationAnswer::Affirmative
        );
        assert_eq!(
            classify_confirmation("go ahead"),
            ConfirmationAnswer::Affirmative
        );
        assert_eq!(classify_confirmation("no"), ConfirmationAnswer::Negative);
        assert_eq!(
            classify_confirmation("Never mind."),
            ConfirmationAnswer::Negative
        );
        assert_eq!(
            classify_confirmation("what time is it"),
            ConfirmationAnswer::Unrelated
        );
    }

    #[test]
    fn test_describe_action() {
        let action = ActionRequest {
            id: uuid::Uuid::new_v4(),
            name: "open_url".to_string(),
            arguments: [("url".to_string(), "https://youtube.com".to_string())]
                .into_iter()
                .collect(),
            raw_text: String::new(),
        };
        let described = describe_action(&action);
        assert!(described.contains("open_url"));
        assert!(described.contains("https://youtube.com"));
    }
}
