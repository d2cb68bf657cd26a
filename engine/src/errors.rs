//! Error types and handling
//!
//! This module provides the error types used throughout the Neko engine.
//! All errors implement the `NekoErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Error messages are written to be safe to display to end users: no API
//! keys, no raw upstream payloads.

use thiserror::Error;

use crate::llm::LLMError;

/// Trait for Neko error extensions
///
/// Provides additional context for errors: a hint that is safe to show to
/// end users, and whether the error is recoverable within the session.
pub trait NekoErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors resolve to a user-visible message and the session
    /// continues. Non-recoverable errors abort startup.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// Everything that can go wrong while handling an utterance. All variants
/// except `Config` are resolved to a user-visible reply at the orchestrator
/// boundary; `Config` is fatal at startup.
#[derive(Debug, Error)]
pub enum AssistantError {
    // Configuration errors (startup-fatal)
    #[error("Configuration error: {0}")]
    Config(String),

    // Parsing errors
    #[error("Malformed action directive: {0}")]
    MalformedAction(String),

    // Policy errors
    #[error("Permission denied for '{action}': {reason}")]
    PermissionDenied { action: String, reason: String },

    // Execution errors
    #[error("Action '{0}' timed out")]
    ExecutionTimeout(String),

    #[error("Action '{action}' failed: {reason}")]
    ExecutionFailure { action: String, reason: String },

    // Session errors
    #[error("Session busy: another utterance is in flight")]
    Busy,

    // LLM provider errors
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NekoErrorExt for AssistantError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::MalformedAction(_) => {
                "I couldn't safely understand that as an action. Try rephrasing"
            }
            Self::PermissionDenied { .. } => "This action is not permitted",
            Self::ExecutionTimeout(_) => "The action took too long and was stopped",
            Self::ExecutionFailure { .. } => "The action could not be completed",
            Self::Busy => "Still working on your previous request",
            Self::Llm(_) => "The language model is unavailable. Try again shortly",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
