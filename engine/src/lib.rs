//! Neko Engine Library
//!
//! This library provides the core functionality of the Neko assistant engine.
//! It is used by both the main binary and integration tests.

/// Error types and handling
pub mod errors;

/// Configuration management module
pub mod config;

/// Conversation memory module
pub mod memory;

/// Model output parsing module
pub mod parser;

/// Permission policy module
pub mod policy;

/// Audit trail module
pub mod audit;

/// System action execution module
pub mod executor;

/// LLM client abstraction layer
pub mod llm;

/// Request/response orchestration module
pub mod orchestrator;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
