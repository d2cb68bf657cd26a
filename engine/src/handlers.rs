//! Command handlers
//!
//! Wires the configuration into a session and drives it from the console.
//! Everything here is a thin I/O wrapper; the interesting behavior lives in
//! the orchestrator.

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::Config;
use crate::errors::AssistantError;
use crate::executor::SystemExecutor;
use crate::llm::openai::OpenAIClient;
use crate::llm::{LLMClient, RetryPolicy, RetryingClient};
use crate::memory::ConversationMemory;
use crate::orchestrator::{Orchestrator, OrchestratorSettings, Outcome, OutcomeKind};
use crate::parser::ResponseParser;
use crate::policy::PermissionPolicy;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Words that end an interactive session
const EXIT_WORDS: &[&str] = &["exit", "quit", "bye", "goodbye", "stop"];

/// Build one local interactive session from the configuration
pub fn build_session(config: &Config) -> Result<Orchestrator, AssistantError> {
    std::fs::create_dir_all(&config.core.sandbox_root)?;

    let memory = ConversationMemory::with_preamble(
        config.memory.capacity,
        config.memory.system_prompt.clone(),
    )?;

    let llm: Arc<dyn LLMClient> = Arc::new(RetryingClient::new(
        OpenAIClient::new(&config.llm)?,
        RetryPolicy {
            max_attempts: config.llm.max_retries,
            ..RetryPolicy::default()
        },
    ));

    let policy = PermissionPolicy::new(
        config.policy_rules(),
        Arc::new(TracingAuditSink) as Arc<dyn AuditSink>,
    );

    let executor = Arc::new(SystemExecutor::new(
        config.core.sandbox_root.clone(),
        config.actions.command_allowlist.iter().cloned().collect(),
        config.actions.app_aliases.clone(),
        config.actions.url_shortcuts.clone(),
    ));

    Ok(Orchestrator::new(
        memory,
        llm,
        ResponseParser::default(),
        policy,
        executor,
        OrchestratorSettings::from_config(config),
    ))
}

/// Handle a single utterance and print the result
pub async fn handle_run(config: &Config, utterance: &str, format: OutputFormat) -> Result<()> {
    let session = build_session(config)?;
    let outcome = session.handle(utterance).await;
    print_outcome(&outcome, format);
    Ok(())
}

/// Run the interactive chat loop
pub async fn handle_chat(config: &Config) -> Result<()> {
    let session = build_session(config)?;

    println!("Neko ready. Type 'exit' to leave.");
    let stdin = std::io::stdin();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&utterance.to_lowercase().as_str()) {
            println!("neko> Goodbye!");
            break;
        }

        let outcome = session.handle(utterance).await;
        println!("neko> {}", outcome.text);
    }
    Ok(())
}

/// Print the active configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => println!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

/// Print the configuration file path
pub fn handle_config_path() -> Result<()> {
    println!("{}", Config::default_path()?.display());
    Ok(())
}

fn print_outcome(outcome: &Outcome, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let kind = match outcome.kind {
                OutcomeKind::Reply => "reply",
                OutcomeKind::Degraded => "degraded",
                OutcomeKind::Clarification => "clarification",
                OutcomeKind::ConfirmationPrompt => "confirmation_prompt",
                OutcomeKind::Refusal => "refusal",
                OutcomeKind::ActionReport => "action_report",
            };
            println!(
                "{}",
                serde_json::json!({ "text": outcome.text, "kind": kind })
            );
        }
        OutputFormat::Text => println!("{}", outcome.text),
    }
}
