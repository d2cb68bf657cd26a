//! System action execution
//!
//! The `ActionExecutor` trait is the boundary between the orchestration core
//! and the operating system. `SystemExecutor` implements the built-in
//! actions: opening URLs, launching applications, file writes and deletes
//! confined to the sandbox root, and allow-listed command execution without
//! a shell.
//!
//! Execution never panics and never returns `Err`: every outcome, including
//! validation failures, is reported through `ExecutionResult` so the
//! orchestrator can relay it to the user verbatim.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::parser::ActionRequest;

/// Outcome of one action execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Whether the action completed successfully
    pub success: bool,

    /// Captured output or a short success summary
    pub output: String,

    /// Error description when `success` is false
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Create a success result
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failure result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Executes an approved action and reports success or failure
///
/// The orchestrator guarantees at-most-once invocation per approved request;
/// implementations do not need their own dedup.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute the given approved request
    async fn run(&self, request: &ActionRequest) -> ExecutionResult;
}

/// Executor backed by the local operating system
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    sandbox_root: PathBuf,
    command_allowlist: HashSet<String>,
    app_aliases: BTreeMap<String, String>,
    url_shortcuts: BTreeMap<String, String>,
}

impl SystemExecutor {
    /// Create an executor confined to the given sandbox root
    pub fn new(
        sandbox_root: PathBuf,
        command_allowlist: HashSet<String>,
        app_aliases: BTreeMap<String, String>,
        url_shortcuts: BTreeMap<String, String>,
    ) -> Self {
        Self {
            sandbox_root,
            command_allowlist,
            app_aliases,
            url_shortcuts,
        }
    }

    async fn open_url(&self, url: &str) -> ExecutionResult {
        let resolved = self.resolve_url(url);
        if !resolved.starts_with("https://") && !resolved.starts_with("http://") {
            return ExecutionResult::fail(format!("'{url}' is not an http(s) URL"));
        }

        debug!("opening URL {}", resolved);
        match spawn_opener(&resolved).await {
            Ok(()) => ExecutionResult::ok(format!("Opened {resolved} in your browser")),
            Err(e) => ExecutionResult::fail(format!("could not open {resolved}: {e}")),
        }
    }

    /// Resolve a bare site name ("youtube") through the shortcut table
    fn resolve_url(&self, url: &str) -> String {
        let key = url.trim().to_lowercase();
        match self.url_shortcuts.get(&key) {
            Some(full) => full.clone(),
            None => url.trim().to_string(),
        }
    }

    async fn launch_app(&self, app: &str) -> ExecutionResult {
        let key = app.trim().to_lowercase();
        let resolved = self.app_aliases.get(&key).cloned().unwrap_or(key);

        debug!("launching application {}", resolved);
        match spawn_launcher(&resolved).await {
            Ok(()) => ExecutionResult::ok(format!("Launched {resolved}")),
            Err(e) => ExecutionResult::fail(format!("could not launch {resolved}: {e}")),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> ExecutionResult {
        let target = match self.resolve_sandboxed(path) {
            Ok(target) => target,
            Err(e) => return ExecutionResult::fail(e),
        };

        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ExecutionResult::fail(format!("could not create parent directory: {e}"));
            }
        }
        match tokio::fs::write(&target, content).await {
            Ok(()) => ExecutionResult::ok(format!("Wrote {}", target.display())),
            Err(e) => ExecutionResult::fail(format!("could not write {}: {e}", target.display())),
        }
    }

    async fn delete_path(&self, path: &str) -> ExecutionResult {
        let target = match self.resolve_sandboxed(path) {
            Ok(target) => target,
            Err(e) => return ExecutionResult::fail(e),
        };

        let metadata = match tokio::fs::metadata(&target).await {
            Ok(metadata) => metadata,
            Err(e) => return ExecutionResult::fail(format!("{}: {e}", target.display())),
        };
        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        match result {
            Ok(()) => ExecutionResult::ok(format!("Deleted {}", target.display())),
            Err(e) => ExecutionResult::fail(format!("could not delete {}: {e}", target.display())),
        }
    }

    /// Resolve a path under the sandbox root, rejecting escapes
    ///
    /// The policy performs the same structural check before approval; this
    /// executor-side check keeps the boundary intact even for callers that
    /// wire in a different policy.
    fn resolve_sandboxed(&self, path: &str) -> Result<PathBuf, String> {
        let path = Path::new(path);
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err("path contains parent traversal".to_string());
        }

        let target = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.sandbox_root.join(path)
        };
        if !target.starts_with(&self.sandbox_root) {
            return Err(format!(
                "path is outside the sandbox root {}",
                self.sandbox_root.display()
            ));
        }
        Ok(target)
    }

    async fn run_command(&self, command: &str, args: &str) -> ExecutionResult {
        let args: Vec<String> = args.split_whitespace().map(str::to_string).collect();
        if let Err(e) = self.validate_command(command, &args) {
            return ExecutionResult::fail(e);
        }

        debug!("executing command {} {:?}", command, args);
        let output = Command::new(command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                ExecutionResult::ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => ExecutionResult::fail(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(e) => ExecutionResult::fail(format!("could not spawn {command}: {e}")),
        }
    }

    /// Validate a command through the security gates without executing it
    ///
    /// Gates: allowlist membership, shell invocation rejection, shell
    /// metacharacters in arguments, dangerous pipe patterns.
    fn validate_command(&self, command: &str, args: &[String]) -> Result<(), String> {
        if !self.command_allowlist.contains(command) {
            return Err(format!("command not allowed: {command}"));
        }

        if matches!(command, "sh" | "bash" | "zsh" | "fish") {
            return Err("shell invocation is not permitted".to_string());
        }

        for arg in args {
            if has_shell_metacharacters(arg) {
                return Err(format!("unsafe characters in argument: {arg}"));
            }
        }

        let full_command = format!("{} {}", command, args.join(" "));
        if has_dangerous_pipe(&full_command) {
            return Err("dangerous pipe pattern detected".to_string());
        }

        Ok(())
    }
}

#[async_trait]
impl ActionExecutor for SystemExecutor {
    async fn run(&self, request: &ActionRequest) -> ExecutionResult {
        let arg = |key: &str| request.arguments.get(key).map(String::as_str).unwrap_or("");

        match request.name.as_str() {
            "open_url" => self.open_url(arg("url")).await,
            "launch_app" => self.launch_app(arg("app")).await,
            "write_file" => self.write_file(arg("path"), arg("content")).await,
            "delete_path" => self.delete_path(arg("path")).await,
            "run_command" => self.run_command(arg("command"), arg("args")).await,
            other => ExecutionResult::fail(format!("no executor for action '{other}'")),
        }
    }
}

/// Checks if a string contains shell metacharacters.
///
/// Detects: | & ; ' " ` \n < >
fn has_shell_metacharacters(s: &str) -> bool {
    s.chars()
        .any(|c| matches!(c, '|' | '&' | ';' | '\'' | '"' | '`' | '\n' | '<' | '>'))
}

/// Checks if a command line contains dangerous piping patterns.
fn has_dangerous_pipe(cmd: &str) -> bool {
    const DANGEROUS: &[&str] = &[
        "| sudo",
        "| su",
        "| chmod 777",
        "curl | bash",
        "wget | sh",
        "curl | sh",
        "wget | bash",
    ];
    DANGEROUS.iter().any(|d| cmd.contains(d))
}

#[cfg(target_os = "macos")]
async fn spawn_opener(url: &str) -> std::io::Result<()> {
    run_detached("open", &[url]).await
}

#[cfg(target_os = "windows")]
async fn spawn_opener(url: &str) -> std::io::Result<()> {
    run_detached("cmd", &["/C", "start", "", url]).await
}

#[cfg(all(unix, not(target_os = "macos")))]
async fn spawn_opener(url: &str) -> std::io::Result<()> {
    run_detached("xdg-open", &[url]).await
}

#[cfg(target_os = "macos")]
async fn spawn_launcher(app: &str) -> std::io::Result<()> {
    run_detached("open", &["-a", app]).await
}

#[cfg(target_os = "windows")]
async fn spawn_launcher(app: &str) -> std::io::Result<()> {
    run_detached("cmd", &["/C", "start", "", app]).await
}

#[cfg(all(unix, not(target_os = "macos")))]
async fn spawn_launcher(app: &str) -> std::io::Result<()> {
    run_detached(app, &[]).await
}

async fn run_detached(program: &str, args: &[&str]) -> std::io::Result<()> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("exited with {status}")))
    }
}
