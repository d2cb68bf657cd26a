//! Permission policy
//!
//! Pure decision function over action requests. The policy is a
//! deterministic rule table, not learned: destructive or irreversible
//! actions always map to AllowWithConfirmation or Deny, benign allow-listed
//! actions map to Allow, and the caller-supplied trust signal can only ever
//! escalate scrutiny, never relax it. Paths outside the configured sandbox
//! root are categorically denied.
//!
//! Every evaluation emits an audit record through the injected sink. The
//! trail is part of the contract, not optional logging.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::parser::ActionRequest;

/// Trust score below which a session is treated as untrusted
const TRUST_THRESHOLD: f64 = 0.5;

/// Maximum length of the argument summary placed in audit records
const AUDIT_ARGS_LIMIT: usize = 200;

/// Path components that are never touchable, regardless of sandbox root
const SENSITIVE_COMPONENTS: &[&str] = &[
    ".ssh",
    ".env",
    ".gnupg",
    ".aws",
    ".kube",
    "id_rsa",
    "id_ed25519",
    "id_dsa",
    "credentials",
    "private_key",
    ".npmrc",
    ".pypirc",
];

/// Decision for a proposed action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionDecision {
    /// Execute without further interaction
    Allow,

    /// Execute only after an explicit user confirmation
    AllowWithConfirmation,

    /// Never execute
    Deny,
}

impl PermissionDecision {
    /// Escalate the decision by one level of scrutiny
    ///
    /// Allow → AllowWithConfirmation; confirmation and denial are already
    /// at or past the ceiling and stay put.
    pub fn escalate(self) -> Self {
        match self {
            PermissionDecision::Allow => PermissionDecision::AllowWithConfirmation,
            other => other,
        }
    }
}

/// A decision paired with its human-readable reason
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub decision: PermissionDecision,
    pub reason: String,
}

impl Verdict {
    fn new(decision: PermissionDecision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
        }
    }
}

/// Caller-supplied trust signal for an evaluation
///
/// The score is clamped to 0.0..=1.0. Trust only ever matters for benign
/// actions: an untrusted context escalates Allow to AllowWithConfirmation,
/// and no score weakens a Deny or a confirmation requirement.
#[derive(Debug, Clone, Copy)]
pub struct TrustContext {
    score: f64,
}

impl TrustContext {
    /// Create a context with the given trust score
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
        }
    }

    /// A fully trusted local interactive session
    pub fn local() -> Self {
        Self::new(1.0)
    }

    /// The clamped trust score
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Whether the context clears the trust threshold
    pub fn is_trusted(&self) -> bool {
        self.score >= TRUST_THRESHOLD
    }
}

/// Immutable rule table consumed by the policy
///
/// Built from configuration at startup; read-only afterwards.
#[derive(Debug, Clone)]
pub struct PolicyRules {
    /// Action names that are always denied
    pub deny: HashSet<String>,

    /// Action names whose Allow is escalated to confirmation
    pub confirm: HashSet<String>,

    /// Applications that may be launched without confirmation
    pub allowed_apps: HashSet<String>,

    /// Aliases resolved before the app allow-list check
    pub app_aliases: BTreeMap<String, String>,

    /// URL hosts that may be opened without confirmation
    pub allowed_url_hosts: HashSet<String>,

    /// Filesystem boundary for write/delete actions
    pub sandbox_root: PathBuf,
}

/// Deterministic permission policy with a mandatory audit trail
pub struct PermissionPolicy {
    rules: PolicyRules,
    audit: Arc<dyn AuditSink>,
}

impl PermissionPolicy {
    /// Create a policy over the given rule table and audit sink
    pub fn new(rules: PolicyRules, audit: Arc<dyn AuditSink>) -> Self {
        Self { rules, audit }
    }

    /// Evaluate a proposed action against the rule table
    ///
    /// Always emits exactly one audit record, whatever the outcome.
    pub fn evaluate(&self, request: &ActionRequest, ctx: &TrustContext) -> Verdict {
        let verdict = self.decide(request, ctx);

        self.audit.record(AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_id: request.id,
            action: request.name.clone(),
            arguments: summarize_arguments(&request.arguments),
            decision: verdict.decision,
            reason: verdict.reason.clone(),
        });

        verdict
    }

    fn decide(&self, request: &ActionRequest, ctx: &TrustContext) -> Verdict {
        // Hard deny set first: nothing downgrades these
        if self.rules.deny.contains(&request.name) {
            return Verdict::new(
                PermissionDecision::Deny,
                format!("action '{}' is on the deny list", request.name),
            );
        }

        let base = match request.name.as_str() {
            "open_url" => self.decide_open_url(request),
            "launch_app" => self.decide_launch_app(request),
            "write_file" => self.decide_path_action(request, PermissionDecision::Allow),
            "delete_path" => {
                // Irreversible: never better than confirmation
                self.decide_path_action(request, PermissionDecision::AllowWithConfirmation)
            }
            "run_command" => Verdict::new(
                PermissionDecision::AllowWithConfirmation,
                "command execution always requires confirmation",
            ),
            other => Verdict::new(
                PermissionDecision::Deny,
                format!("action '{other}' has no policy rule"),
            ),
        };

        if base.decision != PermissionDecision::Allow {
            return base;
        }

        // Per-action confirmation overrides from configuration
        if self.rules.confirm.contains(&request.name) {
            return Verdict::new(
                PermissionDecision::AllowWithConfirmation,
                format!("configuration requires confirmation for '{}'", request.name),
            );
        }

        // Untrusted contexts escalate benign actions to confirmation
        if !ctx.is_trusted() {
            return Verdict::new(
                PermissionDecision::AllowWithConfirmation,
                "low-trust context requires confirmation",
            );
        }

        base
    }

    fn decide_open_url(&self, request: &ActionRequest) -> Verdict {
        let url = request.arguments.get("url").map(String::as_str).unwrap_or("");
        match url_host(url) {
            Some(host) => {
                if self.rules.allowed_url_hosts.contains(host) {
                    Verdict::new(
                        PermissionDecision::Allow,
                        format!("host '{host}' is on the allow-list"),
                    )
                } else {
                    Verdict::new(
                        PermissionDecision::AllowWithConfirmation,
                        format!("host '{host}' is not on the allow-list"),
                    )
                }
            }
            None => Verdict::new(
                PermissionDecision::Deny,
                "URL is not a recognizable http(s) address",
            ),
        }
    }

    fn decide_launch_app(&self, request: &ActionRequest) -> Verdict {
        let raw = request.arguments.get("app").map(String::as_str).unwrap_or("");
        let name = raw.trim().to_lowercase();
        let resolved = self
            .rules
            .app_aliases
            .get(&name)
            .cloned()
            .unwrap_or(name);

        if self.rules.allowed_apps.contains(&resolved) {
            Verdict::new(
                PermissionDecision::Allow,
                format!("application '{resolved}' is on the allow-list"),
            )
        } else {
            Verdict::new(
                PermissionDecision::AllowWithConfirmation,
                format!("application '{resolved}' is not on the allow-list"),
            )
        }
    }

    fn decide_path_action(&self, request: &ActionRequest, inside: PermissionDecision) -> Verdict {
        let path = request.arguments.get("path").map(String::as_str).unwrap_or("");
        match check_sandboxed(Path::new(path), &self.rules.sandbox_root) {
            Ok(()) => Verdict::new(
                inside,
                format!("path is within the sandbox root for '{}'", request.name),
            ),
            Err(reason) => Verdict::new(PermissionDecision::Deny, reason),
        }
    }
}

/// Extract the host of an http(s) URL without pulling in a URL crate.
///
/// Rejects every other scheme outright; `javascript:` and `file:` URLs must
/// never reach an opener.
fn url_host(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split('@').next_back()?;
    let host = host.split(':').next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Lexical sandbox check for paths that may not exist yet.
///
/// Canonicalization cannot be used here because delete/write targets are
/// often not on disk, so the check is structural: no parent traversal, no
/// sensitive components, and absolute paths must sit under the root.
fn check_sandboxed(path: &Path, root: &Path) -> Result<(), String> {
    if path.as_os_str().is_empty() {
        return Err("path is empty".to_string());
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err("path contains parent traversal".to_string());
            }
            Component::Normal(part) => {
                if let Some(part) = part.to_str() {
                    if SENSITIVE_COMPONENTS.contains(&part) {
                        return Err(format!("path touches sensitive component '{part}'"));
                    }
                }
            }
            _ => {}
        }
    }

    if path.is_absolute() && !path.starts_with(root) {
        return Err(format!(
            "path is outside the sandbox root {}",
            root.display()
        ));
    }

    Ok(())
}

/// Render arguments as a compact `k=v` list for the audit trail
fn summarize_arguments(arguments: &BTreeMap<String, String>) -> String {
    let mut summary = arguments
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    if summary.len() > AUDIT_ARGS_LIMIT {
        summary.truncate(AUDIT_ARGS_LIMIT);
        summary.push('…');
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use std::collections::BTreeMap;

    fn request(name: &str, args: &[(&str, &str)]) -> ActionRequest {
        ActionRequest {
            id: Uuid::new_v4(),
            name: name.to_string(),
            arguments: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            raw_text: String::new(),
        }
    }

    fn rules() -> PolicyRules {
        PolicyRules {
            deny: ["run_command_raw".to_string()].into_iter().collect(),
            confirm: HashSet::new(),
            allowed_apps: ["safari".to_string(), "vscode".to_string()]
                .into_iter()
                .collect(),
            app_aliases: [("vs code".to_string(), "vscode".to_string())]
                .into_iter()
                .collect(),
            allowed_url_hosts: ["youtube.com".to_string(), "github.com".to_string()]
                .into_iter()
                .collect(),
            sandbox_root: PathBuf::from("/home/user/neko"),
        }
    }

    fn policy() -> (PermissionPolicy, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let policy = PermissionPolicy::new(rules(), Arc::clone(&sink) as Arc<dyn AuditSink>);
        (policy, sink)
    }

    #[test]
    fn test_allow_listed_url_allowed() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("open_url", &[("url", "https://youtube.com/watch?v=x")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Allow);
    }

    #[test]
    fn test_www_prefix_stripped() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("open_url", &[("url", "https://www.github.com")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Allow);
    }

    #[test]
    fn test_unknown_host_needs_confirmation() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("open_url", &[("url", "https://example.org")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::AllowWithConfirmation);
    }

    #[test]
    fn test_non_http_scheme_denied() {
        let (policy, _) = policy();
        for url in ["file:///etc/passwd", "javascript:alert(1)", "not a url"] {
            let verdict = policy.evaluate(
                &request("open_url", &[("url", url)]),
                &TrustContext::local(),
            );
            assert_eq!(verdict.decision, PermissionDecision::Deny, "url: {url}");
        }
    }

    #[test]
    fn test_app_alias_resolution() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("launch_app", &[("app", "VS Code")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Allow);
    }

    #[test]
    fn test_unknown_app_needs_confirmation() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("launch_app", &[("app", "mystery_tool")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::AllowWithConfirmation);
    }

    #[test]
    fn test_delete_inside_sandbox_needs_confirmation() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("delete_path", &[("path", "/home/user/neko/tmp.txt")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::AllowWithConfirmation);
    }

    #[test]
    fn test_delete_outside_sandbox_denied() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("delete_path", &[("path", "/")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Deny);
        assert!(verdict.reason.contains("sandbox"));
    }

    #[test]
    fn test_parent_traversal_denied() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("write_file", &[("path", "notes/../../.ssh/id_rsa"), ("content", "x")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Deny);
    }

    #[test]
    fn test_sensitive_component_denied() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("write_file", &[("path", "/home/user/neko/.env"), ("content", "x")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Deny);
    }

    #[test]
    fn test_write_inside_sandbox_allowed() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("write_file", &[("path", "notes/todo.md"), ("content", "x")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::Allow);
    }

    #[test]
    fn test_run_command_never_plain_allow() {
        let (policy, _) = policy();
        for score in [0.0, 0.5, 1.0] {
            let verdict = policy.evaluate(
                &request("run_command", &[("command", "ls")]),
                &TrustContext::new(score),
            );
            assert_eq!(verdict.decision, PermissionDecision::AllowWithConfirmation);
        }
    }

    #[test]
    fn test_deny_list_beats_trust() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("run_command_raw", &[]),
            &TrustContext::new(1.0),
        );
        assert_eq!(verdict.decision, PermissionDecision::Deny);
    }

    #[test]
    fn test_low_trust_escalates_benign_action() {
        let (policy, _) = policy();
        let verdict = policy.evaluate(
            &request("open_url", &[("url", "https://youtube.com")]),
            &TrustContext::new(0.1),
        );
        assert_eq!(verdict.decision, PermissionDecision::AllowWithConfirmation);
    }

    #[test]
    fn test_confirm_override_escalates() {
        let sink = Arc::new(MemoryAuditSink::new());
        let mut rules = rules();
        rules.confirm.insert("open_url".to_string());
        let policy = PermissionPolicy::new(rules, sink as Arc<dyn AuditSink>);

        let verdict = policy.evaluate(
            &request("open_url", &[("url", "https://youtube.com")]),
            &TrustContext::local(),
        );
        assert_eq!(verdict.decision, PermissionDecision::AllowWithConfirmation);
    }

    #[test]
    fn test_every_evaluation_is_audited() {
        let (policy, sink) = policy();
        policy.evaluate(
            &request("open_url", &[("url", "https://youtube.com")]),
            &TrustContext::local(),
        );
        policy.evaluate(
            &request("delete_path", &[("path", "/")]),
            &TrustContext::local(),
        );

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, "open_url");
        assert_eq!(records[1].decision, PermissionDecision::Deny);
    }

    #[test]
    fn test_decision_escalate() {
        assert_eq!(
            PermissionDecision::Allow.escalate(),
            PermissionDecision::AllowWithConfirmation
        );
        assert_eq!(
            PermissionDecision::Deny.escalate(),
            PermissionDecision::Deny
        );
    }
}
