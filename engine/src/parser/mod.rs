//! Model output parsing
//!
//! Extracts intent from raw model text: either a free-form natural-language
//! reply, or a structured action directive. A directive is signalled with a
//! fenced ```action block or a JSON object of the shape
//! `{"action": "<name>", "args": {...}}`, bare or embedded in prose.
//!
//! Parsing is strict. If a directive marker is present but the directive is
//! malformed in any way (invalid JSON, unknown action name, missing or
//! unexpected argument, non-string argument value), parsing fails with
//! `MalformedAction` and nothing is ever executed from it. Executing a
//! misparsed action is the primary safety risk of the whole system, so
//! ambiguity resolves to "ask again", never to a best-effort guess.

use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::AssistantError;

/// A structured action request extracted from model output
///
/// Consumed at most once by the policy/executor pipeline; not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    /// Unique identifier for this request (audit correlation)
    pub id: Uuid,

    /// Name of the action, validated against the catalog
    pub name: String,

    /// Named string arguments
    pub arguments: BTreeMap<String, String>,

    /// The raw model text the request was parsed from
    pub raw_text: String,
}

/// Parsed model output: plain reply or action request
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Free-form natural-language reply
    Reply(String),

    /// Structured action request
    Action(ActionRequest),
}

/// Argument schema for a single catalog action
#[derive(Debug, Clone)]
struct ActionSpec {
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

/// Registry of recognized actions and their argument schemas
///
/// The parser rejects any directive naming an action outside the catalog,
/// so downstream policy and execution only ever see known shapes.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    specs: BTreeMap<&'static str, ActionSpec>,
}

impl ActionCatalog {
    /// Catalog of the built-in system actions
    pub fn builtin() -> Self {
        let mut specs = BTreeMap::new();
        specs.insert(
            "open_url",
            ActionSpec {
                required: &["url"],
                optional: &[],
            },
        );
        specs.insert(
            "launch_app",
            ActionSpec {
                required: &["app"],
                optional: &[],
            },
        );
        specs.insert(
            "write_file",
            ActionSpec {
                required: &["path", "content"],
                optional: &[],
            },
        );
        specs.insert(
            "delete_path",
            ActionSpec {
                required: &["path"],
                optional: &[],
            },
        );
        specs.insert(
            "run_command",
            ActionSpec {
                required: &["command"],
                optional: &["args"],
            },
        );
        Self { specs }
    }

    /// Whether the catalog knows the given action name
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Names of all catalog actions
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.keys().copied()
    }

    fn spec(&self, name: &str) -> Option<&ActionSpec> {
        self.specs.get(name)
    }
}

/// Parser for raw model text
#[derive(Debug, Clone)]
pub struct ResponseParser {
    catalog: ActionCatalog,
}

impl ResponseParser {
    /// Create a parser over the given action catalog
    pub fn new(catalog: ActionCatalog) -> Self {
        Self { catalog }
    }

    /// Parse raw model text into a reply or an action request
    ///
    /// Returns `MalformedAction` if a directive marker is present but the
    /// directive does not validate against the catalog.
    pub fn parse(&self, raw: &str) -> Result<ModelOutput, AssistantError> {
        let trimmed = raw.trim();

        // Fenced ```action block takes precedence over everything else
        if let Some(body) = extract_fenced_block(trimmed, "action") {
            let request = self.validate_directive(body.trim(), raw)?;
            return Ok(ModelOutput::Action(request));
        }

        // Entire content is a JSON directive
        if trimmed.starts_with('{') && trimmed.contains("\"action\"") {
            let request = self.validate_directive(trimmed, raw)?;
            return Ok(ModelOutput::Action(request));
        }

        // Directive embedded in prose
        if let Some(pos) = trimmed.find("{\"action\"") {
            let candidate = extract_balanced_json(&trimmed[pos..]).ok_or_else(|| {
                AssistantError::MalformedAction(
                    "unterminated action directive in model output".to_string(),
                )
            })?;
            let request = self.validate_directive(candidate, raw)?;
            return Ok(ModelOutput::Action(request));
        }

        Ok(ModelOutput::Reply(trimmed.to_string()))
    }

    /// Validate a candidate directive string against the catalog
    fn validate_directive(
        &self,
        candidate: &str,
        raw: &str,
    ) -> Result<ActionRequest, AssistantError> {
        let json: serde_json::Value = serde_json::from_str(candidate).map_err(|e| {
            AssistantError::MalformedAction(format!("directive is not valid JSON: {e}"))
        })?;

        let name = json
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AssistantError::MalformedAction(
                    "directive is missing a string 'action' field".to_string(),
                )
            })?
            .to_string();

        let spec = self.catalog.spec(&name).ok_or_else(|| {
            AssistantError::MalformedAction(format!("unknown action name '{name}'"))
        })?;

        let mut arguments = BTreeMap::new();
        match json.get("args") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(map)) => {
                for (key, value) in map {
                    let value = value.as_str().ok_or_else(|| {
                        AssistantError::MalformedAction(format!(
                            "argument '{key}' of '{name}' must be a string"
                        ))
                    })?;
                    arguments.insert(key.clone(), value.to_string());
                }
            }
            Some(_) => {
                return Err(AssistantError::MalformedAction(format!(
                    "'args' of '{name}' must be an object"
                )));
            }
        }

        for required in spec.required {
            if !arguments.contains_key(*required) {
                return Err(AssistantError::MalformedAction(format!(
                    "action '{name}' is missing required argument '{required}'"
                )));
            }
        }
        for key in arguments.keys() {
            let known = spec.required.contains(&key.as_str())
                || spec.optional.contains(&key.as_str());
            if !known {
                return Err(AssistantError::MalformedAction(format!(
                    "action '{name}' does not accept argument '{key}'"
                )));
            }
        }

        Ok(ActionRequest {
            id: Uuid::new_v4(),
            name,
            arguments,
            raw_text: raw.to_string(),
        })
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(ActionCatalog::builtin())
    }
}

/// Extract the body of the first markdown code fence with the given tag.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block with that tag is found.
fn extract_fenced_block<'a>(content: &'a str, tag: &str) -> Option<&'a str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    let newline = after_opening.find('\n')?;
    if after_opening[..newline].trim() != tag {
        return None;
    }
    let body_start = fence_start + 3 + newline + 1;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ResponseParser {
        ResponseParser::default()
    }

    #[test]
    fn test_plain_reply() {
        let output = parser().parse("The capital of France is Paris.").unwrap();
        assert_eq!(
            output,
            ModelOutput::Reply("The capital of France is Paris.".to_string())
        );
    }

    #[test]
    fn test_raw_json_directive() {
        let raw = r#"{"action": "open_url", "args": {"url": "https://youtube.com"}}"#;
        let output = parser().parse(raw).unwrap();
        match output {
            ModelOutput::Action(req) => {
                assert_eq!(req.name, "open_url");
                assert_eq!(req.arguments["url"], "https://youtube.com");
                assert_eq!(req.raw_text, raw);
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_fenced_directive_with_trailing_prose() {
        let raw = "Sure, opening it now.\n```action\n{\"action\": \"launch_app\", \"args\": {\"app\": \"safari\"}}\n```\nDone!";
        let output = parser().parse(raw).unwrap();
        match output {
            ModelOutput::Action(req) => assert_eq!(req.name, "launch_app"),
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_directive_embedded_in_prose() {
        let raw = r#"I'll handle that: {"action": "open_url", "args": {"url": "https://github.com"}} give me a second."#;
        let output = parser().parse(raw).unwrap();
        match output {
            ModelOutput::Action(req) => assert_eq!(req.arguments["url"], "https://github.com"),
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_argument() {
        let raw = r#"{"action": "open_url", "args": {}}"#;
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_unknown_action_name() {
        let raw = r#"{"action": "format_disk", "args": {"disk": "/dev/sda"}}"#;
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_unexpected_argument_rejected() {
        let raw = r#"{"action": "launch_app", "args": {"app": "safari", "force": "true"}}"#;
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_non_string_argument_rejected() {
        let raw = r#"{"action": "open_url", "args": {"url": 42}}"#;
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_invalid_json_in_fenced_block() {
        let raw = "```action\n{not json at all\n```";
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_unterminated_embedded_directive() {
        let raw = r#"Working on it {"action": "open_url", "args": {"url": "https://x.com""#;
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_optional_argument_accepted() {
        let raw = r#"{"action": "run_command", "args": {"command": "ls", "args": "-la"}}"#;
        let output = parser().parse(raw).unwrap();
        match output {
            ModelOutput::Action(req) => {
                assert_eq!(req.name, "run_command");
                assert_eq!(req.arguments["args"], "-la");
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_args_object_fails_when_required() {
        let raw = r#"{"action": "delete_path"}"#;
        let result = parser().parse(raw);
        assert!(matches!(result, Err(AssistantError::MalformedAction(_))));
    }

    #[test]
    fn test_identical_input_parses_identically() {
        let raw = r#"{"action": "open_url", "args": {"url": "https://youtube.com"}}"#;
        let a = parser().parse(raw).unwrap();
        let b = parser().parse(raw).unwrap();
        match (a, b) {
            (ModelOutput::Action(a), ModelOutput::Action(b)) => {
                assert_eq!(a.name, b.name);
                assert_eq!(a.arguments, b.arguments);
            }
            _ => panic!("expected actions"),
        }
    }

    #[test]
    fn test_fence_with_other_tag_is_reply() {
        let raw = "Here is some code:\n```python\nprint('hi')\n```";
        let output = parser().parse(raw).unwrap();
        assert!(matches!(output, ModelOutput::Reply(_)));
    }
}
