//! Payload sanitization: secret redaction, truncation and depth limiting.
//!
//! Sanitization is total. Every input produces an output; a value that cannot
//! be represented safely degrades to the redaction marker instead of failing
//! the event.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use agentlog_store::{Event, Payload};

use super::error::ValidationError;

pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";
pub const DEFAULT_TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Redaction pattern for preventing secret leakage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRule {
    pub pattern_name: String,
    pub regex_pattern: String,
    /// Used for in-place scrubbing of free text (`message`, `error_message`).
    /// Payload values that match are replaced wholesale by the marker.
    pub replacement: String,
}

impl RedactionRule {
    pub fn new(
        pattern_name: impl Into<String>,
        regex_pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            pattern_name: pattern_name.into(),
            regex_pattern: regex_pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn env_var(name: &str) -> Self {
        Self::new(
            name,
            format!(r"(?i){}=[^\s\[]\S*", regex::escape(name)),
            format!("{}=[REDACTED]", name),
        )
    }

    pub fn bearer_token() -> Self {
        Self::new(
            "bearer_token",
            r"(?i)bearer\s+[a-zA-Z0-9\-._~+/]+=*",
            "Bearer [REDACTED]",
        )
    }

    /// `api_key=...`, `password: ...` and similar assignments.
    pub fn credential_assignment() -> Self {
        Self::new(
            "credential_assignment",
            r"(?i)\b(api[_-]?key|secret|password|passwd|access[_-]?token)\s*[:=]\s*[^\s\[]\S*",
            "${1}=[REDACTED]",
        )
    }

    /// Provider-style secret keys (`sk-...`).
    pub fn provider_api_key() -> Self {
        Self::new(
            "provider_api_key",
            r"\bsk-[A-Za-z0-9_\-]{16,}",
            "[REDACTED]",
        )
    }

    pub fn aws_access_key() -> Self {
        Self::new("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b", "[REDACTED]")
    }

    pub fn github_token() -> Self {
        Self::new(
            "github_token",
            r"\bgh[pousr]_[A-Za-z0-9]{36,}",
            "[REDACTED]",
        )
    }

    pub fn jwt() -> Self {
        Self::new(
            "jwt",
            r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+",
            "[REDACTED]",
        )
    }

    pub fn private_key_block() -> Self {
        Self::new(
            "private_key_block",
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?(-----END [A-Z ]*PRIVATE KEY-----|$)",
            "[REDACTED]",
        )
    }

    /// The rule set used when none is configured.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::private_key_block(),
            Self::bearer_token(),
            Self::credential_assignment(),
            Self::provider_api_key(),
            Self::aws_access_key(),
            Self::github_token(),
            Self::jwt(),
        ]
    }
}

fn default_sensitive_keys() -> Vec<String> {
    [
        "password",
        "passwd",
        "secret",
        "token",
        "api_key",
        "apikey",
        "authorization",
        "private_key",
        "credentials",
        "cookie",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Sanitizer policy (the `[sanitizer]` config section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    pub redaction_rules: Vec<RedactionRule>,
    /// Values under these keys are redacted regardless of content.
    pub sensitive_keys: Vec<String>,
    pub max_string_len: usize,
    pub max_depth: usize,
    pub redaction_marker: String,
    pub truncation_marker: String,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            redaction_rules: RedactionRule::defaults(),
            sensitive_keys: default_sensitive_keys(),
            max_string_len: 10_000,
            max_depth: 8,
            redaction_marker: DEFAULT_REDACTION_MARKER.to_string(),
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    regex: Regex,
    replacement: String,
}

/// Compiled sanitizer. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<CompiledRule>,
    sensitive_keys: Vec<String>,
    max_string_len: usize,
    max_depth: usize,
    redaction_marker: String,
    truncation_marker: String,
}

impl Default for Sanitizer {
    fn default() -> Self {
        // Built-in patterns always compile; fall back to no rules rather than panic.
        Self::new(&SanitizerConfig::default()).unwrap_or_else(|e| {
            warn!(error = %e, "default redaction rules failed to compile");
            Self::without_rules(&SanitizerConfig::default())
        })
    }
}

impl Sanitizer {
    /// Compile a sanitizer. Fails only on an invalid regex pattern.
    pub fn new(config: &SanitizerConfig) -> Result<Self, ValidationError> {
        let mut rules = Vec::with_capacity(config.redaction_rules.len());
        for rule in &config.redaction_rules {
            let regex = Regex::new(&rule.regex_pattern).map_err(|e| ValidationError::InvalidField {
                field: format!("sanitizer.redaction_rules.{}", rule.pattern_name),
                reason: e.to_string(),
            })?;
            rules.push(CompiledRule {
                name: rule.pattern_name.clone(),
                regex,
                replacement: rule.replacement.clone(),
            });
        }
        let mut sanitizer = Self::without_rules(config);
        sanitizer.rules = rules;
        Ok(sanitizer)
    }

    fn without_rules(config: &SanitizerConfig) -> Self {
        Self {
            rules: Vec::new(),
            sensitive_keys: config
                .sensitive_keys
                .iter()
                .map(|k| normalize_key(k))
                .collect(),
            max_string_len: config.max_string_len.max(1),
            max_depth: config.max_depth.max(1),
            redaction_marker: config.redaction_marker.clone(),
            truncation_marker: config.truncation_marker.clone(),
        }
    }

    pub fn redaction_marker(&self) -> &str {
        &self.redaction_marker
    }

    /// Names of the rules whose pattern occurs in `text`.
    pub fn matching_rules(&self, text: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.regex.is_match(text))
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Whether any secret pattern occurs in `text`.
    pub fn contains_secret(&self, text: &str) -> bool {
        self.rules.iter().any(|r| r.regex.is_match(text))
    }

    /// Whether `key` names a field whose value is always redacted.
    ///
    /// Matches whole `_`-separated segments, so `access_token` is sensitive
    /// but `max_tokens` is not.
    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let key = normalize_key(key);
        self.sensitive_keys.iter().any(|s| {
            key == *s
                || key.ends_with(&format!("_{s}"))
                || key.starts_with(&format!("{s}_"))
                || key.contains(&format!("_{s}_"))
        })
    }

    /// Scrub free text in place: secret matches are replaced by each rule's
    /// replacement, then the result is truncated.
    pub fn scrub_text(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            if rule.regex.is_match(&out) {
                out = rule
                    .regex
                    .replace_all(&out, rule.replacement.as_str())
                    .into_owned();
            }
        }
        self.truncate(out)
    }

    fn truncate(&self, s: String) -> String {
        if s.chars().count() <= self.max_string_len {
            return s;
        }
        let mut out: String = s.chars().take(self.max_string_len).collect();
        out.push_str(&self.truncation_marker);
        out
    }

    fn sanitize_value(&self, value: &Value, depth: usize) -> Value {
        if depth > self.max_depth {
            return Value::String(self.redaction_marker.clone());
        }
        match value {
            Value::String(s) => {
                if self.contains_secret(s) {
                    Value::String(self.redaction_marker.clone())
                } else {
                    Value::String(self.truncate(s.clone()))
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.sanitize_value(v, depth + 1))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .enumerate()
                    .map(|(i, (k, v))| {
                        let clean = if self.is_sensitive_key(k) {
                            Value::String(self.redaction_marker.clone())
                        } else {
                            self.sanitize_value(v, depth + 1)
                        };
                        (self.clean_key(i, k), clean)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Sanitize one payload map.
    pub fn sanitize_payload(&self, payload: &Payload) -> Payload {
        payload
            .iter()
            .enumerate()
            .map(|(i, (k, v))| {
                let clean = if self.is_sensitive_key(k) {
                    Value::String(self.redaction_marker.clone())
                } else {
                    self.sanitize_value(v, 1)
                };
                (self.clean_key(i, k), clean)
            })
            .collect()
    }

    /// A key matching a secret pattern becomes the marker suffixed with its
    /// position so sibling keys stay distinct.
    fn clean_key(&self, index: usize, key: &str) -> String {
        if self.contains_secret(key) {
            format!("{}#{index}", self.redaction_marker)
        } else {
            key.to_string()
        }
    }

    /// Sanitize every free-form field of an event.
    pub fn sanitize_event(&self, event: &mut Event) {
        event.message = self.scrub_text(&event.message);
        event.input_data = self.sanitize_payload(&event.input_data);
        event.output_data = self.sanitize_payload(&event.output_data);
        event.metadata = self.sanitize_payload(&event.metadata);
        if let Some(msg) = event.error_message.take() {
            event.error_message = Some(self.scrub_text(&msg));
        }
        if let Some(trace) = event.stack_trace.take() {
            event.stack_trace = Some(self.scrub_text(&trace));
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace(&['-', ' ', '.'][..], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn secret_values_are_redacted_wholesale() {
        let s = Sanitizer::default();
        let clean = s.sanitize_payload(&payload(json!({
            "header": "Authorization: Bearer abc.def-123",
            "note": "key is sk-abcdefghijklmnopqrstuvwx",
            "plain": "hello",
        })));
        assert_eq!(clean["header"], json!("[REDACTED]"));
        assert_eq!(clean["note"], json!("[REDACTED]"));
        assert_eq!(clean["plain"], json!("hello"));
    }

    #[test]
    fn secret_shaped_keys_are_redacted() {
        let s = Sanitizer::default();
        let clean = s.sanitize_payload(&payload(json!({
            "headers": {
                "sk-ABCDEFGHIJKLMNOPQRSTUVWXYZ123456": "v",
                "sk-ZYXWVUTSRQPONMLKJIHGFEDCBA654321": "w",
                "accept": "json",
            },
            "sk-0123456789abcdefghijklmn": 1,
        })));

        let rendered = serde_json::to_string(&clean).unwrap();
        assert!(!rendered.contains("sk-"));
        assert!(!s.contains_secret(&rendered));

        let headers = clean["headers"].as_object().unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers["accept"], json!("json"));
        assert_eq!(headers.values().filter(|v| **v == json!("v") || **v == json!("w")).count(), 2);
        assert!(clean.keys().any(|k| k.starts_with("[REDACTED]#")));
    }

    #[test]
    fn sensitive_keys_match_whole_segments() {
        let s = Sanitizer::default();
        assert!(s.is_sensitive_key("password"));
        assert!(s.is_sensitive_key("OPENAI_API_KEY"));
        assert!(s.is_sensitive_key("x-api-key"));
        assert!(s.is_sensitive_key("access_token"));
        assert!(!s.is_sensitive_key("max_tokens"));
        assert!(!s.is_sensitive_key("tokenizer"));

        let clean = s.sanitize_payload(&payload(json!({
            "db": {"password": 1234, "host": "localhost"},
            "max_tokens": 256,
        })));
        assert_eq!(clean["db"]["password"], json!("[REDACTED]"));
        assert_eq!(clean["db"]["host"], json!("localhost"));
        assert_eq!(clean["max_tokens"], json!(256));
    }

    #[test]
    fn long_strings_are_truncated_with_marker() {
        let config = SanitizerConfig {
            max_string_len: 5,
            ..SanitizerConfig::default()
        };
        let s = Sanitizer::new(&config).unwrap();
        let clean = s.sanitize_payload(&payload(json!({"text": "abcdefghij"})));
        assert_eq!(clean["text"], json!("abcde...[TRUNCATED]"));
    }

    #[test]
    fn deep_structures_collapse_to_marker() {
        let config = SanitizerConfig {
            max_depth: 2,
            ..SanitizerConfig::default()
        };
        let s = Sanitizer::new(&config).unwrap();
        let clean = s.sanitize_payload(&payload(json!({"a": {"b": {"c": 1}}})));
        assert_eq!(clean["a"]["b"]["c"], json!("[REDACTED]"));
    }

    #[test]
    fn free_text_is_scrubbed_in_place() {
        let s = Sanitizer::default();
        let text = s.scrub_text("calling api with api_key=hunter2 and Bearer tok.en");
        assert!(text.contains("api_key=[REDACTED]"));
        assert!(text.contains("Bearer [REDACTED]"));
        assert!(!s.contains_secret(&text));
    }

    #[test]
    fn env_var_rule_from_enterprise_policy() {
        let config = SanitizerConfig {
            redaction_rules: vec![RedactionRule::env_var("DATABASE_URL")],
            ..SanitizerConfig::default()
        };
        let s = Sanitizer::new(&config).unwrap();
        let text = s.scrub_text("DATABASE_URL=postgres://u:p@h/db started");
        assert_eq!(text, "DATABASE_URL=[REDACTED] started");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let config = SanitizerConfig {
            redaction_rules: vec![RedactionRule::new("broken", "(unclosed", "x")],
            ..SanitizerConfig::default()
        };
        assert!(matches!(
            Sanitizer::new(&config),
            Err(ValidationError::InvalidField { .. })
        ));
    }
}
