//! Raw producer input and its normalization into a stored [`Event`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentlog_store::{Event, EventId, EventType, LogLevel, Payload};

use super::error::ValidationError;
use super::sanitize::Sanitizer;

/// Loosely typed event as submitted by a producer.
///
/// Everything is optional here; [`normalize`] decides what is required and
/// well-typed. This is also the body accepted by `POST /logs/test`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    pub event_type: Option<Value>,
    pub level: Option<Value>,
    pub message: Option<Value>,
    /// RFC 3339 string or epoch milliseconds. Defaults to now.
    pub timestamp: Option<Value>,

    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub component: Option<String>,
    pub function_name: Option<String>,
    pub tool_name: Option<String>,
    pub correlation_id: Option<String>,
    pub run_id: Option<String>,

    pub input_data: Option<Value>,
    pub output_data: Option<Value>,
    pub metadata: Option<Value>,

    pub duration_ms: Option<Value>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,

    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
}

impl RawEvent {
    pub fn new(event_type: EventType, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            event_type: Some(Value::String(event_type.as_str().to_string())),
            level: Some(Value::String(level.as_str().to_string())),
            message: Some(Value::String(message.into())),
            ..Self::default()
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(Value::String(timestamp.to_rfc3339()));
        self
    }

    pub fn input(mut self, input: Value) -> Self {
        self.input_data = Some(input);
        self
    }

    pub fn output(mut self, output: Value) -> Self {
        self.output_data = Some(output);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = serde_json::Number::from_f64(duration_ms).map(Value::Number);
        self
    }
}

fn required_str<'a>(field: &str, value: &'a Option<Value>) -> Result<&'a str, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::MissingField {
            field: field.to_string(),
        }),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: format!("expected string, got {}", json_kind(other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn payload(field: &str, value: Option<Value>) -> Result<Payload, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(Payload::new()),
        Some(Value::Object(map)) => Ok(map.into_iter().collect()),
        Some(other) => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: format!("expected object, got {}", json_kind(&other)),
        }),
    }
}

fn timestamp(value: Option<Value>) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidField {
        field: "timestamp".to_string(),
        reason,
    };
    match value {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| invalid(e.to_string())),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| invalid(format!("epoch milliseconds out of range: {n}"))),
        Some(other) => Err(invalid(format!(
            "expected RFC 3339 string or epoch milliseconds, got {}",
            json_kind(&other)
        ))),
    }
}

fn non_negative(field: &str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ValidationError::InvalidField {
            field: field.to_string(),
            reason: format!("must be a finite number >= 0, got {v}"),
        }),
        other => Ok(other),
    }
}

/// Validate and sanitize a raw event into a stored [`Event`].
///
/// Checks that `event_type`, `level` and `message` are present and
/// well-typed, then runs the sanitizer over payloads, `message`,
/// `error_message` and `stack_trace`. Writes nothing.
pub fn normalize(raw: RawEvent, sanitizer: &Sanitizer) -> Result<Event, ValidationError> {
    let event_type_str = required_str("event_type", &raw.event_type)?;
    let event_type: EventType =
        event_type_str
            .parse()
            .map_err(|_| ValidationError::UnknownEventType {
                value: event_type_str.to_string(),
            })?;

    let level_str = required_str("level", &raw.level)?;
    let level: LogLevel = level_str
        .parse()
        .map_err(|_| ValidationError::UnknownLevel {
            value: level_str.to_string(),
        })?;

    let message = required_str("message", &raw.message)?.to_string();

    let duration_ms = match raw.duration_ms {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(other) => {
            return Err(ValidationError::InvalidField {
                field: "duration_ms".to_string(),
                reason: format!("expected number, got {}", json_kind(&other)),
            })
        }
    };
    let duration_ms = non_negative("duration_ms", Some(duration_ms))?.unwrap_or(0.0);

    let mut event = Event {
        event_id: EventId::new(),
        timestamp: timestamp(raw.timestamp)?,
        event_type,
        level,
        message,
        agent_id: raw.agent_id,
        session_id: raw.session_id,
        user_id: raw.user_id,
        component: raw.component,
        function_name: raw.function_name,
        tool_name: raw.tool_name,
        correlation_id: raw.correlation_id,
        run_id: raw.run_id,
        input_data: payload("input_data", raw.input_data)?,
        output_data: payload("output_data", raw.output_data)?,
        metadata: payload("metadata", raw.metadata)?,
        duration_ms,
        cpu_usage: non_negative("cpu_usage", raw.cpu_usage)?,
        memory_usage: non_negative("memory_usage", raw.memory_usage)?,
        error_type: raw.error_type,
        error_message: raw.error_message,
        stack_trace: raw.stack_trace,
    };
    sanitizer.sanitize_event(&mut event);
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_typed_fields() {
        let raw = RawEvent::new(EventType::ToolCall, LogLevel::Info, "called search")
            .agent("a1")
            .input(json!({"query": "rust"}))
            .duration_ms(12.5);
        let event = normalize(raw, &Sanitizer::default()).unwrap();
        assert_eq!(event.event_type, EventType::ToolCall);
        assert_eq!(event.agent_id.as_deref(), Some("a1"));
        assert_eq!(event.input_data["query"], json!("rust"));
        assert_eq!(event.duration_ms, 12.5);
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = normalize(RawEvent::default(), &Sanitizer::default()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "event_type".into()
            }
        );

        let raw = RawEvent {
            event_type: Some(json!("tool_call")),
            level: Some(json!("info")),
            message: Some(json!(42)),
            ..RawEvent::default()
        };
        assert!(matches!(
            normalize(raw, &Sanitizer::default()),
            Err(ValidationError::InvalidField { .. })
        ));
    }

    #[test]
    fn unknown_enums_are_rejected() {
        let raw = RawEvent {
            event_type: Some(json!("teleport")),
            level: Some(json!("info")),
            message: Some(json!("x")),
            ..RawEvent::default()
        };
        assert!(matches!(
            normalize(raw, &Sanitizer::default()),
            Err(ValidationError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn payload_must_be_an_object() {
        let raw = RawEvent::new(EventType::System, LogLevel::Info, "x").input(json!([1, 2]));
        assert!(matches!(
            normalize(raw, &Sanitizer::default()),
            Err(ValidationError::InvalidField { .. })
        ));
    }

    #[test]
    fn epoch_millis_timestamp_is_accepted() {
        let raw = RawEvent {
            timestamp: Some(json!(1_700_000_000_000i64)),
            ..RawEvent::new(EventType::System, LogLevel::Info, "x")
        };
        let event = normalize(raw, &Sanitizer::default()).unwrap();
        assert_eq!(event.timestamp_ms(), 1_700_000_000_000);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let raw = RawEvent::new(EventType::System, LogLevel::Info, "x").duration_ms(-1.0);
        assert!(normalize(raw, &Sanitizer::default()).is_err());
    }

    #[test]
    fn secrets_never_survive_normalization() {
        let s = Sanitizer::default();
        let raw = RawEvent {
            error_message: Some("auth failed for Bearer abc123".into()),
            ..RawEvent::new(
                EventType::Error,
                LogLevel::Error,
                "retrying with password=hunter2",
            )
            .input(json!({"headers": {"authorization": "Bearer abc123"}, "key": "sk-0123456789abcdefghij"}))
        };
        let event = normalize(raw, &s).unwrap();
        assert!(!s.contains_secret(&event.message));
        assert!(!s.contains_secret(event.error_message.as_deref().unwrap()));
        let body = serde_json::to_string(&event.input_data).unwrap();
        assert!(!s.contains_secret(&body));
        assert!(!body.contains("abc123"));
    }
}
