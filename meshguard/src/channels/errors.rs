use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// An error event with scope, error details, tags, and context — the unit
/// the audit/telemetry layer renders for operators (spec §7 propagation
/// policy: "Audit entries capture the full typed error for forensics").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: LadderError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    pub fn agent<S: Into<String>>(agent_id: S, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Agent { agent_id: agent_id.into() },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn pool(error: LadderError) -> Self {
        Self { when: Utc::now(), scope: ErrorScope::Pool, error, tags: Vec::new(), context: serde_json::Value::Null }
    }

    pub fn workflow<S: Into<String>>(workflow_id: S, step: usize, error: LadderError) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Workflow { workflow_id: workflow_id.into(), step },
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    pub fn system(error: LadderError) -> Self {
        Self { when: Utc::now(), scope: ErrorScope::System, error, tags: Vec::new(), context: serde_json::Value::Null }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Agent { agent_id: String },
    Pool,
    Workflow { workflow_id: String, step: usize },
    #[default]
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LadderError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<LadderError>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for LadderError {
    fn default() -> Self {
        LadderError { message: String::new(), cause: None, details: serde_json::Value::Null }
    }
}

impl std::fmt::Display for LadderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LadderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl LadderError {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        LadderError { message: m.into(), cause: None, details: serde_json::Value::Null }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_cause(mut self, cause: LadderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Format error events as human-readable text, with explicit color control.
pub fn pretty_print_with_mode(events: &[ErrorEvent], mode: FormatterMode) -> String {
    let formatter = PlainFormatter::with_mode(mode);
    let renders = formatter.render_errors(events);
    let mut out = String::new();
    for (idx, render) in renders.into_iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        for line in render.lines {
            out.push_str(&line);
        }
    }
    out
}

/// Format error events as human-readable text with auto-detected color support.
pub fn pretty_print(events: &[ErrorEvent]) -> String {
    pretty_print_with_mode(events, FormatterMode::Auto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_scope_round_trips_through_json() {
        let event = ErrorEvent::agent("a-1", LadderError::msg("boom")).with_tag("retryable");
        let json = serde_json::to_string(&event).unwrap();
        let back: ErrorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn pretty_print_plain_has_no_ansi_codes() {
        let events = vec![ErrorEvent::system(LadderError::msg("failed"))];
        let out = pretty_print_with_mode(&events, FormatterMode::Plain);
        assert!(!out.contains("\x1b["));
    }
}
