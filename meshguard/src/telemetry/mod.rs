use std::io::IsTerminal;

use crate::channels::errors::ErrorEvent;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

/// Explicit color control for [`PlainFormatter`], since auto-detection is
/// not always desirable (log files, CI output capture).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormatterMode {
    #[default]
    Auto,
    Colored,
    Plain,
}

impl FormatterMode {
    fn colored(self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender>;
}

pub struct PlainFormatter {
    mode: FormatterMode,
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlainFormatter {
    #[must_use]
    pub fn new() -> Self {
        Self { mode: FormatterMode::Auto }
    }

    #[must_use]
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn wrap(&self, color: &str, text: &str) -> String {
        if self.mode.colored() {
            format!("{color}{text}{RESET_COLOR}")
        } else {
            text.to_string()
        }
    }
}

fn format_error_chain(error: &crate::channels::errors::LadderError, indent: usize, formatter: &PlainFormatter) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cause) = &error.cause {
        let indent_str = "  ".repeat(indent);
        lines.push(format!("{}\n", formatter.wrap(LINE_COLOR, &format!("{indent_str}cause: {}", cause.message))));
        lines.extend(format_error_chain(cause, indent + 1, formatter));
    }
    lines
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{}\n", self.wrap(LINE_COLOR, &event.to_string()));
        EventRender { context: event.scope_label(), lines: vec![line] }
    }

    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender> {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mut lines = Vec::new();
                let scope_str = self.wrap(CONTEXT_COLOR, &format!("{:?}", e.scope));
                lines.push(format!("[{i}] {} | {scope_str}\n", e.when));
                lines.push(format!("{}\n", self.wrap(LINE_COLOR, &format!("  error: {}", e.error.message))));
                lines.extend(format_error_chain(&e.error, 1, self));
                if !e.tags.is_empty() {
                    lines.push(format!("{}\n", self.wrap(LINE_COLOR, &format!("  tags: {:?}", e.tags))));
                }
                if !e.context.is_null() {
                    lines.push(format!("{}\n", self.wrap(LINE_COLOR, &format!("  context: {}", e.context))));
                }
                EventRender { context: Some(format!("{:?}", e.scope)), lines }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::errors::LadderError;
    use crate::types::AgentId;

    #[test]
    fn plain_mode_never_emits_ansi() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Plain);
        let render = formatter.render_event(&Event::agent_started(AgentId::new("a-1")));
        assert!(!render.lines[0].contains("\x1b["));
    }

    #[test]
    fn colored_mode_always_emits_ansi() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Colored);
        let render = formatter.render_event(&Event::agent_started(AgentId::new("a-1")));
        assert!(render.lines[0].contains("\x1b["));
    }

    #[test]
    fn render_errors_includes_cause_chain() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Plain);
        let err = LadderError::msg("outer").with_cause(LadderError::msg("inner"));
        let events = vec![ErrorEvent::system(err)];
        let renders = formatter.render_errors(&events);
        assert!(renders[0].lines.iter().any(|l| l.contains("inner")));
    }
}
