//! Rendering of events and diagnostics for human consumption, plus
//! tracing subscriber setup.

use std::io::IsTerminal;

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::diagnostics::{CauseChain, ErrorEvent};
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Install the global tracing subscriber: `RUST_LOG`-style filtering,
/// compact fmt output, and span-trace capture for diagnostics.
///
/// Call once at program startup; subsequent calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fluxgraph=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(ErrorLayer::default())
        .try_init();
}

/// Formatter color mode for telemetry output.
///
/// - [`FormatterMode::Auto`]: detects TTY capability via `stderr.is_terminal()`
/// - [`FormatterMode::Colored`]: always include color codes
/// - [`FormatterMode::Plain`]: never include color codes (for logs/files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Auto-detect TTY capability (checks `stderr.is_terminal()`)
    #[default]
    Auto,
    /// Always include ANSI color codes
    Colored,
    /// Never include ANSI color codes
    Plain,
}

impl FormatterMode {
    /// `Colored` when stderr is a terminal, otherwise `Plain`.
    pub fn auto_detect() -> Self {
        if std::io::stderr().is_terminal() {
            FormatterMode::Colored
        } else {
            FormatterMode::Plain
        }
    }

    /// Whether this mode should use colored output. `Auto` performs TTY
    /// detection on each call.
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Rendered output for a telemetry item, consumable by sinks.
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

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender>;
}

/// Plain text formatter with optional ANSI color codes, controlled by
/// [`FormatterMode`].
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl PlainFormatter {
    /// Formatter with auto-detected color mode.
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    /// Formatter with explicit color mode.
    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }

    fn color<'a>(&self, ansi_code: &'a str) -> &'a str {
        if self.mode.is_colored() { ansi_code } else { "" }
    }

    fn reset(&self) -> &str {
        if self.mode.is_colored() { RESET_COLOR } else { "" }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn format_error_chain(error: &CauseChain, indent: usize, use_color: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(cause) = &error.cause {
        let indent_str = "  ".repeat(indent);
        if use_color {
            lines.push(format!(
                "{LINE_COLOR}{}cause: {}{RESET_COLOR}\n",
                indent_str, cause.message
            ));
        } else {
            lines.push(format!("{}cause: {}\n", indent_str, cause.message));
        }
        lines.extend(format_error_chain(cause, indent + 1, use_color));
    }
    lines
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = if self.mode.is_colored() {
            format!("{LINE_COLOR}{event}{RESET_COLOR}\n")
        } else {
            format!("{event}\n")
        };
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![line],
        }
    }

    fn render_errors(&self, errors: &[ErrorEvent]) -> Vec<EventRender> {
        let use_color = self.mode.is_colored();
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let mut lines = Vec::new();
                let scope_str = if use_color {
                    format!("{}{:?}{}", self.color(CONTEXT_COLOR), e.scope, self.reset())
                } else {
                    format!("{:?}", e.scope)
                };
                lines.push(format!("[{}] {} | {}\n", i, e.when, scope_str));

                if use_color {
                    lines.push(format!(
                        "{}  error: {}{}\n",
                        self.color(LINE_COLOR),
                        e.error.message,
                        self.reset()
                    ));
                } else {
                    lines.push(format!("  error: {}\n", e.error.message));
                }

                lines.extend(format_error_chain(&e.error, 1, use_color));

                if !e.tags.is_empty() {
                    if use_color {
                        lines.push(format!(
                            "{}  tags: {:?}{}\n",
                            self.color(LINE_COLOR),
                            e.tags,
                            self.reset()
                        ));
                    } else {
                        lines.push(format!("  tags: {:?}\n", e.tags));
                    }
                }

                if !e.context.is_null() {
                    if use_color {
                        lines.push(format!(
                            "{}  context: {}{}\n",
                            self.color(LINE_COLOR),
                            e.context,
                            self.reset()
                        ));
                    } else {
                        lines.push(format!("  context: {}\n", e.context));
                    }
                }

                EventRender {
                    context: Some(format!("{:?}", e.scope)),
                    lines,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_mode_has_no_ansi_codes() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Plain);
        let render = formatter.render_event(&Event::scheduler("inject", "admitted"));
        assert!(!render.join_lines().contains("\x1b["));
    }

    #[test]
    fn colored_mode_wraps_lines() {
        let formatter = PlainFormatter::with_mode(FormatterMode::Colored);
        let render = formatter.render_event(&Event::scheduler("inject", "admitted"));
        assert!(render.join_lines().starts_with(LINE_COLOR));
    }
}
