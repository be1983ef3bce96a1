//! Structured diagnostic records for runtime failures and anomalies.
//!
//! Node failures never unwind through the scheduler; they are captured as
//! [`ErrorEvent`]s, published on the event bus, and attributed to the
//! `execute` call whose message tree they belong to. Soft anomalies
//! (sequence gaps, stale sequence ids) use the same record shape with
//! their own scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::telemetry::{FormatterMode, PlainFormatter, TelemetryFormatter};

/// A captured failure or anomaly: when it happened, where, the error
/// chain, and free-form tags/context.
///
/// # JSON Serialization Format
///
/// ```json
/// {
///   "when": "2026-08-23T10:30:00Z",
///   "scope": {
///     "scope": "node",
///     "node": "function node#2",
///     "seq": 7
///   },
///   "error": {
///     "message": "node body failed: bad input",
///     "cause": null,
///     "details": null
///   },
///   "tags": ["soft"],
///   "context": null
/// }
/// ```
///
/// The `scope` field is a tagged union discriminated by `"scope"`:
/// `"node"`, `"scheduler"`, `"sequencer"`, or `"graph"`.
///
/// # Examples
///
/// ```
/// use fluxgraph::diagnostics::{CauseChain, ErrorEvent};
/// use serde_json::json;
///
/// let event = ErrorEvent::node("function node#2", Some(7), CauseChain::msg("bad input"))
///     .with_tag("validation")
///     .with_context(json!({"payload_len": 3}));
/// let json_str = serde_json::to_string(&event).unwrap();
/// assert!(json_str.contains("\"node\""));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorEvent {
    #[serde(default = "chrono::Utc::now")]
    pub when: DateTime<Utc>,
    #[serde(default)]
    pub scope: ErrorScope,
    #[serde(default)]
    pub error: CauseChain,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorEvent {
    /// A failure inside a node body, attributed to the message it was
    /// processing when the sequence id is known.
    pub fn node<S: Into<String>>(node: S, seq: Option<u64>, error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Node {
                node: node.into(),
                seq,
            },
            error,
            ..Self::default()
        }
    }

    /// A failure in the scheduler itself (injection, dispatch).
    pub fn scheduler(error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Scheduler,
            error,
            ..Self::default()
        }
    }

    /// A sequence anomaly observed by a Sequencer node.
    pub fn sequencer<S: Into<String>>(node: S, error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Sequencer { node: node.into() },
            error,
            ..Self::default()
        }
    }

    /// A graph-level failure not attributable to one node.
    pub fn graph(error: CauseChain) -> Self {
        Self {
            when: Utc::now(),
            scope: ErrorScope::Graph,
            error,
            ..Self::default()
        }
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

/// Where in the engine an [`ErrorEvent`] originated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Node {
        node: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Scheduler,
    Sequencer {
        node: String,
    },
    #[default]
    Graph,
}

/// A message with an optional chained cause and free-form details.
///
/// Mirrors `std::error::Error::source` chaining in a serializable shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CauseChain {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<CauseChain>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Default for CauseChain {
    fn default() -> Self {
        CauseChain {
            message: String::new(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for CauseChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CauseChain {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c as &dyn std::error::Error)
    }
}

impl CauseChain {
    pub fn msg<M: Into<String>>(m: M) -> Self {
        CauseChain {
            message: m.into(),
            cause: None,
            details: serde_json::Value::Null,
        }
    }

    /// Captures a full `std::error::Error` chain, source by source.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        let mut chain = CauseChain::msg(error.to_string());
        if let Some(source) = error.source() {
            chain.cause = Some(Box::new(Self::from_error(source)));
        }
        chain
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_cause(mut self, cause: CauseChain) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Format error events with explicit color mode control.
///
/// - [`FormatterMode::Auto`]: auto-detects TTY capability (checks stderr)
/// - [`FormatterMode::Colored`]: always includes color codes
/// - [`FormatterMode::Plain`]: never includes color codes
///
/// # Examples
///
/// ```
/// use fluxgraph::diagnostics::{CauseChain, ErrorEvent, pretty_print_with_mode};
/// use fluxgraph::telemetry::FormatterMode;
///
/// let events = vec![ErrorEvent::node("function node#0", None, CauseChain::msg("boom"))];
/// let plain = pretty_print_with_mode(&events, FormatterMode::Plain);
/// assert!(!plain.contains("\x1b["));
/// ```
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

/// Format error events as human-readable text with auto-detected color
/// support. For explicit control use [`pretty_print_with_mode`].
pub fn pretty_print(events: &[ErrorEvent]) -> String {
    pretty_print_with_mode(events, FormatterMode::Auto)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_serializes_as_tagged_union() {
        let event = ErrorEvent::sequencer("sequencer node#3", CauseChain::msg("gap at 5"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["scope"]["scope"], "sequencer");
        assert_eq!(json["scope"]["node"], "sequencer node#3");
    }

    #[test]
    fn cause_chain_preserves_sources() {
        let io_err = std::io::Error::other("inner");
        let chain = CauseChain::msg("outer").with_cause(CauseChain::from_error(&io_err));
        assert_eq!(chain.cause.as_ref().unwrap().message, "inner");
        let rendered = pretty_print_with_mode(
            &[ErrorEvent::graph(chain)],
            FormatterMode::Plain,
        );
        assert!(rendered.contains("error: outer"));
        assert!(rendered.contains("cause: inner"));
    }
}
