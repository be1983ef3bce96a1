use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A structured runtime event published on the [`EventBus`](super::EventBus).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Node(NodeEvent),
    Scheduler(SchedulerEvent),
    Sequencer(SequencerEvent),
}

impl Event {
    /// A node body failure, attributed to the message being processed when
    /// its sequence id is known.
    pub fn node_failure(
        node: impl Into<String>,
        seq: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Event::Node(NodeEvent {
            node: node.into(),
            seq,
            scope: "failure".to_string(),
            message: message.into(),
        })
    }

    /// An informational event from a node task.
    pub fn node_message(node: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Node(NodeEvent {
            node: node.into(),
            seq: None,
            scope: "info".to_string(),
            message: message.into(),
        })
    }

    /// A scheduler-level event (injection rejected, drain started, ...).
    pub fn scheduler(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Scheduler(SchedulerEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// A Sequencer gave up waiting for a missing sequence id and advanced
    /// past it.
    pub fn sequence_gap(node: impl Into<String>, expected: u64) -> Self {
        Event::Sequencer(SequencerEvent {
            node: node.into(),
            expected,
            observed: None,
            message: format!("gap: sequence id {expected} never arrived; advancing"),
        })
    }

    /// A Sequencer received a sequence id below its release cursor and
    /// forwarded the message out of order.
    pub fn stale_sequence(node: impl Into<String>, expected: u64, observed: u64) -> Self {
        Event::Sequencer(SequencerEvent {
            node: node.into(),
            expected,
            observed: Some(observed),
            message: format!(
                "stale: sequence id {observed} arrived after cursor passed {expected}; forwarding out of order"
            ),
        })
    }

    pub fn scope_label(&self) -> &str {
        match self {
            Event::Node(node) => &node.scope,
            Event::Scheduler(scheduler) => &scheduler.scope,
            Event::Sequencer(_) => "sequence",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Event::Node(node) => &node.message,
            Event::Scheduler(scheduler) => &scheduler.message,
            Event::Sequencer(sequencer) => &sequencer.message,
        }
    }

    /// Convert the event to a JSON value with a normalized schema:
    ///
    /// ```json
    /// {
    ///   "type": "node" | "scheduler" | "sequencer",
    ///   "scope": "scope_label",
    ///   "message": "event_message",
    ///   "timestamp": "2026-08-23T12:34:56.789Z",
    ///   "metadata": { /* variant-specific fields */ }
    /// }
    /// ```
    ///
    /// # Example
    ///
    /// ```
    /// use fluxgraph::event_bus::Event;
    ///
    /// let event = Event::node_failure("function node#2", Some(7), "bad input");
    /// let json = event.to_json_value();
    /// assert_eq!(json["type"], "node");
    /// assert_eq!(json["metadata"]["seq"], 7);
    /// ```
    pub fn to_json_value(&self) -> Value {
        let (event_type, metadata) = match self {
            Event::Node(node) => {
                let mut meta = serde_json::Map::new();
                meta.insert("node".to_string(), json!(node.node));
                if let Some(seq) = node.seq {
                    meta.insert("seq".to_string(), json!(seq));
                }
                ("node", Value::Object(meta))
            }
            Event::Scheduler(_) => ("scheduler", Value::Object(serde_json::Map::new())),
            Event::Sequencer(sequencer) => {
                let mut meta = serde_json::Map::new();
                meta.insert("node".to_string(), json!(sequencer.node));
                meta.insert("expected".to_string(), json!(sequencer.expected));
                if let Some(observed) = sequencer.observed {
                    meta.insert("observed".to_string(), json!(observed));
                }
                ("sequencer", Value::Object(meta))
            }
        };

        json!({
            "type": event_type,
            "scope": self.scope_label(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": metadata,
        })
    }

    /// Compact JSON string form of [`to_json_value`](Self::to_json_value).
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Node(node) => match node.seq {
                Some(seq) => write!(f, "[{}@{seq}] {}", node.node, node.message),
                None => write!(f, "[{}] {}", node.node, node.message),
            },
            Event::Scheduler(scheduler) => {
                write!(f, "[scheduler:{}] {}", scheduler.scope, scheduler.message)
            }
            Event::Sequencer(sequencer) => write!(f, "[{}] {}", sequencer.node, sequencer.message),
        }
    }
}

/// Event originating in a node task.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEvent {
    pub node: String,
    pub seq: Option<u64>,
    pub scope: String,
    pub message: String,
}

/// Event originating in the scheduler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerEvent {
    pub scope: String,
    pub message: String,
}

/// Sequence anomaly observed by a Sequencer node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequencerEvent {
    pub node: String,
    pub expected: u64,
    pub observed: Option<u64>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_attribution() {
        let event = Event::node_failure("function node#1", Some(4), "boom");
        assert_eq!(event.to_string(), "[function node#1@4] boom");
        let gap = Event::sequence_gap("sequencer node#2", 9);
        assert!(gap.to_string().contains("sequence id 9"));
    }

    #[test]
    fn json_schema_is_normalized() {
        let event = Event::stale_sequence("sequencer node#2", 5, 3);
        let json = event.to_json_value();
        assert_eq!(json["type"], "sequencer");
        assert_eq!(json["metadata"]["expected"], 5);
        assert_eq!(json["metadata"]["observed"], 3);
    }
}
