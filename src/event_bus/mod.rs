//! Runtime observability: structured events fanned out to pluggable sinks.
//!
//! Node tasks and the scheduler publish [`Event`]s onto a shared
//! [`EventBus`]; a background listener broadcasts each event to every
//! attached [`EventSink`]. The default sink prints to stdout; tests attach
//! a [`MemorySink`], streaming consumers a [`ChannelSink`].

mod bus;
mod event;
mod sink;

pub use bus::EventBus;
pub use event::{Event, NodeEvent, SchedulerEvent, SequencerEvent};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
