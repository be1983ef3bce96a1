use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::oneshot, task};
use tracing::warn;

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Receives events from the scheduler and node tasks and broadcasts them
/// to every attached sink.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Arc<dyn EventSink>>>>,
    event_channel: (flume::Sender<Event>, flume::Receiver<Event>),
    listener: Mutex<Option<ListenerState>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Create an EventBus with a single sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Arc::new(sink)])
    }

    /// Create an EventBus with multiple sinks.
    pub fn with_sinks(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            event_channel: flume::unbounded(),
            listener: Mutex::new(None),
        }
    }

    /// Dynamically add a sink; events published afterwards reach it.
    ///
    /// # Example
    /// ```no_run
    /// use std::sync::Arc;
    /// use fluxgraph::event_bus::{EventBus, MemorySink};
    ///
    /// let bus = EventBus::default();
    /// let sink = MemorySink::new();
    /// bus.add_sink(Arc::new(sink.clone()));
    /// // Later: inspect sink.snapshot()
    /// ```
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.lock().push(sink);
    }

    /// Clone of the sender side so producers can publish events.
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.event_channel.0.clone()
    }

    /// Spawn the background task that forwards events to all sinks.
    /// Idempotent: calling multiple times has no effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn listen_for_events(&self) {
        let mut guard = self.listener.lock();
        if guard.is_some() {
            return;
        }

        let receiver = self.event_channel.1.clone();
        let sinks = Arc::clone(&self.sinks);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                // Biased towards the channel so queued events drain before
                // a shutdown request is honored.
                tokio::select! {
                    biased;
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => {
                            let sinks = sinks.lock().clone();
                            for sink in &sinks {
                                if let Err(e) = sink.handle(&event) {
                                    warn!(error = %e, "event sink failed");
                                }
                            }
                        }
                    },
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stop the background listener, delivering nothing further.
    pub async fn stop_listener(&self) {
        let state = self.listener.lock().take();
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(state) = self.listener.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::super::sink::MemorySink;
    use super::*;

    #[tokio::test]
    async fn events_reach_all_sinks() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let bus = EventBus::with_sink(first.clone());
        bus.add_sink(Arc::new(second.clone()));
        bus.listen_for_events();

        let sender = bus.get_sender();
        sender
            .send(Event::scheduler("inject", "message admitted"))
            .unwrap();
        sender
            .send(Event::node_failure("function node#0", None, "boom"))
            .unwrap();
        bus.stop_listener().await;

        assert_eq!(first.snapshot().len(), 2);
        assert_eq!(second.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn listener_is_idempotent() {
        let sink = MemorySink::new();
        let bus = EventBus::with_sink(sink.clone());
        bus.listen_for_events();
        bus.listen_for_events();

        bus.get_sender()
            .send(Event::scheduler("drain", "draining"))
            .unwrap();
        bus.stop_listener().await;
        assert_eq!(sink.snapshot().len(), 1);
    }
}
