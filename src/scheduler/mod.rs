//! Message scheduling: node tasks, token accounting, and drain tracking.
//!
//! Each node runs as one long-lived tokio task owning an unbounded inbox.
//! The scheduler wires inboxes together per the compiled topology, admits
//! injected messages against the token budget, and tracks `execute`
//! lineages through the envelope traces. Tasks spawn lazily on the first
//! injection, so compilation itself needs no runtime.

pub(crate) mod envelope;
pub(crate) mod lineage;
pub(crate) mod sequencer;
pub(crate) mod tokens;

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{OnceCell, watch};
use tracing::{debug, instrument, trace};

use crate::control::ControlVerb;
use crate::diagnostics::{CauseChain, ErrorEvent};
use crate::event_bus::{Event, EventBus};
use crate::graphs::{Graph, GraphError};
use crate::node::{Emission, FunctionBody, NodeError, NodeSpec, ReentrantBody, TimerBody};
use crate::scheduler::envelope::{Envelope, Trace};
use crate::scheduler::lineage::Lineage;
use crate::scheduler::sequencer::{Offer, ReorderBuffer};
use crate::scheduler::tokens::TokenGovernor;
use crate::types::{GraphPhase, NodeId};
use crate::value::{Args, Value};

/// Failure of a blocking [`Graph::execute`](crate::graphs::Graph::execute)
/// call.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecuteError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// One or more node bodies failed somewhere in the injected message's
    /// descendant tree.
    #[error("{} node failure(s) during execution", errors.len())]
    #[diagnostic(
        code(fluxgraph::scheduler::node_failures),
        help("Render the captured events with diagnostics::pretty_print for details.")
    )]
    NodeFailures { errors: Vec<ErrorEvent> },
}

/// Observable scheduler activity, derived from the token pool and the
/// drain flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// No tracked message in flight.
    Idle,
    /// Tracked messages in flight.
    Running,
    /// A `wait` is blocking new observation until the pool refills.
    Draining,
}

const PHASE_COMPILED: u8 = 0;
const PHASE_RUNNING: u8 = 1;
const PHASE_DRAINED: u8 = 2;

/// Runtime half of a compiled graph.
pub(crate) struct Scheduler {
    graph_id: String,
    entry: Option<NodeId>,
    governor: Arc<TokenGovernor>,
    senders: Vec<flume::Sender<Envelope>>,
    receivers: Mutex<Vec<Option<flume::Receiver<Envelope>>>>,
    work: Mutex<Vec<Option<NodeSpec>>>,
    successors: Vec<Vec<NodeId>>,
    predecessors: Vec<Vec<NodeId>>,
    variants: Vec<&'static str>,
    started: OnceCell<()>,
    bus: Arc<EventBus>,
    shutdown: watch::Sender<bool>,
    phase: AtomicU8,
    draining: AtomicBool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        graph_id: String,
        n_token: usize,
        successors: Vec<Vec<NodeId>>,
        predecessors: Vec<Vec<NodeId>>,
        variants: Vec<&'static str>,
        entry: Option<NodeId>,
        specs: Vec<NodeSpec>,
        bus: Arc<EventBus>,
    ) -> Self {
        let mut senders = Vec::with_capacity(specs.len());
        let mut receivers = Vec::with_capacity(specs.len());
        for _ in 0..specs.len() {
            let (tx, rx) = flume::unbounded();
            senders.push(tx);
            receivers.push(Some(rx));
        }
        let (shutdown, _) = watch::channel(false);
        Self {
            graph_id,
            entry,
            governor: Arc::new(TokenGovernor::new(n_token)),
            senders,
            receivers: Mutex::new(receivers),
            work: Mutex::new(specs.into_iter().map(Some).collect()),
            successors,
            predecessors,
            variants,
            started: OnceCell::new(),
            bus,
            shutdown,
            phase: AtomicU8::new(PHASE_COMPILED),
            draining: AtomicBool::new(false),
        }
    }

    pub(crate) fn graph_phase(&self) -> GraphPhase {
        match self.phase.load(Ordering::SeqCst) {
            PHASE_RUNNING => GraphPhase::Running,
            PHASE_DRAINED => GraphPhase::Drained,
            _ => GraphPhase::Compiled,
        }
    }

    pub(crate) fn state(&self) -> SchedulerState {
        if self.draining.load(Ordering::SeqCst) {
            SchedulerState::Draining
        } else if self.governor.in_flight() > 0 {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.governor.in_flight()
    }

    /// Non-blocking injection; `Ok(false)` signals backpressure.
    #[instrument(skip_all, fields(graph_id = %self.graph_id))]
    pub(crate) async fn enqueue(&self, args: Args) -> Result<bool, GraphError> {
        self.ensure_started().await;
        let entry = self.entry.ok_or(GraphError::MissingEntry)?;
        if !self.governor.try_acquire(1) {
            debug!("injection rejected: token budget exhausted");
            self.publish(Event::scheduler(
                "inject",
                "backpressure: token budget exhausted, message rejected",
            ));
            return Ok(false);
        }
        self.phase.store(PHASE_RUNNING, Ordering::SeqCst);
        let trace = Trace::root(Arc::clone(&self.governor), None);
        self.inject(entry, args, trace);
        Ok(true)
    }

    /// Blocking injection; resolves with the terminal payloads of the
    /// injected message's descendant tree.
    #[instrument(skip_all, fields(graph_id = %self.graph_id))]
    pub(crate) async fn execute(&self, args: Args) -> Result<Vec<Args>, ExecuteError> {
        self.ensure_started().await;
        let entry = self
            .entry
            .ok_or(ExecuteError::Graph(GraphError::MissingEntry))?;
        self.governor.acquire(1).await;
        self.phase.store(PHASE_RUNNING, Ordering::SeqCst);
        let lineage = Arc::new(Lineage::new());
        let trace = Trace::root(Arc::clone(&self.governor), Some(Arc::clone(&lineage)));
        self.inject(entry, args, trace);
        let (outputs, errors) = lineage.settled().await;
        if errors.is_empty() {
            Ok(outputs)
        } else {
            Err(ExecuteError::NodeFailures { errors })
        }
    }

    /// Blocks until every tracked message has settled.
    #[instrument(skip_all, fields(graph_id = %self.graph_id))]
    pub(crate) async fn wait(&self) {
        self.ensure_started().await;
        self.draining.store(true, Ordering::SeqCst);
        self.publish(Event::scheduler("drain", "waiting for tracked messages"));
        self.governor.wait_idle().await;
        self.draining.store(false, Ordering::SeqCst);
        self.phase.store(PHASE_DRAINED, Ordering::SeqCst);
        debug!("drain complete");
    }

    fn inject(&self, entry: NodeId, args: Args, trace: Trace) {
        let _ = self.senders[entry.index()].send(Envelope {
            args,
            seq: None,
            from: None,
            trace,
        });
    }

    fn publish(&self, event: Event) {
        let _ = self.bus.get_sender().send(event);
    }

    async fn ensure_started(&self) {
        self.started
            .get_or_init(|| async {
                self.bus.listen_for_events();
                self.spawn_all();
            })
            .await;
    }

    fn spawn_all(&self) {
        let mut receivers = self.receivers.lock();
        let mut work = self.work.lock();
        for idx in 0..self.senders.len() {
            let rx = receivers[idx].take().expect("node task already spawned");
            let spec = work[idx].take().expect("node spec already consumed");
            let node = NodeId(idx);
            let ctx = TaskCtx {
                node,
                name: format!("{} {node}", self.variants[idx]),
                governor: Arc::clone(&self.governor),
                events: self.bus.get_sender(),
                succ: self.successors[idx]
                    .iter()
                    .map(|s| self.senders[s.index()].clone())
                    .collect(),
                counter: Arc::new(AtomicU64::new(0)),
            };
            let shutdown = self.shutdown.subscribe();
            let preds = self.predecessors[idx].clone();
            match spec {
                NodeSpec::Function { body, .. } => match body {
                    FunctionBody::Serial(body) => {
                        tokio::spawn(run_serial(ctx, rx, shutdown, body.into_inner()));
                    }
                    FunctionBody::Reentrant(body) => {
                        tokio::spawn(run_reentrant(ctx, rx, shutdown, body));
                    }
                },
                NodeSpec::Queue | NodeSpec::Broadcast => {
                    tokio::spawn(run_relay(ctx, rx, shutdown));
                }
                NodeSpec::Timer { interval, body } => {
                    tokio::spawn(run_timer(ctx, shutdown, interval, body));
                }
                NodeSpec::Sequencer { gap_timeout } => {
                    tokio::spawn(run_sequencer(ctx, rx, shutdown, gap_timeout));
                }
                NodeSpec::Concat => {
                    tokio::spawn(run_concat(ctx, rx, shutdown, preds));
                }
                NodeSpec::ConcatUniform { seed, reducer } => {
                    tokio::spawn(run_concat_uniform(ctx, rx, shutdown, preds, seed, reducer));
                }
                NodeSpec::Subgraph { graph } => {
                    tokio::spawn(run_subgraph(ctx, rx, shutdown, graph));
                }
            }
        }
    }
}

/// Everything a node task needs; deliberately does not reference the
/// scheduler, so dropping the graph tears the task web down.
#[derive(Clone)]
struct TaskCtx {
    node: NodeId,
    name: String,
    governor: Arc<TokenGovernor>,
    events: flume::Sender<Event>,
    succ: Vec<flume::Sender<Envelope>>,
    counter: Arc<AtomicU64>,
}

impl TaskCtx {
    /// Hands an envelope downstream, or records it as a terminal output.
    fn deliver(&self, mut env: Envelope) {
        env.from = Some(self.node);
        if self.succ.is_empty() {
            for lineage in env.trace.lineages() {
                lineage.record_output(env.args.clone());
            }
            trace!(node = %self.name, seq = ?env.seq, "terminal output");
            return;
        }
        for tx in &self.succ[1..] {
            let _ = tx.send(env.clone());
        }
        let _ = self.succ[0].send(env);
    }

    /// Captures a node failure: attributed to the owning lineages and
    /// published on the bus. The trace is dropped by the caller, settling
    /// the message.
    fn fail(&self, seq: Option<u64>, error: &NodeError, trace: &Trace) {
        let event = ErrorEvent::node(&self.name, seq, CauseChain::from_error(error));
        for lineage in trace.lineages() {
            lineage.record_error(event.clone());
        }
        let _ = self
            .events
            .send(Event::node_failure(&self.name, seq, error.to_string()));
    }

    fn publish(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn next_seq(&self, count: u64) -> u64 {
        self.counter.fetch_add(count, Ordering::SeqCst)
    }

    /// Applies a body invocation's result per its control verb.
    fn apply(&self, result: Result<Emission, NodeError>, inbound_seq: Option<u64>, trace: Trace) {
        let emission = match result {
            Ok(emission) => emission,
            Err(error) => {
                self.fail(inbound_seq, &error, &trace);
                return;
            }
        };
        match emission.verb {
            ControlVerb::Ignore | ControlVerb::Hold(_) => {}
            ControlVerb::Push(seq) => {
                for args in emission.outputs {
                    self.deliver(Envelope {
                        args,
                        seq: Some(seq),
                        from: None,
                        trace: trace.clone(),
                    });
                }
            }
            ControlVerb::Generate => {
                let outputs = emission.outputs;
                if outputs.is_empty() {
                    return;
                }
                let extra = outputs.len() - 1;
                let tracked = trace.tracked();
                if tracked && extra > 0 && !self.governor.try_acquire(extra) {
                    self.fail(
                        inbound_seq,
                        &NodeError::Backpressure { needed: extra },
                        &trace,
                    );
                    return;
                }
                let base = self.next_seq(outputs.len() as u64);
                for (offset, args) in outputs.into_iter().enumerate() {
                    let out_trace = if offset == 0 {
                        trace.clone()
                    } else if tracked {
                        trace.with_extra_token(&self.governor)
                    } else {
                        trace.clone()
                    };
                    self.deliver(Envelope {
                        args,
                        seq: Some(base + offset as u64),
                        from: None,
                        trace: out_trace,
                    });
                }
            }
        }
    }
}

/// Resolves when the graph shuts down (drop or explicit signal).
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "opaque panic payload"
    }
}

async fn run_serial(
    ctx: TaskCtx,
    rx: flume::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    mut body: Box<dyn FnMut(Args) -> Result<Emission, NodeError> + Send>,
) {
    loop {
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => {
                    let Envelope { args, seq, trace, .. } = env;
                    // A panicking body fails its message; the node task
                    // stays alive for the rest of the stream, matching the
                    // reentrant path.
                    let result = catch_unwind(AssertUnwindSafe(|| body(args)))
                        .unwrap_or_else(|payload| {
                            Err(NodeError::Failed(format!(
                                "body panicked: {}",
                                panic_message(payload.as_ref())
                            )))
                        });
                    ctx.apply(result, seq, trace);
                }
                Err(_) => break,
            },
            () = closed(&mut shutdown) => break,
        }
    }
}

async fn run_reentrant(
    ctx: TaskCtx,
    rx: flume::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    body: ReentrantBody,
) {
    loop {
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => {
                    let ctx = ctx.clone();
                    let body = Arc::clone(&body);
                    tokio::spawn(async move {
                        let Envelope { args, seq, trace, .. } = env;
                        let invoked = tokio::task::spawn_blocking(move || body(args)).await;
                        match invoked {
                            Ok(result) => ctx.apply(result, seq, trace),
                            Err(join_error) => ctx.fail(
                                seq,
                                &NodeError::Failed(format!("body panicked: {join_error}")),
                                &trace,
                            ),
                        }
                    });
                }
                Err(_) => break,
            },
            () = closed(&mut shutdown) => break,
        }
    }
}

/// Queue and Broadcast: pass through, preserving sequence tags.
async fn run_relay(ctx: TaskCtx, rx: flume::Receiver<Envelope>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => ctx.deliver(env),
                Err(_) => break,
            },
            () = closed(&mut shutdown) => break,
        }
    }
}

async fn run_timer(
    ctx: TaskCtx,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    body: TimerBody,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval is immediate; a timer node fires
    // only after a full period has elapsed.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let args = body();
                let seq = ctx.next_seq(1);
                ctx.deliver(Envelope {
                    args,
                    seq: Some(seq),
                    from: None,
                    trace: Trace::default(),
                });
            }
            () = closed(&mut shutdown) => break,
        }
    }
}

async fn run_sequencer(
    ctx: TaskCtx,
    rx: flume::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    gap_timeout: Duration,
) {
    let mut buffer: ReorderBuffer<Envelope> = ReorderBuffer::new(gap_timeout);
    loop {
        let deadline = buffer.gap_deadline();
        let gap_clock = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => {
                    match env.seq {
                        None => {
                            ctx.publish(Event::node_message(
                                &ctx.name,
                                "message without sequence id forwarded as-is",
                            ));
                            ctx.deliver(env);
                        }
                        Some(seq) => match buffer.offer(seq, env) {
                            Offer::Buffered => {}
                            Offer::Stale(env) => {
                                ctx.publish(Event::stale_sequence(
                                    &ctx.name,
                                    buffer.expected(),
                                    seq,
                                ));
                                ctx.deliver(env);
                            }
                        },
                    }
                    for ready in buffer.drain_ready() {
                        ctx.deliver(ready);
                    }
                }
                Err(_) => {
                    for remaining in buffer.flush() {
                        ctx.deliver(remaining);
                    }
                    break;
                }
            },
            () = gap_clock => {
                let missing = buffer.force_advance();
                ctx.publish(Event::sequence_gap(&ctx.name, missing));
                for ready in buffer.drain_ready() {
                    ctx.deliver(ready);
                }
            }
            () = closed(&mut shutdown) => break,
        }
    }
}

/// Routes an inbound envelope to its join slot. Duplicate producers fill
/// their emptiest slot so repeated wiring still pairs up.
fn join_slot(preds: &[NodeId], slots: &[VecDeque<Envelope>], from: Option<NodeId>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, pred) in preds.iter().enumerate() {
        if Some(*pred) == from {
            match best {
                Some(b) if slots[idx].len() >= slots[b].len() => {}
                _ => best = Some(idx),
            }
        }
    }
    best
}

async fn run_concat(
    ctx: TaskCtx,
    rx: flume::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    preds: Vec<NodeId>,
) {
    let mut slots: Vec<VecDeque<Envelope>> = preds.iter().map(|_| VecDeque::new()).collect();
    loop {
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => {
                    let Some(slot) = join_slot(&preds, &slots, env.from) else {
                        ctx.publish(Event::node_message(
                            &ctx.name,
                            "dropped message from unwired producer",
                        ));
                        continue;
                    };
                    slots[slot].push_back(env);
                    if slots.iter().all(|s| !s.is_empty()) {
                        let group: Vec<Envelope> =
                            slots.iter_mut().map(|s| s.pop_front().expect("slot checked non-empty")).collect();
                        let mut values = Vec::new();
                        let mut traces = Vec::new();
                        for env in group {
                            values.extend(env.args.into_values());
                            traces.push(env.trace);
                        }
                        ctx.deliver(Envelope {
                            args: Args::new(values),
                            seq: None,
                            from: None,
                            trace: Trace::merge(traces),
                        });
                    }
                }
                Err(_) => break,
            },
            () = closed(&mut shutdown) => break,
        }
    }
}

async fn run_concat_uniform(
    ctx: TaskCtx,
    rx: flume::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    preds: Vec<NodeId>,
    seed: Value,
    reducer: Arc<dyn Fn(Value, Value) -> Value + Send + Sync>,
) {
    let mut slots: Vec<VecDeque<Envelope>> = preds.iter().map(|_| VecDeque::new()).collect();
    loop {
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => {
                    let Some(slot) = join_slot(&preds, &slots, env.from) else {
                        ctx.publish(Event::node_message(
                            &ctx.name,
                            "dropped message from unwired producer",
                        ));
                        continue;
                    };
                    slots[slot].push_back(env);
                    if slots.iter().all(|s| !s.is_empty()) {
                        let group: Vec<Envelope> =
                            slots.iter_mut().map(|s| s.pop_front().expect("slot checked non-empty")).collect();
                        let traces: Vec<Trace> = group.iter().map(|env| env.trace.clone()).collect();
                        let merged = Trace::merge(traces);
                        let mut acc = seed.clone();
                        let mut bad_arity = None;
                        for env in group {
                            let mut values = env.args.into_values();
                            if values.len() != 1 {
                                bad_arity = Some(values.len());
                                break;
                            }
                            acc = reducer(acc, values.remove(0));
                        }
                        if let Some(found) = bad_arity {
                            ctx.fail(
                                None,
                                &NodeError::Failed(format!(
                                    "uniform join expects single-value payloads, got {found} values"
                                )),
                                &merged,
                            );
                            continue;
                        }
                        ctx.deliver(Envelope {
                            args: Args::single(acc),
                            seq: None,
                            from: None,
                            trace: merged,
                        });
                    }
                }
                Err(_) => break,
            },
            () = closed(&mut shutdown) => break,
        }
    }
}

async fn run_subgraph(
    ctx: TaskCtx,
    rx: flume::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
    child: Arc<Graph>,
) {
    loop {
        tokio::select! {
            biased;
            recv = rx.recv_async() => match recv {
                Ok(env) => {
                    let Envelope { args, seq, trace, .. } = env;
                    match child.execute(args).await {
                        Ok(outputs) => {
                            for args in outputs {
                                ctx.deliver(Envelope {
                                    args,
                                    seq,
                                    from: None,
                                    trace: trace.clone(),
                                });
                            }
                        }
                        Err(error) => {
                            // Surface the child's underlying failure
                            // messages, not just the aggregate count.
                            let message = match &error {
                                ExecuteError::NodeFailures { errors } => errors
                                    .iter()
                                    .map(|e| e.error.message.clone())
                                    .collect::<Vec<_>>()
                                    .join("; "),
                                other => other.to_string(),
                            };
                            ctx.fail(seq, &NodeError::Subgraph { message }, &trace);
                        }
                    }
                }
                Err(_) => break,
            },
            () = closed(&mut shutdown) => break,
        }
    }
}
