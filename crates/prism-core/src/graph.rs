//! Command event graph
//!
//! Every enqueued command becomes a node keyed by its [`EventHandle`].
//! Edges run from prerequisites to dependents; a node counts its unresolved
//! prerequisites and is handed to the driver only when that count reaches
//! zero, so the driver never sees a command before everything it waits on
//! has completed. Completion callbacks arrive on driver-owned threads,
//! resolve outgoing edges, and dispatch whatever became ready.
//!
//! Failure is fail-fast: when a node ends in error, every transitive
//! dependent is failed immediately with the root cause and is never
//! dispatched. Terminal states absorb, so late driver callbacks for an
//! already-failed node are ignored.
//!
//! Dispatch happens under the graph lock. That is safe because the driver
//! contract forbids `submit_command` from invoking the completion sink
//! synchronously; callbacks always take the lock from another thread.
//!
//! Nodes are never evicted: an [`Event`](crate::Event) stays queryable for
//! as long as its graph is alive.

use crate::context::RetainedResource;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use prism_driver::{
    CommandDescriptor, CommandOutput, CompletionSink, ComputeDriver, DriverError, EventHandle,
    QueueHandle,
};
use prism_tracing::performance::record_launch;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Event ids are process-unique so several contexts can share one driver
/// without colliding in its completion bookkeeping.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a command as observed through its event.
///
/// `Queued -> Submitted -> Running -> Complete | Error`, with the two
/// terminal states absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Held by the graph until every prerequisite completes
    Queued,
    /// Handed to the driver
    Submitted,
    /// The driver reported execution start
    Running,
    /// Finished successfully
    Complete,
    /// Failed, or abandoned by context teardown
    Error,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// What kind of command an event tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
    Copy,
    Launch,
    Marker,
    Barrier,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Copy => "copy",
            Self::Launch => "launch",
            Self::Marker => "marker",
            Self::Barrier => "barrier",
        };
        write!(f, "{name}")
    }
}

/// Host-side timestamps captured across a command's lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct EventProfile {
    /// When the command entered the graph
    pub queued: Instant,
    /// When it was handed to the driver
    pub submitted: Option<Instant>,
    /// When the driver reported execution start
    pub started: Option<Instant>,
    /// When it reached a terminal state
    pub ended: Option<Instant>,
}

impl EventProfile {
    fn new(queued: Instant) -> Self {
        Self {
            queued,
            submitted: None,
            started: None,
            ended: None,
        }
    }

    /// Microseconds spent waiting on prerequisites before dispatch.
    pub fn queue_delay_us(&self) -> Option<u64> {
        let submitted = self.submitted?;
        Some(submitted.checked_duration_since(self.queued)?.as_micros() as u64)
    }

    /// Microseconds between execution start and the terminal state.
    pub fn execution_us(&self) -> Option<u64> {
        let started = self.started?;
        let ended = self.ended?;
        Some(ended.checked_duration_since(started)?.as_micros() as u64)
    }

    /// Microseconds from enqueue to the terminal state.
    pub fn total_us(&self) -> Option<u64> {
        let ended = self.ended?;
        Some(ended.checked_duration_since(self.queued)?.as_micros() as u64)
    }
}

/// Everything the graph needs to track one command.
pub(crate) struct CommandSpec {
    pub queue: QueueHandle,
    pub kind: CommandKind,
    pub descriptor: CommandDescriptor,
    /// Resources that must outlive the command on the driver side
    pub retained: Vec<RetainedResource>,
    /// Work-item count of a launch, reported on completion
    pub work_items: Option<usize>,
}

enum NodeState {
    Queued,
    Submitted,
    Running,
    Complete { read_data: Option<Arc<[u8]>> },
    Failed { error: Error },
}

impl NodeState {
    fn status(&self) -> EventStatus {
        match self {
            Self::Queued => EventStatus::Queued,
            Self::Submitted => EventStatus::Submitted,
            Self::Running => EventStatus::Running,
            Self::Complete { .. } => EventStatus::Complete,
            Self::Failed { .. } => EventStatus::Error,
        }
    }

    fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

struct EventNode {
    queue: QueueHandle,
    kind: CommandKind,
    /// Taken when the node is handed to the driver
    descriptor: Option<CommandDescriptor>,
    state: NodeState,
    /// Prerequisites not yet complete
    pending: usize,
    dependents: Vec<EventHandle>,
    retained: Vec<RetainedResource>,
    profile: EventProfile,
    work_items: Option<usize>,
}

impl EventNode {
    fn failure(&self) -> Option<Error> {
        match &self.state {
            NodeState::Failed { error } => Some(error.clone()),
            _ => None,
        }
    }
}

struct GraphState {
    nodes: HashMap<EventHandle, EventNode>,
}

/// The per-context command graph. Shared by the context, its queues, and
/// every event handed out.
pub(crate) struct EventGraph {
    driver: Arc<dyn ComputeDriver>,
    state: Mutex<GraphState>,
    cond: Condvar,
}

impl EventGraph {
    pub(crate) fn new(driver: Arc<dyn ComputeDriver>) -> Arc<Self> {
        Arc::new(Self {
            driver,
            state: Mutex::new(GraphState {
                nodes: HashMap::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// Insert a command node and dispatch it if nothing holds it back.
    ///
    /// `waits` are caller-supplied prerequisites and are rejected if any is
    /// already failed. `implicit` is the queue-order predecessor; when it
    /// has already failed the new node is created and immediately failed
    /// with the inherited cause instead of being rejected. With
    /// `barrier_sweep` every live command on the node's queue becomes a
    /// prerequisite as well.
    pub(crate) fn enqueue(
        &self,
        spec: CommandSpec,
        waits: &[EventHandle],
        implicit: Option<EventHandle>,
        barrier_sweep: bool,
    ) -> Result<EventHandle> {
        let CommandSpec {
            queue,
            kind,
            descriptor,
            retained,
            work_items,
        } = spec;

        let mut casualties = Vec::new();
        let event = {
            let mut state = self.state.lock();

            for wait in waits {
                match state.nodes.get(wait) {
                    Some(node) => {
                        if matches!(node.state, NodeState::Failed { .. }) {
                            return Err(Error::invalid_wait_list(format!(
                                "event {wait} already failed"
                            )));
                        }
                    }
                    None => {
                        return Err(Error::invalid_wait_list(format!("unknown event {wait}")));
                    }
                }
            }

            let event = EventHandle::new(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed));

            let mut prerequisites: Vec<EventHandle> = Vec::with_capacity(waits.len() + 1);
            for wait in waits {
                if !prerequisites.contains(wait) {
                    prerequisites.push(*wait);
                }
            }
            if let Some(pred) = implicit {
                if !prerequisites.contains(&pred) {
                    prerequisites.push(pred);
                }
            }
            if barrier_sweep {
                for (id, node) in state.nodes.iter() {
                    if node.queue == queue
                        && !node.state.is_terminal()
                        && !prerequisites.contains(id)
                    {
                        prerequisites.push(*id);
                    }
                }
            }

            let mut pending = 0usize;
            let mut inherited_failure: Option<Error> = None;
            for prereq in &prerequisites {
                let Some(node) = state.nodes.get_mut(prereq) else {
                    continue;
                };
                match &node.state {
                    NodeState::Complete { .. } => {}
                    NodeState::Failed { error } => {
                        if inherited_failure.is_none() {
                            inherited_failure = Some(error.clone());
                        }
                    }
                    _ => {
                        node.dependents.push(event);
                        pending += 1;
                    }
                }
            }

            state.nodes.insert(
                event,
                EventNode {
                    queue,
                    kind,
                    descriptor: Some(descriptor),
                    state: NodeState::Queued,
                    pending,
                    dependents: Vec::new(),
                    retained,
                    profile: EventProfile::new(Instant::now()),
                    work_items,
                },
            );
            tracing::debug!(
                event = %event,
                %kind,
                queue = %queue,
                pending,
                "command_enqueued"
            );

            if let Some(error) = inherited_failure {
                self.fail_locked(&mut state, event, &error, &mut casualties);
            } else if pending == 0 {
                self.dispatch_locked(&mut state, event, &mut casualties);
            }
            event
        };
        drop(casualties);
        Ok(event)
    }

    /// Hand a ready node to the driver. Held lock is safe: the contract
    /// forbids the driver from calling the sink on this thread.
    fn dispatch_locked(
        &self,
        state: &mut GraphState,
        event: EventHandle,
        casualties: &mut Vec<RetainedResource>,
    ) {
        let queue = {
            let Some(node) = state.nodes.get_mut(&event) else {
                return;
            };
            if !matches!(node.state, NodeState::Queued) {
                return;
            }
            node.state = NodeState::Submitted;
            node.profile.submitted = Some(Instant::now());
            node.queue
        };
        let Some(descriptor) = state
            .nodes
            .get_mut(&event)
            .and_then(|node| node.descriptor.take())
        else {
            return;
        };
        tracing::debug!(event = %event, queue = %queue, "command_dispatched");
        if let Err(err) = self.driver.submit_command(queue, event, descriptor) {
            self.fail_locked(state, event, &failure_from_driver(err), casualties);
        }
    }

    /// Fail `root` and every transitive dependent with the same cause.
    /// Retained resources of the casualties are handed back so the caller
    /// can drop them outside the lock.
    fn fail_locked(
        &self,
        state: &mut GraphState,
        root: EventHandle,
        error: &Error,
        casualties: &mut Vec<RetainedResource>,
    ) {
        let mut worklist = vec![root];
        while let Some(id) = worklist.pop() {
            let Some(node) = state.nodes.get_mut(&id) else {
                continue;
            };
            if node.state.is_terminal() {
                continue;
            }
            node.state = NodeState::Failed {
                error: error.clone(),
            };
            node.profile.ended = Some(Instant::now());
            node.descriptor = None;
            casualties.append(&mut node.retained);
            worklist.extend(node.dependents.iter().copied());
            tracing::debug!(event = %id, error = %error, "command_failed");
        }
        self.cond.notify_all();
    }

    /// Mark a node complete, resolve its outgoing edges, and dispatch any
    /// dependent whose prerequisite count reached zero.
    fn complete_locked(
        &self,
        state: &mut GraphState,
        event: EventHandle,
        output: CommandOutput,
        casualties: &mut Vec<RetainedResource>,
    ) {
        let resolved = {
            let Some(node) = state.nodes.get_mut(&event) else {
                return;
            };
            if node.state.is_terminal() {
                return;
            }
            node.state = NodeState::Complete {
                read_data: output.read_data,
            };
            node.profile.ended = Some(Instant::now());
            casualties.append(&mut node.retained);
            if node.kind == CommandKind::Launch {
                if let (Some(work_items), Some(us)) = (node.work_items, node.profile.execution_us())
                {
                    record_launch(work_items, us);
                }
            }
            std::mem::take(&mut node.dependents)
        };

        for dependent in resolved {
            let ready = {
                let Some(node) = state.nodes.get_mut(&dependent) else {
                    continue;
                };
                if node.state.is_terminal() {
                    continue;
                }
                node.pending = node.pending.saturating_sub(1);
                node.pending == 0 && matches!(node.state, NodeState::Queued)
            };
            if ready {
                self.dispatch_locked(state, dependent, casualties);
            }
        }
        self.cond.notify_all();
    }

    /// Context teardown: every non-terminal node moves to `Error` with
    /// [`Error::ContextDestroyed`]. Returns the retained resources of the
    /// abandoned nodes; the caller drops them once the driver has drained.
    pub(crate) fn fail_all_live(&self) -> Vec<RetainedResource> {
        let mut casualties = Vec::new();
        let mut state = self.state.lock();
        let live: Vec<EventHandle> = state
            .nodes
            .iter()
            .filter(|(_, node)| !node.state.is_terminal())
            .map(|(id, _)| *id)
            .collect();
        if !live.is_empty() {
            tracing::warn!(abandoned = live.len(), "commands_abandoned_at_teardown");
        }
        for id in live {
            self.fail_locked(&mut state, id, &Error::ContextDestroyed, &mut casualties);
        }
        drop(state);
        casualties
    }

    /// Block until every listed event is terminal.
    pub(crate) fn wait_terminal(&self, events: &[EventHandle]) {
        let mut state = self.state.lock();
        loop {
            let all_terminal = events.iter().all(|id| {
                state
                    .nodes
                    .get(id)
                    .map(|node| node.state.is_terminal())
                    .unwrap_or(true)
            });
            if all_terminal {
                return;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Block until every command enqueued to `queue` is terminal. Returns
    /// immediately on an idle queue.
    pub(crate) fn wait_queue(&self, queue: QueueHandle) {
        let mut state = self.state.lock();
        while state
            .nodes
            .values()
            .any(|node| node.queue == queue && !node.state.is_terminal())
        {
            self.cond.wait(&mut state);
        }
    }

    pub(crate) fn status_of(&self, event: EventHandle) -> EventStatus {
        self.state
            .lock()
            .nodes
            .get(&event)
            .map(|node| node.state.status())
            .unwrap_or(EventStatus::Error)
    }

    pub(crate) fn failure_of(&self, event: EventHandle) -> Option<Error> {
        match self.state.lock().nodes.get(&event) {
            Some(node) => node.failure(),
            None => Some(Error::InvalidContext),
        }
    }

    pub(crate) fn read_data_of(&self, event: EventHandle) -> Option<Arc<[u8]>> {
        match &self.state.lock().nodes.get(&event)?.state {
            NodeState::Complete { read_data } => read_data.clone(),
            _ => None,
        }
    }

    pub(crate) fn profile_of(&self, event: EventHandle) -> Option<EventProfile> {
        Some(self.state.lock().nodes.get(&event)?.profile)
    }
}

/// Completion sink handed to the driver for every queue of a context.
///
/// Holds the graph weakly: once the context and all its events are gone,
/// late driver callbacks fall through harmlessly.
pub(crate) struct GraphSink {
    graph: Weak<EventGraph>,
}

impl GraphSink {
    pub(crate) fn new(graph: Weak<EventGraph>) -> Self {
        Self { graph }
    }
}

impl CompletionSink for GraphSink {
    fn command_started(&self, event: EventHandle) {
        let Some(graph) = self.graph.upgrade() else {
            return;
        };
        let mut state = graph.state.lock();
        if let Some(node) = state.nodes.get_mut(&event) {
            if matches!(node.state, NodeState::Submitted) {
                node.state = NodeState::Running;
                node.profile.started = Some(Instant::now());
            }
        }
    }

    fn command_finished(&self, event: EventHandle, outcome: prism_driver::Result<CommandOutput>) {
        let Some(graph) = self.graph.upgrade() else {
            return;
        };
        let mut casualties = Vec::new();
        {
            let mut state = graph.state.lock();
            match outcome {
                Ok(output) => graph.complete_locked(&mut state, event, output, &mut casualties),
                Err(err) => graph.fail_locked(
                    &mut state,
                    event,
                    &failure_from_driver(err),
                    &mut casualties,
                ),
            }
        }
        drop(casualties);
    }
}

/// Driver faults that have a dedicated variant in the layer's taxonomy are
/// translated; everything else passes through.
fn failure_from_driver(err: DriverError) -> Error {
    match err {
        DriverError::AccessViolation { .. } => Error::MemObjectAccessViolation {
            message: err.to_string(),
        },
        other => Error::Driver(other),
    }
}
