//! Completion events
//!
//! Every enqueued command hands back an [`Event`]. Events are cheap clones
//! over the context's command graph and stay queryable for the graph's
//! whole lifetime, including after the command finished or the owning
//! queue disappeared.

use crate::error::{Error, Result};
use crate::graph::{CommandKind, EventGraph, EventProfile, EventStatus};
use prism_driver::EventHandle;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Handle to one enqueued command's lifecycle.
#[derive(Clone)]
pub struct Event {
    graph: Arc<EventGraph>,
    handle: EventHandle,
    kind: CommandKind,
}

impl Event {
    pub(crate) fn new(graph: Arc<EventGraph>, handle: EventHandle, kind: CommandKind) -> Self {
        Self {
            graph,
            handle,
            kind,
        }
    }

    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    pub(crate) fn graph(&self) -> &Arc<EventGraph> {
        &self.graph
    }

    /// Current lifecycle state, without blocking.
    pub fn status(&self) -> EventStatus {
        self.graph.status_of(self.handle)
    }

    /// The command kind this event tracks.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Block until the command is terminal. `Ok` on completion, the
    /// command's failure otherwise.
    pub fn wait(&self) -> Result<()> {
        self.graph.wait_terminal(&[self.handle]);
        match self.graph.failure_of(self.handle) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Block until the command is terminal and return the bytes it
    /// produced. Only read commands carry data; anything else fails with
    /// [`Error::EventDataUnavailable`].
    pub fn data(&self) -> Result<Arc<[u8]>> {
        self.wait()?;
        self.graph
            .read_data_of(self.handle)
            .ok_or(Error::EventDataUnavailable)
    }

    /// Host-side timestamps captured so far. Fields for stages the command
    /// has not reached yet are `None`.
    pub fn profile(&self) -> EventProfile {
        self.graph.profile_of(self.handle).unwrap_or(EventProfile {
            queued: Instant::now(),
            submitted: None,
            started: None,
            ended: None,
        })
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

/// Block until every listed event is terminal.
///
/// The list must be non-empty and all events must come from the same
/// context. `Ok` when everything completed; when any command failed, the
/// error lists each failed event with its cause.
pub fn wait_for_events(events: &[&Event]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(Error::invalid_wait_list("empty wait list"));
    };
    let graph = first.graph();
    let mut handles = Vec::with_capacity(events.len());
    for event in events {
        if !Arc::ptr_eq(event.graph(), graph) {
            return Err(Error::invalid_wait_list(
                "events belong to different contexts",
            ));
        }
        handles.push(event.handle());
    }
    graph.wait_terminal(&handles);

    let failed: Vec<(u64, String)> = events
        .iter()
        .filter_map(|event| {
            graph
                .failure_of(event.handle())
                .map(|err| (event.handle().id(), err.to_string()))
        })
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::ExecStatusErrorInWaitList { failed })
    }
}
