//! Queue workers and event bookkeeping for the reference driver
//!
//! Each queue owns one worker thread fed through an mpsc channel. Items
//! arrive fully resolved (launches carry their compiled program and argument
//! snapshot), so the worker only executes and reports; command ordering and
//! dependency tracking live with the caller, which submits a command only
//! once it is eligible to run.

use crate::driver::traits::CompletionSink;
use crate::driver::types::{CommandDescriptor, CommandOutput, EventHandle, QueueHandle};
use crate::error::{DriverError, Result};
use crate::host::lang::eval::{run_kernel, LaunchGrid, ResolvedArg};
use crate::host::memory::MemoryStore;
use crate::host::program::CompiledProgram;
use parking_lot::{Condvar, Mutex, RwLock};
use prism_tracing::perf_span;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

// ================================================================================================
// Event table
// ================================================================================================

#[derive(Debug, Clone)]
pub(crate) enum DriverEventState {
    Pending,
    Running,
    Done(std::result::Result<CommandOutput, DriverError>),
}

/// Completion state of every event the driver has issued, plus the condvar
/// `block_until` waits on
#[derive(Default)]
pub(crate) struct EventTable {
    states: Mutex<HashMap<u64, DriverEventState>>,
    cond: Condvar,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: EventHandle) {
        self.states
            .lock()
            .insert(event.id(), DriverEventState::Pending);
    }

    pub fn set_running(&self, event: EventHandle) {
        self.states
            .lock()
            .insert(event.id(), DriverEventState::Running);
    }

    pub fn set_done(&self, event: EventHandle, outcome: std::result::Result<CommandOutput, DriverError>) {
        self.states
            .lock()
            .insert(event.id(), DriverEventState::Done(outcome));
        self.cond.notify_all();
    }

    /// Stored outcome of a finished event, if it has finished
    pub fn outcome_of(&self, event: EventHandle) -> Option<std::result::Result<CommandOutput, DriverError>> {
        match self.states.lock().get(&event.id()) {
            Some(DriverEventState::Done(outcome)) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Block until every listed event reaches `Done`. Individual command
    /// failures do not fail the wait; an unknown handle does.
    pub fn wait_done(&self, events: &[EventHandle]) -> Result<()> {
        let mut states = self.states.lock();
        loop {
            let mut all_done = true;
            for event in events {
                match states.get(&event.id()) {
                    Some(DriverEventState::Done(_)) => {}
                    Some(_) => {
                        all_done = false;
                        break;
                    }
                    None => return Err(DriverError::UnknownEvent(*event)),
                }
            }
            if all_done {
                return Ok(());
            }
            self.cond.wait(&mut states);
        }
    }
}

// ================================================================================================
// Work items
// ================================================================================================

/// Launch state resolved at submit time: the argument snapshot taken then is
/// immune to later `bind_argument` calls
#[derive(Debug)]
pub(crate) struct PreparedLaunch {
    pub program: Arc<CompiledProgram>,
    pub kernel_index: usize,
    pub args: Vec<ResolvedArg>,
    pub grid: LaunchGrid,
}

pub(crate) struct WorkItem {
    pub event: EventHandle,
    pub descriptor: CommandDescriptor,
    pub launch: Option<PreparedLaunch>,
}

// ================================================================================================
// Worker
// ================================================================================================

/// One queue's worker thread and its feed channel. Dropping the sender ends
/// the thread after it drains whatever was already submitted.
pub(crate) struct QueueWorker {
    sender: Option<mpsc::Sender<WorkItem>>,
    join: Option<JoinHandle<()>>,
}

impl QueueWorker {
    pub fn spawn(
        queue: QueueHandle,
        memory: Arc<RwLock<MemoryStore>>,
        events: Arc<EventTable>,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<WorkItem>();
        let join = std::thread::Builder::new()
            .name(format!("prism-{}", queue))
            .spawn(move || worker_loop(queue, receiver, memory, events, sink))
            .map_err(|e| DriverError::execution_failed(format!("failed to spawn queue worker: {}", e)))?;
        Ok(Self {
            sender: Some(sender),
            join: Some(join),
        })
    }

    pub fn submit(&self, item: WorkItem) -> Result<()> {
        match &self.sender {
            Some(sender) => sender
                .send(item)
                .map_err(|_| DriverError::QueueShutdown),
            None => Err(DriverError::QueueShutdown),
        }
    }

    /// Close the channel and wait for the worker to drain and exit
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    queue: QueueHandle,
    receiver: mpsc::Receiver<WorkItem>,
    memory: Arc<RwLock<MemoryStore>>,
    events: Arc<EventTable>,
    sink: Arc<dyn CompletionSink>,
) {
    while let Ok(item) = receiver.recv() {
        let event = item.event;
        events.set_running(event);
        sink.command_started(event);

        let start = std::time::Instant::now();
        let outcome = execute(&memory, &item);
        debug!(
            queue = %queue,
            event = %event,
            kind = item.descriptor.kind_name(),
            duration_us = start.elapsed().as_micros() as u64,
            success = outcome.is_ok(),
            "command_executed"
        );

        events.set_done(event, outcome.clone());
        sink.command_finished(event, outcome);
    }
}

fn execute(memory: &RwLock<MemoryStore>, item: &WorkItem) -> Result<CommandOutput> {
    match &item.descriptor {
        CommandDescriptor::ReadBuffer {
            buffer,
            offset,
            len,
        } => {
            let bytes = memory.read().read(*buffer, *offset, *len)?;
            Ok(CommandOutput::with_read_data(bytes))
        }
        CommandDescriptor::WriteBuffer {
            buffer,
            offset,
            data,
        } => {
            memory.write().write(*buffer, *offset, data)?;
            Ok(CommandOutput::default())
        }
        CommandDescriptor::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            len,
        } => {
            memory
                .write()
                .copy(*src, *src_offset, *dst, *dst_offset, *len)?;
            Ok(CommandOutput::default())
        }
        CommandDescriptor::Marker => Ok(CommandOutput::default()),
        CommandDescriptor::LaunchKernel { .. } => {
            let launch = item
                .launch
                .as_ref()
                .ok_or_else(|| DriverError::execution_failed("launch submitted without prepared state"))?;
            let _span = perf_span!("kernel_interpret");
            // One coarse guard for the whole launch instead of per-element
            // locking inside the interpreter
            let mut store = memory.write();
            run_kernel(
                &mut store,
                launch.program.kernel(launch.kernel_index),
                &launch.args,
                &launch.grid,
            )
            .map_err(|e| e.into_driver_error())?;
            Ok(CommandOutput::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::{AccessMode, BufferHandle};

    struct RecordingSink {
        started: Mutex<Vec<EventHandle>>,
        finished: Mutex<Vec<(EventHandle, bool)>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
                finished: Mutex::new(Vec::new()),
            })
        }
    }

    impl CompletionSink for RecordingSink {
        fn command_started(&self, event: EventHandle) {
            self.started.lock().push(event);
        }

        fn command_finished(&self, event: EventHandle, outcome: Result<CommandOutput>) {
            self.finished.lock().push((event, outcome.is_ok()));
        }
    }

    fn harness() -> (Arc<RwLock<MemoryStore>>, Arc<EventTable>, Arc<RecordingSink>, QueueWorker, BufferHandle) {
        let memory = Arc::new(RwLock::new(MemoryStore::new()));
        let buffer = memory
            .write()
            .allocate(16, AccessMode::ReadWrite);
        let events = Arc::new(EventTable::new());
        let sink = RecordingSink::new();
        let worker = QueueWorker::spawn(
            QueueHandle::new(0),
            memory.clone(),
            events.clone(),
            sink.clone(),
        )
        .unwrap();
        (memory, events, sink, worker, buffer)
    }

    #[test]
    fn test_write_then_read_on_worker() {
        let (_memory, events, sink, worker, buffer) = harness();
        let write = EventHandle::new(1);
        let read = EventHandle::new(2);
        events.register(write);
        events.register(read);

        worker
            .submit(WorkItem {
                event: write,
                descriptor: CommandDescriptor::WriteBuffer {
                    buffer,
                    offset: 0,
                    data: Arc::from(vec![5u8; 16]),
                },
                launch: None,
            })
            .unwrap();
        worker
            .submit(WorkItem {
                event: read,
                descriptor: CommandDescriptor::ReadBuffer {
                    buffer,
                    offset: 4,
                    len: 8,
                },
                launch: None,
            })
            .unwrap();

        events.wait_done(&[write, read]).unwrap();
        let outcome = events.outcome_of(read).unwrap().unwrap();
        assert_eq!(outcome.read_data.unwrap().as_ref(), &[5u8; 16][..8]);
        assert_eq!(sink.started.lock().len(), 2);
        assert_eq!(
            sink.finished.lock().clone(),
            vec![(write, true), (read, true)]
        );
    }

    #[test]
    fn test_failure_is_reported_not_panicked() {
        let (_memory, events, sink, worker, buffer) = harness();
        let bad = EventHandle::new(3);
        events.register(bad);
        worker
            .submit(WorkItem {
                event: bad,
                descriptor: CommandDescriptor::ReadBuffer {
                    buffer,
                    offset: 100,
                    len: 8,
                },
                launch: None,
            })
            .unwrap();
        events.wait_done(&[bad]).unwrap();
        assert!(matches!(
            events.outcome_of(bad),
            Some(Err(DriverError::BufferOutOfBounds { .. }))
        ));
        assert_eq!(sink.finished.lock().clone(), vec![(bad, false)]);
    }

    #[test]
    fn test_shutdown_drains_submitted_items() {
        let (memory, events, _sink, mut worker, buffer) = harness();
        let evs: Vec<EventHandle> = (10..20).map(EventHandle::new).collect();
        for ev in &evs {
            events.register(*ev);
            worker
                .submit(WorkItem {
                    event: *ev,
                    descriptor: CommandDescriptor::WriteBuffer {
                        buffer,
                        offset: 0,
                        data: Arc::from(vec![1u8]),
                    },
                    launch: None,
                })
                .unwrap();
        }
        worker.shutdown();
        // Every item drained before the join returned
        for ev in &evs {
            assert!(events.outcome_of(*ev).is_some());
        }
        assert_eq!(memory.read().read(buffer, 0, 1).unwrap(), vec![1]);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let (_memory, _events, _sink, mut worker, _buffer) = harness();
        worker.shutdown();
        let err = worker
            .submit(WorkItem {
                event: EventHandle::new(1),
                descriptor: CommandDescriptor::Marker,
                launch: None,
            })
            .unwrap_err();
        assert_eq!(err, DriverError::QueueShutdown);
    }

    #[test]
    fn test_wait_done_unknown_event() {
        let events = EventTable::new();
        let err = events.wait_done(&[EventHandle::new(99)]).unwrap_err();
        assert_eq!(err, DriverError::UnknownEvent(EventHandle::new(99)));
    }
}
