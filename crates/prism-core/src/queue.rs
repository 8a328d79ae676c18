//! Command queues
//!
//! A [`Queue`] turns API calls into event-graph nodes. Ordering policy
//! lives entirely here: an in-order queue threads an implicit dependency
//! from each command to its predecessor, while an out-of-order queue leaves
//! sequencing to explicit wait lists and barriers. Either way the driver
//! only ever receives commands whose prerequisites are resolved.
//!
//! Work shapes are validated against the queue's device limit at enqueue
//! time, and global extents are rounded up to whole work-group multiples.
//! Kernels guard against the overshoot themselves by comparing the global
//! id against the real element count.

use crate::arena::Handle;
use crate::buffer::Buffer;
use crate::context::{BufferRes, ContextInner, QueueSlot, RetainedResource};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::graph::{CommandKind, CommandSpec, EventGraph};
use crate::kernel::Kernel;
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use prism_driver::{CommandDescriptor, EventHandle, QueueHandle, QueueOrdering};
use prism_tracing::performance::record_transfer;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// A submission channel bound to one device of a context.
pub struct Queue {
    ctx: Weak<ContextInner>,
    handle: Handle<QueueSlot>,
    max_work_group_size: usize,
    ordering: QueueOrdering,
    /// Implicit-ordering state. Locked across the graph enqueue so the
    /// tail chain survives concurrent submitters; lock order is seq before
    /// graph, never the reverse.
    seq: Mutex<QueueSeq>,
}

#[derive(Default)]
struct QueueSeq {
    /// Most recently enqueued command
    tail: Option<EventHandle>,
    /// Most recent barrier on an out-of-order queue
    barrier: Option<EventHandle>,
}

impl Queue {
    pub(crate) fn new(
        ctx: Weak<ContextInner>,
        handle: Handle<QueueSlot>,
        max_work_group_size: usize,
        ordering: QueueOrdering,
    ) -> Self {
        Self {
            ctx,
            handle,
            max_work_group_size,
            ordering,
            seq: Mutex::new(QueueSeq::default()),
        }
    }

    pub fn ordering(&self) -> QueueOrdering {
        self.ordering
    }

    fn context(&self) -> Result<Arc<ContextInner>> {
        self.ctx.upgrade().ok_or(Error::InvalidContext)
    }

    fn driver_handle(&self, inner: &Arc<ContextInner>) -> Result<QueueHandle> {
        let state = inner.state.read();
        let slot = state.queues.get(self.handle).ok_or(Error::InvalidContext)?;
        Ok(slot.res.handle)
    }

    /// Copy `data` into the buffer at `offset` once the waits resolve.
    pub fn enqueue_write(
        &self,
        buffer: &Buffer,
        offset: usize,
        data: &[u8],
        waits: &[&Event],
    ) -> Result<Event> {
        let inner = self.context()?;
        let res = resolve_buffer(&inner, buffer)?;
        transfer_bounds(buffer.size(), offset, data.len())?;
        self.submit(
            &inner,
            CommandKind::Write,
            CommandDescriptor::WriteBuffer {
                buffer: res.handle,
                offset,
                data: Arc::from(data),
            },
            vec![RetainedResource::Buffer(res)],
            None,
            waits,
        )
    }

    /// Read `len` bytes from the buffer at `offset`. The bytes are
    /// delivered through [`Event::data`] on the returned event.
    pub fn enqueue_read(
        &self,
        buffer: &Buffer,
        offset: usize,
        len: usize,
        waits: &[&Event],
    ) -> Result<Event> {
        let inner = self.context()?;
        let res = resolve_buffer(&inner, buffer)?;
        transfer_bounds(buffer.size(), offset, len)?;
        self.submit(
            &inner,
            CommandKind::Read,
            CommandDescriptor::ReadBuffer {
                buffer: res.handle,
                offset,
                len,
            },
            vec![RetainedResource::Buffer(res)],
            None,
            waits,
        )
    }

    /// Device-side copy of `len` bytes between two buffers of this context.
    pub fn enqueue_copy(
        &self,
        src: &Buffer,
        src_offset: usize,
        dst: &Buffer,
        dst_offset: usize,
        len: usize,
        waits: &[&Event],
    ) -> Result<Event> {
        let inner = self.context()?;
        let src_res = resolve_buffer(&inner, src)?;
        let dst_res = resolve_buffer(&inner, dst)?;
        transfer_bounds(src.size(), src_offset, len)?;
        transfer_bounds(dst.size(), dst_offset, len)?;
        self.submit(
            &inner,
            CommandKind::Copy,
            CommandDescriptor::CopyBuffer {
                src: src_res.handle,
                src_offset,
                dst: dst_res.handle,
                dst_offset,
                len,
            },
            vec![
                RetainedResource::Buffer(src_res),
                RetainedResource::Buffer(dst_res),
            ],
            None,
            waits,
        )
    }

    /// Launch a kernel over `global` work items.
    ///
    /// Every argument slot must be bound. `local` defaults to one work item
    /// per group; when given it must match `global` in dimensionality and
    /// fit the device's group-size limit. Global extents that are not
    /// multiples of the group size are rounded up.
    pub fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        global: &[usize],
        local: Option<&[usize]>,
        waits: &[&Event],
    ) -> Result<Event> {
        let inner = self.context()?;
        if !kernel.belongs_to(&inner) {
            return Err(Error::InvalidContext);
        }
        let (kernel_res, retained) = {
            let state = inner.state.read();
            let slot = state
                .kernels
                .get(kernel.slot())
                .ok_or(Error::InvalidContext)?;
            let missing: Vec<usize> = slot
                .bound
                .iter()
                .enumerate()
                .filter(|(_, bound)| !**bound)
                .map(|(index, _)| index)
                .collect();
            if !missing.is_empty() {
                return Err(Error::IncompleteKernelArgs {
                    name: slot.name.clone(),
                    missing,
                });
            }
            let mut retained = vec![RetainedResource::Kernel(Arc::clone(&slot.res))];
            for buffer in slot.buffer_refs.iter().flatten() {
                retained.push(RetainedResource::Buffer(Arc::clone(buffer)));
            }
            (Arc::clone(&slot.res), retained)
        };

        let local = validate_work_shape(global, local, self.max_work_group_size)?;
        let rounded = round_up_global(global, &local);
        if rounded != global {
            tracing::debug!(requested = ?global, rounded = ?rounded, "global_size_rounded");
        }
        let work_items = rounded.iter().product();

        self.submit(
            &inner,
            CommandKind::Launch,
            CommandDescriptor::LaunchKernel {
                kernel: kernel_res.handle,
                global: rounded,
                local,
            },
            retained,
            Some(work_items),
            waits,
        )
    }

    /// Launch a kernel as a single work item.
    pub fn enqueue_task(&self, kernel: &Kernel, waits: &[&Event]) -> Result<Event> {
        self.enqueue_kernel(kernel, &[1], Some(&[1]), waits)
    }

    /// A completion checkpoint: the marker completes when its prerequisites
    /// do, contributing no device work of its own.
    pub fn enqueue_marker(&self, waits: &[&Event]) -> Result<Event> {
        let inner = self.context()?;
        self.submit(
            &inner,
            CommandKind::Marker,
            CommandDescriptor::Marker,
            Vec::new(),
            None,
            waits,
        )
    }

    /// Order fence. On an out-of-order queue the barrier depends on every
    /// live command of the queue, and every later command implicitly
    /// depends on the barrier. On an in-order queue it degenerates to a
    /// marker, since ordering already holds.
    pub fn enqueue_barrier(&self) -> Result<Event> {
        let inner = self.context()?;
        let queue = self.driver_handle(&inner)?;
        let spec = CommandSpec {
            queue,
            kind: CommandKind::Barrier,
            descriptor: CommandDescriptor::Marker,
            retained: Vec::new(),
            work_items: None,
        };
        let mut seq = self.seq.lock();
        let event = match self.ordering {
            QueueOrdering::InOrder => inner.graph.enqueue(spec, &[], seq.tail, false)?,
            QueueOrdering::OutOfOrder => {
                let event = inner.graph.enqueue(spec, &[], None, true)?;
                seq.barrier = Some(event);
                event
            }
        };
        seq.tail = Some(event);
        Ok(Event::new(
            Arc::clone(&inner.graph),
            event,
            CommandKind::Barrier,
        ))
    }

    /// Hint the driver to push buffered submissions toward the device.
    /// Completion is not implied.
    pub fn flush(&self) -> Result<()> {
        let inner = self.context()?;
        let queue = self.driver_handle(&inner)?;
        inner.driver.flush_queue(queue)?;
        Ok(())
    }

    /// Block until every command enqueued on this queue is terminal.
    /// Returns immediately on an idle queue. Failed commands do not fail
    /// `finish`; their errors live on the events.
    pub fn finish(&self) -> Result<()> {
        let inner = self.context()?;
        let queue = self.driver_handle(&inner)?;
        inner.graph.wait_queue(queue);
        Ok(())
    }

    /// Enqueue a write and block until it completes.
    pub fn write_blocking(&self, buffer: &Buffer, offset: usize, data: &[u8]) -> Result<()> {
        let start = Instant::now();
        let event = self.enqueue_write(buffer, offset, data, &[])?;
        event.wait()?;
        record_transfer(data.len(), "H2D", start.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Enqueue a read and block until the bytes are available.
    pub fn read_blocking(&self, buffer: &Buffer, offset: usize, len: usize) -> Result<Vec<u8>> {
        let start = Instant::now();
        let event = self.enqueue_read(buffer, offset, len, &[])?;
        let data = event.data()?;
        record_transfer(len, "D2H", start.elapsed().as_micros() as u64);
        Ok(data.to_vec())
    }

    /// Typed variant of [`Queue::write_blocking`] for plain-old-data
    /// element types.
    pub fn write_slice_blocking<T: Pod>(
        &self,
        buffer: &Buffer,
        offset: usize,
        data: &[T],
    ) -> Result<()> {
        self.write_blocking(buffer, offset, bytemuck::cast_slice(data))
    }

    /// Typed variant of [`Queue::read_blocking`]: reads `count` elements of
    /// `T` starting at byte `offset`.
    pub fn read_vec_blocking<T: Pod>(
        &self,
        buffer: &Buffer,
        offset: usize,
        count: usize,
    ) -> Result<Vec<T>> {
        let len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::InvalidBufferSize {
                requested: usize::MAX,
                limit: buffer.size(),
            })?;
        let bytes = self.read_blocking(buffer, offset, len)?;
        let mut out = vec![T::zeroed(); count];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
        Ok(out)
    }

    fn submit(
        &self,
        inner: &Arc<ContextInner>,
        kind: CommandKind,
        descriptor: CommandDescriptor,
        retained: Vec<RetainedResource>,
        work_items: Option<usize>,
        waits: &[&Event],
    ) -> Result<Event> {
        let queue = self.driver_handle(inner)?;
        let wait_handles = validate_waits(&inner.graph, waits)?;
        let spec = CommandSpec {
            queue,
            kind,
            descriptor,
            retained,
            work_items,
        };
        let mut seq = self.seq.lock();
        let implicit = match self.ordering {
            QueueOrdering::InOrder => seq.tail,
            QueueOrdering::OutOfOrder => seq.barrier,
        };
        let event = inner.graph.enqueue(spec, &wait_handles, implicit, false)?;
        seq.tail = Some(event);
        Ok(Event::new(Arc::clone(&inner.graph), event, kind))
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Some(inner) = self.ctx.upgrade() {
            inner.state.write().queues.remove(self.handle);
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("slot", &self.handle)
            .field("ordering", &self.ordering)
            .field("max_work_group_size", &self.max_work_group_size)
            .finish()
    }
}

fn resolve_buffer(inner: &Arc<ContextInner>, buffer: &Buffer) -> Result<Arc<BufferRes>> {
    if !buffer.belongs_to(inner) {
        return Err(Error::InvalidContext);
    }
    let state = inner.state.read();
    let slot = state
        .buffers
        .get(buffer.slot())
        .ok_or(Error::InvalidContext)?;
    Ok(Arc::clone(&slot.res))
}

fn validate_waits(graph: &Arc<EventGraph>, waits: &[&Event]) -> Result<Vec<EventHandle>> {
    let mut handles = Vec::with_capacity(waits.len());
    for event in waits {
        if !Arc::ptr_eq(event.graph(), graph) {
            return Err(Error::invalid_wait_list(format!(
                "event {} belongs to a different context",
                event.handle()
            )));
        }
        handles.push(event.handle());
    }
    Ok(handles)
}

fn transfer_bounds(size: usize, offset: usize, len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::InvalidBufferSize {
            requested: 0,
            limit: size,
        });
    }
    let end = offset.checked_add(len).ok_or(Error::InvalidBufferSize {
        requested: usize::MAX,
        limit: size,
    })?;
    if end > size {
        return Err(Error::InvalidBufferSize {
            requested: end,
            limit: size,
        });
    }
    Ok(())
}

/// Check a launch shape and return the concrete local size, defaulting to
/// one work item per group.
fn validate_work_shape(
    global: &[usize],
    local: Option<&[usize]>,
    max_group_size: usize,
) -> Result<Vec<usize>> {
    let dims = global.len();
    if !(1..=3).contains(&dims) {
        return Err(Error::invalid_work_group_size(format!(
            "work dimensionality must be between 1 and 3, found {dims}"
        )));
    }
    for (d, extent) in global.iter().enumerate() {
        if *extent == 0 {
            return Err(Error::invalid_work_group_size(format!(
                "global size must be nonzero, dimension {d} is 0"
            )));
        }
    }
    let local = match local {
        Some(local) => {
            if local.len() != dims {
                return Err(Error::invalid_work_group_size(format!(
                    "global has {dims} dimensions but local has {}",
                    local.len()
                )));
            }
            for (d, extent) in local.iter().enumerate() {
                if *extent == 0 {
                    return Err(Error::invalid_work_group_size(format!(
                        "local size must be nonzero, dimension {d} is 0"
                    )));
                }
            }
            let volume: usize = local.iter().product();
            if volume > max_group_size {
                return Err(Error::invalid_work_group_size(format!(
                    "work-group volume {volume} exceeds device limit {max_group_size}"
                )));
            }
            local.to_vec()
        }
        None => vec![1; dims],
    };
    Ok(local)
}

fn round_up_global(global: &[usize], local: &[usize]) -> Vec<usize> {
    global
        .iter()
        .zip(local)
        .map(|(g, l)| g.div_ceil(*l) * l)
        .collect()
}
