//! Contexts and the resource tables behind them
//!
//! A [`Context`] owns every buffer, program, kernel, and queue created in
//! it, tracked in generational arenas. User-facing resource types hold a
//! weak reference back to the context, so anything used after teardown
//! fails with [`Error::InvalidContext`] instead of touching freed driver
//! state.
//!
//! Driver-side handles are wrapped in `Arc`-ed release guards. Commands in
//! flight retain clones of the guards they reference, which defers the
//! driver release of a dropped resource until the last referencing command
//! reaches a terminal state.
//!
//! Dropping the last `Context` clone tears everything down in dependency
//! order: live commands are failed with [`Error::ContextDestroyed`], queues
//! drain, then kernels, programs, buffers, and finally the driver context
//! itself are released.

use crate::arena::Arena;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::graph::{EventGraph, GraphSink};
use crate::inventory::{Device, Platform};
use crate::program::Program;
use crate::queue::Queue;
use parking_lot::RwLock;
use prism_driver::{
    AccessMode, ArgSlotKind, BufferHandle, BuildStatus, ComputeDriver, ContextHandle, DeviceHandle,
    KernelHandle, ProgramHandle, QueueHandle, QueueOrdering,
};
use prism_tracing::performance::record_allocation;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An isolation domain over a set of devices. Cheap to clone; the last
/// clone dropped tears the context down.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn create(
        driver: Arc<dyn ComputeDriver>,
        platform: Platform,
        devices: Vec<Device>,
    ) -> Result<Self> {
        let handles: Vec<DeviceHandle> = devices.iter().map(Device::handle).collect();
        let handle = driver.create_context(platform.handle(), &handles)?;
        let max_alloc = match smallest_max_alloc(&devices) {
            Ok(limit) => limit,
            Err(err) => {
                if let Err(release_err) = driver.release_context(handle) {
                    tracing::warn!(context = %handle, error = %release_err, "context_release_failed");
                }
                return Err(err);
            }
        };
        tracing::debug!(
            context = %handle,
            device_count = devices.len(),
            max_alloc,
            "context_created"
        );
        Ok(Self {
            inner: Arc::new(ContextInner {
                driver: Arc::clone(&driver),
                handle,
                platform,
                devices,
                max_alloc,
                state: RwLock::new(ContextState::default()),
                graph: EventGraph::new(driver),
            }),
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    /// Devices the context was created over, in creation order.
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    /// Allocate a zero-initialized device buffer.
    ///
    /// The size must be non-zero and no larger than the smallest
    /// max-allocation limit across the context's devices.
    #[tracing::instrument(skip(self), fields(context = %self.inner.handle, size, mode = %mode))]
    pub fn create_buffer(&self, mode: AccessMode, size: usize) -> Result<Buffer> {
        let limit = usize::try_from(self.inner.max_alloc).unwrap_or(usize::MAX);
        if size == 0 || size > limit {
            return Err(Error::InvalidBufferSize {
                requested: size,
                limit,
            });
        }
        let start = Instant::now();
        let handle = self.inner.driver.create_buffer(self.inner.handle, size, mode)?;
        record_allocation(
            size,
            &mode.to_string(),
            start.elapsed().as_micros() as u64,
        );
        let res = Arc::new(BufferRes {
            driver: Arc::clone(&self.inner.driver),
            handle,
        });
        let slot = self.inner.state.write().buffers.insert(BufferSlot {
            res,
            size,
            mode,
        });
        Ok(Buffer::new(Arc::downgrade(&self.inner), slot, size, mode))
    }

    /// Wrap kernel source into an unbuilt program.
    #[tracing::instrument(skip(self, source), fields(context = %self.inner.handle, source_len = source.len()))]
    pub fn create_program(&self, source: &str) -> Result<Program> {
        let handle = self.inner.driver.compile_program(self.inner.handle, source)?;
        let res = Arc::new(ProgramRes {
            driver: Arc::clone(&self.inner.driver),
            handle,
        });
        let slot = self.inner.state.write().programs.insert(ProgramSlot {
            res,
            builds: HashMap::new(),
        });
        tracing::debug!(program = %handle, "program_created");
        Ok(Program::new(Arc::downgrade(&self.inner), slot))
    }

    /// Create a command queue on one of the context's devices.
    #[tracing::instrument(skip(self, device), fields(context = %self.inner.handle, device = %device.handle(), %ordering))]
    pub fn create_queue(&self, device: &Device, ordering: QueueOrdering) -> Result<Queue> {
        if !self
            .inner
            .devices
            .iter()
            .any(|d| d.handle() == device.handle())
        {
            return Err(Error::invalid_device(format!(
                "device {} is not part of this context",
                device.handle()
            )));
        }
        let max_work_group_size = device.max_work_group_size()?;
        let sink = Arc::new(GraphSink::new(Arc::downgrade(&self.inner.graph)));
        let handle = self
            .inner
            .driver
            .create_queue(self.inner.handle, device.handle(), ordering, sink)?;
        let res = Arc::new(QueueRes {
            driver: Arc::clone(&self.inner.driver),
            handle,
        });
        let slot = self.inner.state.write().queues.insert(QueueSlot { res });
        tracing::debug!(queue = %handle, "queue_created");
        Ok(Queue::new(
            Arc::downgrade(&self.inner),
            slot,
            max_work_group_size,
            ordering,
        ))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.inner.handle)
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

fn smallest_max_alloc(devices: &[Device]) -> Result<u64> {
    let mut limit = u64::MAX;
    for device in devices {
        limit = limit.min(device.max_alloc_size()?);
    }
    Ok(limit)
}

pub(crate) struct ContextInner {
    pub(crate) driver: Arc<dyn ComputeDriver>,
    pub(crate) handle: ContextHandle,
    pub(crate) platform: Platform,
    pub(crate) devices: Vec<Device>,
    pub(crate) max_alloc: u64,
    pub(crate) state: RwLock<ContextState>,
    pub(crate) graph: Arc<EventGraph>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Abandon live commands first, then drain the queues while the
        // casualties' retained resources are still alive, and only then
        // release resources in dependency order.
        let casualties = self.graph.fail_all_live();
        let state = self.state.get_mut();
        drop(std::mem::take(&mut state.queues));
        drop(casualties);
        drop(std::mem::take(&mut state.kernels));
        drop(std::mem::take(&mut state.programs));
        drop(std::mem::take(&mut state.buffers));
        if let Err(err) = self.driver.release_context(self.handle) {
            tracing::warn!(context = %self.handle, error = %err, "context_release_failed");
        }
        tracing::debug!(context = %self.handle, "context_destroyed");
    }
}

#[derive(Default)]
pub(crate) struct ContextState {
    pub(crate) buffers: Arena<BufferSlot>,
    pub(crate) programs: Arena<ProgramSlot>,
    pub(crate) kernels: Arena<KernelSlot>,
    pub(crate) queues: Arena<QueueSlot>,
}

// ================================================================================================
// Driver release guards
// ================================================================================================

/// Releases the driver buffer when the last user (slot or in-flight
/// command) lets go.
pub(crate) struct BufferRes {
    driver: Arc<dyn ComputeDriver>,
    pub(crate) handle: BufferHandle,
}

impl Drop for BufferRes {
    fn drop(&mut self) {
        if let Err(err) = self.driver.release_buffer(self.handle) {
            tracing::warn!(buffer = %self.handle, error = %err, "buffer_release_failed");
        }
    }
}

pub(crate) struct ProgramRes {
    driver: Arc<dyn ComputeDriver>,
    pub(crate) handle: ProgramHandle,
}

impl Drop for ProgramRes {
    fn drop(&mut self) {
        if let Err(err) = self.driver.release_program(self.handle) {
            tracing::warn!(program = %self.handle, error = %err, "program_release_failed");
        }
    }
}

/// Holds its program alive: the driver requires kernels to be released
/// before the program they came from.
pub(crate) struct KernelRes {
    driver: Arc<dyn ComputeDriver>,
    pub(crate) handle: KernelHandle,
    _program: Arc<ProgramRes>,
}

impl KernelRes {
    pub(crate) fn new(
        driver: Arc<dyn ComputeDriver>,
        handle: KernelHandle,
        program: Arc<ProgramRes>,
    ) -> Self {
        Self {
            driver,
            handle,
            _program: program,
        }
    }
}

impl Drop for KernelRes {
    fn drop(&mut self) {
        if let Err(err) = self.driver.release_kernel(self.handle) {
            tracing::warn!(kernel = %self.handle, error = %err, "kernel_release_failed");
        }
    }
}

/// Releasing a queue blocks until the driver has drained it.
pub(crate) struct QueueRes {
    driver: Arc<dyn ComputeDriver>,
    pub(crate) handle: QueueHandle,
}

impl Drop for QueueRes {
    fn drop(&mut self) {
        if let Err(err) = self.driver.release_queue(self.handle) {
            tracing::warn!(queue = %self.handle, error = %err, "queue_release_failed");
        }
    }
}

/// Resource kept alive for the lifetime of an in-flight command.
pub(crate) enum RetainedResource {
    Buffer(Arc<BufferRes>),
    Kernel(Arc<KernelRes>),
}

// ================================================================================================
// Arena slots
// ================================================================================================

pub(crate) struct BufferSlot {
    pub(crate) res: Arc<BufferRes>,
    pub(crate) size: usize,
    pub(crate) mode: AccessMode,
}

/// Build outcome recorded per device.
#[derive(Debug, Clone)]
pub(crate) struct BuildRecord {
    pub(crate) status: BuildStatus,
    pub(crate) log: String,
}

pub(crate) struct ProgramSlot {
    pub(crate) res: Arc<ProgramRes>,
    pub(crate) builds: HashMap<DeviceHandle, BuildRecord>,
}

pub(crate) struct KernelSlot {
    pub(crate) res: Arc<KernelRes>,
    pub(crate) name: String,
    /// Declared argument kinds, in slot order
    pub(crate) slots: Vec<ArgSlotKind>,
    /// Which slots have been bound
    pub(crate) bound: Vec<bool>,
    /// Buffer guards per slot, kept so launches can retain them
    pub(crate) buffer_refs: Vec<Option<Arc<BufferRes>>>,
}

pub(crate) struct QueueSlot {
    pub(crate) res: Arc<QueueRes>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Host;
    use prism_driver::{DeviceTypeMask, HostDriver};

    const MIB: usize = 1024 * 1024;

    fn context_over_all() -> (Host, Context) {
        let host = Host::new(Arc::new(HostDriver::new()));
        let platform = host.platforms().unwrap()[0].clone();
        let context = host
            .create_context_from_type(&platform, DeviceTypeMask::ALL)
            .unwrap();
        (host, context)
    }

    #[test]
    fn test_create_context_over_all_devices() {
        let (_host, context) = context_over_all();
        assert_eq!(context.devices().len(), 2);
        assert_eq!(context.platform().name().unwrap(), "Prism Host Platform");
    }

    #[test]
    fn test_create_context_rejects_empty_selection() {
        let host = Host::new(Arc::new(HostDriver::new()));
        let platform = host.platforms().unwrap()[0].clone();
        let err = host.create_context(&platform, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidDevice { .. }));
    }

    #[test]
    fn test_buffer_size_limits() {
        let (_host, context) = context_over_all();
        let err = context.create_buffer(AccessMode::ReadWrite, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidBufferSize { .. }));

        // The emulated GPU caps allocations at 512 MiB, and the context
        // limit is the smallest across its devices.
        let err = context
            .create_buffer(AccessMode::ReadWrite, 600 * MIB)
            .unwrap_err();
        match err {
            Error::InvalidBufferSize { requested, limit } => {
                assert_eq!(requested, 600 * MIB);
                assert_eq!(limit, 512 * MIB);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let buffer = context.create_buffer(AccessMode::ReadOnly, 256).unwrap();
        assert_eq!(buffer.size(), 256);
        assert_eq!(buffer.mode(), AccessMode::ReadOnly);
    }

    #[test]
    fn test_queue_requires_context_device() {
        let host = Host::new(Arc::new(HostDriver::new()));
        let platform = host.platforms().unwrap()[0].clone();
        let cpu_only = platform.devices(DeviceTypeMask::CPU).unwrap();
        let context = host.create_context(&platform, &cpu_only).unwrap();
        let gpu = platform.devices(DeviceTypeMask::GPU).unwrap();
        let err = context
            .create_queue(&gpu[0], QueueOrdering::InOrder)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDevice { .. }));
    }

    #[test]
    fn test_entities_outliving_context_fail_closed() {
        let (_host, context) = context_over_all();
        let program = context.create_program("__kernel void noop() { }").unwrap();
        let buffer = context.create_buffer(AccessMode::ReadWrite, 64).unwrap();
        drop(context);
        assert!(matches!(program.build(&[], ""), Err(Error::InvalidContext)));
        // Cached metadata still answers; dropping late entities is a no-op.
        assert_eq!(buffer.size(), 64);
        drop(buffer);
        drop(program);
    }
}
