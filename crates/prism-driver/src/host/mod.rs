//! In-process reference driver
//!
//! [`HostDriver`] implements the full [`ComputeDriver`] contract against
//! host memory: buffers are byte vectors, programs are parsed kernel-dialect
//! source, and each queue is a worker thread that interprets launches one
//! work-item at a time. It exists so the dispatch layer has a complete,
//! deterministic backend for tests and for machines without a native driver.
//!
//! The exposed topology is configuration, not probing; the default
//! [`HostDriverConfig`] models one platform with the host CPU and an
//! emulated GPU.

pub mod inventory;
pub mod lang;
pub mod memory;
pub mod program;
pub mod queue;

use crate::driver::traits::{CompletionSink, ComputeDriver};
use crate::driver::types::{
    AccessMode, ArgSlotKind, AttrTarget, BoundArg, BufferHandle, BuildStatus, CommandDescriptor,
    ContextHandle, DeviceBuildReport, DeviceHandle, DeviceTypeMask, EventHandle, InfoKey,
    KernelHandle, KernelInfo, PlatformHandle, ProgramHandle, QueueHandle, QueueOrdering,
};
use crate::error::{DriverError, Result};
use crate::host::inventory::{build_records, DeviceRecord, HostDriverConfig, PlatformRecord};
use crate::host::lang::eval::{LaunchGrid, ResolvedArg, Value};
use crate::host::memory::MemoryStore;
use crate::host::program::{compile_for_device, CompiledProgram, ProgramRecord};
use crate::host::queue::{EventTable, PreparedLaunch, QueueWorker, WorkItem};
use parking_lot::{Mutex, RwLock};
use prism_tracing::perf_span;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub use inventory::{DeviceSpec, PlatformSpec};

struct ContextRecord {
    platform: PlatformHandle,
    devices: Vec<DeviceHandle>,
}

struct KernelRecord {
    compiled: Arc<CompiledProgram>,
    kernel_index: usize,
    slots: Vec<ArgSlotKind>,
    args: Mutex<Vec<Option<BoundArg>>>,
}

struct QueueRecord {
    device: DeviceHandle,
    worker: QueueWorker,
    submitted: Vec<EventHandle>,
}

/// The reference driver. Create one, wrap it in an [`Arc`], and hand it to
/// the dispatch layer as an `Arc<dyn ComputeDriver>`.
pub struct HostDriver {
    platforms: Vec<PlatformRecord>,
    memory: Arc<RwLock<MemoryStore>>,
    contexts: RwLock<HashMap<u64, ContextRecord>>,
    programs: RwLock<HashMap<u64, ProgramRecord>>,
    kernels: RwLock<HashMap<u64, KernelRecord>>,
    queues: Mutex<HashMap<u64, QueueRecord>>,
    events: Arc<EventTable>,
    next_context: AtomicU64,
    next_program: AtomicU64,
    next_kernel: AtomicU64,
    next_queue: AtomicU64,
}

impl HostDriver {
    /// Driver with the default one-platform topology
    pub fn new() -> Self {
        Self::with_config(HostDriverConfig::default())
    }

    pub fn with_config(config: HostDriverConfig) -> Self {
        Self {
            platforms: build_records(config),
            memory: Arc::new(RwLock::new(MemoryStore::new())),
            contexts: RwLock::new(HashMap::new()),
            programs: RwLock::new(HashMap::new()),
            kernels: RwLock::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            events: Arc::new(EventTable::new()),
            next_context: AtomicU64::new(0),
            next_program: AtomicU64::new(0),
            next_kernel: AtomicU64::new(0),
            next_queue: AtomicU64::new(0),
        }
    }

    fn find_platform(&self, handle: PlatformHandle) -> Result<&PlatformRecord> {
        self.platforms
            .iter()
            .find(|p| p.handle == handle)
            .ok_or(DriverError::UnknownPlatform(handle))
    }

    fn find_device(&self, handle: DeviceHandle) -> Result<&DeviceRecord> {
        self.platforms
            .iter()
            .flat_map(|p| p.devices.iter())
            .find(|d| d.handle == handle)
            .ok_or(DriverError::UnknownDevice(handle))
    }

    fn check_context(&self, handle: ContextHandle) -> Result<()> {
        if self.contexts.read().contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(DriverError::UnknownContext(handle))
        }
    }

    /// Resolve a launch into the self-contained state the worker needs:
    /// an argument snapshot, the compiled program, and a validated grid
    fn prepare_launch(
        &self,
        kernel: KernelHandle,
        global: &[usize],
        local: &[usize],
        max_group_size: usize,
    ) -> Result<PreparedLaunch> {
        let kernels = self.kernels.read();
        let record = kernels
            .get(&kernel.id())
            .ok_or(DriverError::UnknownKernel(kernel))?;

        let bound = record.args.lock().clone();
        let params = &record.compiled.kernel(record.kernel_index).params;
        let mut args = Vec::with_capacity(bound.len());
        for (index, slot) in bound.iter().enumerate() {
            let value = slot.ok_or(DriverError::UnboundArgument { index })?;
            let resolved = match value {
                BoundArg::Buffer(handle) => {
                    if self.memory.read().record(handle).is_none() {
                        return Err(DriverError::UnknownBuffer(handle));
                    }
                    let param = &params[index];
                    ResolvedArg::Buffer {
                        handle,
                        elem: param.ty,
                        is_const: param.is_const,
                    }
                }
                scalar => ResolvedArg::Scalar(scalar_value(&scalar)),
            };
            args.push(resolved);
        }

        let grid = validate_grid(global, local, max_group_size)?;
        Ok(PreparedLaunch {
            program: record.compiled.clone(),
            kernel_index: record.kernel_index,
            args,
            grid,
        })
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_value(arg: &BoundArg) -> Value {
    match arg {
        BoundArg::Char(v) => Value::Int(*v as i64),
        BoundArg::Short(v) => Value::Int(*v as i64),
        BoundArg::Int(v) => Value::Int(*v as i64),
        BoundArg::Long(v) => Value::Int(*v),
        BoundArg::Uchar(v) => Value::Uint(*v as u64),
        BoundArg::Ushort(v) => Value::Uint(*v as u64),
        BoundArg::Uint(v) => Value::Uint(*v as u64),
        BoundArg::Ulong(v) => Value::Uint(*v),
        BoundArg::Float(v) => Value::Float(*v),
        BoundArg::Buffer(_) => unreachable!("buffer arguments resolve separately"),
    }
}

/// Launch-shape checks. Callers round global sizes to group multiples before
/// submission, so a remainder here is a caller bug, not a policy question.
fn validate_grid(global: &[usize], local: &[usize], max_group_size: usize) -> Result<LaunchGrid> {
    let dims = global.len();
    if !(1..=3).contains(&dims) {
        return Err(DriverError::invalid_work_size(format!(
            "work dimensionality must be between 1 and 3, found {}",
            dims
        )));
    }
    if local.len() != dims {
        return Err(DriverError::invalid_work_size(format!(
            "global has {} dimensions but local has {}",
            dims,
            local.len()
        )));
    }
    for d in 0..dims {
        if global[d] == 0 || local[d] == 0 {
            return Err(DriverError::invalid_work_size(format!(
                "work sizes must be nonzero, dimension {} is {}x{}",
                d, global[d], local[d]
            )));
        }
        if global[d] % local[d] != 0 {
            return Err(DriverError::invalid_work_size(format!(
                "global size {} is not a multiple of local size {} in dimension {}",
                global[d], local[d], d
            )));
        }
    }
    let group_volume: usize = local.iter().product();
    if group_volume > max_group_size {
        return Err(DriverError::invalid_work_size(format!(
            "work-group volume {} exceeds device limit {}",
            group_volume, max_group_size
        )));
    }
    Ok(LaunchGrid::from_dims(global, local))
}

impl ComputeDriver for HostDriver {
    fn enumerate_platforms(&self) -> Result<Vec<PlatformHandle>> {
        Ok(self.platforms.iter().map(|p| p.handle).collect())
    }

    fn enumerate_devices(
        &self,
        platform: PlatformHandle,
        filter: DeviceTypeMask,
    ) -> Result<Vec<DeviceHandle>> {
        let record = self.find_platform(platform)?;
        Ok(record
            .devices
            .iter()
            .filter(|d| d.spec.device_type.intersects(filter))
            .map(|d| d.handle)
            .collect())
    }

    fn query_attribute(&self, target: AttrTarget, key: InfoKey) -> Result<Vec<u8>> {
        match target {
            AttrTarget::Platform(handle) => self.find_platform(handle)?.attribute(key),
            AttrTarget::Device(handle) => self.find_device(handle)?.attribute(key),
        }
    }

    #[tracing::instrument(skip(self, devices), fields(device_count = devices.len()))]
    fn create_context(
        &self,
        platform: PlatformHandle,
        devices: &[DeviceHandle],
    ) -> Result<ContextHandle> {
        self.find_platform(platform)?;
        for device in devices {
            let record = self.find_device(*device)?;
            if record.platform != platform {
                return Err(DriverError::DeviceNotOnPlatform {
                    device: *device,
                    platform,
                });
            }
        }
        let handle = ContextHandle::new(self.next_context.fetch_add(1, Ordering::Relaxed));
        self.contexts.write().insert(
            handle.id(),
            ContextRecord {
                platform,
                devices: devices.to_vec(),
            },
        );
        debug!(context = %handle, "context_created");
        Ok(handle)
    }

    fn release_context(&self, context: ContextHandle) -> Result<()> {
        self.contexts
            .write()
            .remove(&context.id())
            .map(|_| ())
            .ok_or(DriverError::UnknownContext(context))
    }

    fn create_buffer(
        &self,
        context: ContextHandle,
        size: usize,
        mode: AccessMode,
    ) -> Result<BufferHandle> {
        self.check_context(context)?;
        let handle = self.memory.write().allocate(size, mode);
        debug!(buffer = %handle, size, %mode, "buffer_created");
        Ok(handle)
    }

    fn release_buffer(&self, buffer: BufferHandle) -> Result<()> {
        self.memory.write().free(buffer)
    }

    fn compile_program(&self, context: ContextHandle, source: &str) -> Result<ProgramHandle> {
        self.check_context(context)?;
        let handle = ProgramHandle::new(self.next_program.fetch_add(1, Ordering::Relaxed));
        self.programs
            .write()
            .insert(handle.id(), ProgramRecord::new(source));
        Ok(handle)
    }

    #[tracing::instrument(skip(self, devices, options), fields(device_count = devices.len()))]
    fn build_program(
        &self,
        program: ProgramHandle,
        devices: &[DeviceHandle],
        options: &str,
    ) -> Result<Vec<DeviceBuildReport>> {
        for device in devices {
            self.find_device(*device)?;
        }
        let source = {
            let mut programs = self.programs.write();
            let record = programs
                .get_mut(&program.id())
                .ok_or(DriverError::UnknownProgram(program))?;
            for device in devices {
                record.set_status(*device, BuildStatus::InProgress, String::new());
            }
            record.source.clone()
        };

        let _span = perf_span!("program_build");
        let outcomes: Vec<_> = devices
            .par_iter()
            .map(|device| {
                let (status, log, ast) = compile_for_device(&source);
                (*device, status, log, ast)
            })
            .collect();

        let mut programs = self.programs.write();
        let record = programs
            .get_mut(&program.id())
            .ok_or(DriverError::UnknownProgram(program))?;
        let mut reports = Vec::with_capacity(outcomes.len());
        for (device, status, log, ast) in outcomes {
            if record.compiled.is_none() {
                if let Some(ast) = ast {
                    record.compiled = Some(Arc::new(CompiledProgram { ast }));
                }
            }
            record.set_status(device, status, log.clone());
            reports.push(DeviceBuildReport {
                device,
                status,
                log,
            });
        }
        debug!(
            program = %program,
            options,
            successes = reports.iter().filter(|r| r.status == BuildStatus::Success).count(),
            failures = reports.iter().filter(|r| r.status == BuildStatus::Error).count(),
            "program_build_finished"
        );
        Ok(reports)
    }

    fn resolve_kernel_entry_point(
        &self,
        program: ProgramHandle,
        name: &str,
    ) -> Result<KernelInfo> {
        let programs = self.programs.read();
        let record = programs
            .get(&program.id())
            .ok_or(DriverError::UnknownProgram(program))?;
        if !record.has_success() {
            return Err(DriverError::NotBuilt { program });
        }
        let compiled = record
            .compiled
            .clone()
            .ok_or(DriverError::NotBuilt { program })?;
        let kernel_index = compiled
            .kernel_index(name)
            .ok_or_else(|| DriverError::EntryPointNotFound {
                name: name.to_string(),
            })?;
        let slots = compiled.arg_slots(kernel_index);
        let handle = KernelHandle::new(self.next_kernel.fetch_add(1, Ordering::Relaxed));
        self.kernels.write().insert(
            handle.id(),
            KernelRecord {
                compiled,
                kernel_index,
                slots: slots.clone(),
                args: Mutex::new(vec![None; slots.len()]),
            },
        );
        Ok(KernelInfo {
            handle,
            args: slots,
        })
    }

    fn bind_argument(&self, kernel: KernelHandle, index: usize, value: BoundArg) -> Result<()> {
        let kernels = self.kernels.read();
        let record = kernels
            .get(&kernel.id())
            .ok_or(DriverError::UnknownKernel(kernel))?;
        if index >= record.slots.len() {
            return Err(DriverError::InvalidArgIndex {
                index,
                arity: record.slots.len(),
            });
        }
        if value.kind() != record.slots[index] {
            return Err(DriverError::ArgKindMismatch {
                index,
                expected: record.slots[index].to_string(),
                got: value.kind().to_string(),
            });
        }
        if let BoundArg::Buffer(buffer) = value {
            if self.memory.read().record(buffer).is_none() {
                return Err(DriverError::UnknownBuffer(buffer));
            }
        }
        record.args.lock()[index] = Some(value);
        Ok(())
    }

    fn release_kernel(&self, kernel: KernelHandle) -> Result<()> {
        self.kernels
            .write()
            .remove(&kernel.id())
            .map(|_| ())
            .ok_or(DriverError::UnknownKernel(kernel))
    }

    fn release_program(&self, program: ProgramHandle) -> Result<()> {
        self.programs
            .write()
            .remove(&program.id())
            .map(|_| ())
            .ok_or(DriverError::UnknownProgram(program))
    }

    fn create_queue(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        ordering: QueueOrdering,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<QueueHandle> {
        self.find_device(device)?;
        {
            let contexts = self.contexts.read();
            let record = contexts
                .get(&context.id())
                .ok_or(DriverError::UnknownContext(context))?;
            if !record.devices.contains(&device) {
                return Err(DriverError::DeviceNotOnPlatform {
                    device,
                    platform: record.platform,
                });
            }
        }
        let handle = QueueHandle::new(self.next_queue.fetch_add(1, Ordering::Relaxed));
        let worker = QueueWorker::spawn(handle, self.memory.clone(), self.events.clone(), sink)?;
        self.queues.lock().insert(
            handle.id(),
            QueueRecord {
                device,
                worker,
                submitted: Vec::new(),
            },
        );
        debug!(queue = %handle, device = %device, %ordering, "queue_created");
        Ok(handle)
    }

    #[tracing::instrument(skip(self, descriptor), fields(kind = descriptor.kind_name()))]
    fn submit_command(
        &self,
        queue: QueueHandle,
        event: EventHandle,
        descriptor: CommandDescriptor,
    ) -> Result<()> {
        // Launches are resolved here so the worker never touches kernel
        // records; the argument snapshot is immune to later rebinding.
        let launch = match &descriptor {
            CommandDescriptor::LaunchKernel {
                kernel,
                global,
                local,
            } => {
                let max_group_size = {
                    let queues = self.queues.lock();
                    let record = queues
                        .get(&queue.id())
                        .ok_or(DriverError::UnknownQueue(queue))?;
                    self.find_device(record.device)?.spec.max_work_group_size
                };
                Some(self.prepare_launch(*kernel, global, local, max_group_size)?)
            }
            _ => None,
        };

        let mut queues = self.queues.lock();
        let record = queues
            .get_mut(&queue.id())
            .ok_or(DriverError::UnknownQueue(queue))?;
        self.events.register(event);
        if let Err(err) = record.worker.submit(WorkItem {
            event,
            descriptor,
            launch,
        }) {
            self.events.set_done(event, Err(err.clone()));
            return Err(err);
        }
        record.submitted.push(event);
        Ok(())
    }

    fn flush_queue(&self, queue: QueueHandle) -> Result<()> {
        // Workers consume eagerly; there is no submission buffer to push
        let queues = self.queues.lock();
        queues
            .get(&queue.id())
            .map(|_| ())
            .ok_or(DriverError::UnknownQueue(queue))
    }

    fn block_until(&self, queue: QueueHandle) -> Result<()> {
        let submitted = {
            let queues = self.queues.lock();
            queues
                .get(&queue.id())
                .ok_or(DriverError::UnknownQueue(queue))?
                .submitted
                .clone()
        };
        self.events.wait_done(&submitted)
    }

    fn release_queue(&self, queue: QueueHandle) -> Result<()> {
        let record = self
            .queues
            .lock()
            .remove(&queue.id())
            .ok_or(DriverError::UnknownQueue(queue))?;
        // Dropping outside the map lock joins the worker after it drains
        drop(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::types::CommandOutput;

    struct NullSink;

    impl CompletionSink for NullSink {
        fn command_started(&self, _event: EventHandle) {}
        fn command_finished(&self, _event: EventHandle, _outcome: Result<CommandOutput>) {}
    }

    fn sink() -> Arc<dyn CompletionSink> {
        Arc::new(NullSink)
    }

    const VECTOR_ADD: &str = r#"
        __kernel void vector_add(__global uint* in1, __global uint* in2,
                                 __global uint* out, uint n) {
            uint x = get_global_id(0);
            if (x >= n) return;
            out[x] = in1[x] + in2[x];
        }
    "#;

    fn gpu_context(driver: &HostDriver) -> (ContextHandle, DeviceHandle) {
        let platform = driver.enumerate_platforms().unwrap()[0];
        let device = driver
            .enumerate_devices(platform, DeviceTypeMask::GPU)
            .unwrap()[0];
        let context = driver.create_context(platform, &[device]).unwrap();
        (context, device)
    }

    #[test]
    fn test_enumeration_and_filters() {
        let driver = HostDriver::new();
        let platforms = driver.enumerate_platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        let all = driver
            .enumerate_devices(platforms[0], DeviceTypeMask::ALL)
            .unwrap();
        assert_eq!(all.len(), 2);
        let gpus = driver
            .enumerate_devices(platforms[0], DeviceTypeMask::GPU)
            .unwrap();
        assert_eq!(gpus.len(), 1);
        let accelerators = driver
            .enumerate_devices(platforms[0], DeviceTypeMask::ACCELERATOR)
            .unwrap();
        assert!(accelerators.is_empty());
    }

    #[test]
    fn test_context_rejects_foreign_device() {
        let driver = HostDriver::new();
        let platform = driver.enumerate_platforms().unwrap()[0];
        let err = driver
            .create_context(platform, &[DeviceHandle::new(99)])
            .unwrap_err();
        assert_eq!(err, DriverError::UnknownDevice(DeviceHandle::new(99)));
    }

    #[test]
    fn test_vector_add_pipeline() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);

        let in1 = driver
            .create_buffer(context, 120, AccessMode::ReadOnly)
            .unwrap();
        let in2 = driver
            .create_buffer(context, 120, AccessMode::ReadOnly)
            .unwrap();
        let out = driver
            .create_buffer(context, 120, AccessMode::WriteOnly)
            .unwrap();

        let program = driver.compile_program(context, VECTOR_ADD).unwrap();
        let reports = driver.build_program(program, &[device], "").unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, BuildStatus::Success);

        let info = driver
            .resolve_kernel_entry_point(program, "vector_add")
            .unwrap();
        assert_eq!(
            info.args,
            vec![
                ArgSlotKind::Buffer,
                ArgSlotKind::Buffer,
                ArgSlotKind::Buffer,
                ArgSlotKind::Uint
            ]
        );
        driver
            .bind_argument(info.handle, 0, BoundArg::Buffer(in1))
            .unwrap();
        driver
            .bind_argument(info.handle, 1, BoundArg::Buffer(in2))
            .unwrap();
        driver
            .bind_argument(info.handle, 2, BoundArg::Buffer(out))
            .unwrap();
        driver
            .bind_argument(info.handle, 3, BoundArg::Uint(30))
            .unwrap();

        let queue = driver
            .create_queue(context, device, QueueOrdering::InOrder, sink())
            .unwrap();

        let a: Vec<u8> = (0..30u32).flat_map(|v| v.to_le_bytes()).collect();
        let b: Vec<u8> = (0..30u32).flat_map(|v| (v * 2).to_le_bytes()).collect();
        driver
            .submit_command(
                queue,
                EventHandle::new(1),
                CommandDescriptor::WriteBuffer {
                    buffer: in1,
                    offset: 0,
                    data: Arc::from(a),
                },
            )
            .unwrap();
        driver
            .submit_command(
                queue,
                EventHandle::new(2),
                CommandDescriptor::WriteBuffer {
                    buffer: in2,
                    offset: 0,
                    data: Arc::from(b),
                },
            )
            .unwrap();
        driver
            .submit_command(
                queue,
                EventHandle::new(3),
                CommandDescriptor::LaunchKernel {
                    kernel: info.handle,
                    global: vec![32],
                    local: vec![8],
                },
            )
            .unwrap();
        driver
            .submit_command(
                queue,
                EventHandle::new(4),
                CommandDescriptor::ReadBuffer {
                    buffer: out,
                    offset: 0,
                    len: 120,
                },
            )
            .unwrap();
        driver.block_until(queue).unwrap();

        let outcome = driver.events.outcome_of(EventHandle::new(4)).unwrap().unwrap();
        let bytes = outcome.read_data.unwrap();
        let results: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        for (i, v) in results.iter().enumerate() {
            assert_eq!(*v, (i as u32) * 3, "element {}", i);
        }
    }

    #[test]
    fn test_build_failure_reports_log() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);
        let program = driver
            .compile_program(context, "__kernel void broken( {")
            .unwrap();
        let reports = driver.build_program(program, &[device], "").unwrap();
        assert_eq!(reports[0].status, BuildStatus::Error);
        assert!(!reports[0].log.is_empty());
        let err = driver
            .resolve_kernel_entry_point(program, "broken")
            .unwrap_err();
        assert_eq!(err, DriverError::NotBuilt { program });
    }

    #[test]
    fn test_unknown_entry_point() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);
        let program = driver.compile_program(context, VECTOR_ADD).unwrap();
        driver.build_program(program, &[device], "").unwrap();
        let err = driver
            .resolve_kernel_entry_point(program, "vector_mul")
            .unwrap_err();
        assert_eq!(
            err,
            DriverError::EntryPointNotFound {
                name: "vector_mul".to_string()
            }
        );
    }

    #[test]
    fn test_bind_argument_validation() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);
        let program = driver.compile_program(context, VECTOR_ADD).unwrap();
        driver.build_program(program, &[device], "").unwrap();
        let info = driver
            .resolve_kernel_entry_point(program, "vector_add")
            .unwrap();

        let err = driver
            .bind_argument(info.handle, 9, BoundArg::Uint(1))
            .unwrap_err();
        assert_eq!(err, DriverError::InvalidArgIndex { index: 9, arity: 4 });

        let err = driver
            .bind_argument(info.handle, 3, BoundArg::Float(1.0))
            .unwrap_err();
        assert!(matches!(err, DriverError::ArgKindMismatch { index: 3, .. }));

        let err = driver
            .bind_argument(info.handle, 0, BoundArg::Buffer(BufferHandle::new(7)))
            .unwrap_err();
        assert_eq!(err, DriverError::UnknownBuffer(BufferHandle::new(7)));
    }

    #[test]
    fn test_launch_with_unbound_argument() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);
        let program = driver.compile_program(context, VECTOR_ADD).unwrap();
        driver.build_program(program, &[device], "").unwrap();
        let info = driver
            .resolve_kernel_entry_point(program, "vector_add")
            .unwrap();
        let queue = driver
            .create_queue(context, device, QueueOrdering::InOrder, sink())
            .unwrap();
        let err = driver
            .submit_command(
                queue,
                EventHandle::new(1),
                CommandDescriptor::LaunchKernel {
                    kernel: info.handle,
                    global: vec![8],
                    local: vec![8],
                },
            )
            .unwrap_err();
        assert_eq!(err, DriverError::UnboundArgument { index: 0 });
    }

    #[test]
    fn test_grid_validation() {
        assert!(validate_grid(&[32], &[8], 256).is_ok());
        assert!(validate_grid(&[4, 4], &[2, 2], 256).is_ok());
        // Remainder
        assert!(matches!(
            validate_grid(&[30], &[8], 256),
            Err(DriverError::InvalidWorkSize { .. })
        ));
        // Dimension mismatch
        assert!(validate_grid(&[8, 8], &[8], 256).is_err());
        // Empty and oversized
        assert!(validate_grid(&[], &[], 256).is_err());
        assert!(validate_grid(&[8, 8, 8, 8], &[1, 1, 1, 1], 256).is_err());
        // Zero extent
        assert!(validate_grid(&[0], &[1], 256).is_err());
        // Group volume over the device limit
        assert!(validate_grid(&[32, 32], &[32, 32], 256).is_err());
    }

    #[test]
    fn test_block_until_empty_queue() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);
        let queue = driver
            .create_queue(context, device, QueueOrdering::InOrder, sink())
            .unwrap();
        driver.block_until(queue).unwrap();
    }

    #[test]
    fn test_release_queue_invalidates_handle() {
        let driver = HostDriver::new();
        let (context, device) = gpu_context(&driver);
        let queue = driver
            .create_queue(context, device, QueueOrdering::OutOfOrder, sink())
            .unwrap();
        driver.release_queue(queue).unwrap();
        assert_eq!(
            driver.flush_queue(queue).unwrap_err(),
            DriverError::UnknownQueue(queue)
        );
        let err = driver
            .submit_command(queue, EventHandle::new(1), CommandDescriptor::Marker)
            .unwrap_err();
        assert_eq!(err, DriverError::UnknownQueue(queue));
    }

    #[test]
    fn test_release_context_and_reuse() {
        let driver = HostDriver::new();
        let (context, _device) = gpu_context(&driver);
        driver.release_context(context).unwrap();
        assert_eq!(
            driver.release_context(context).unwrap_err(),
            DriverError::UnknownContext(context)
        );
        let err = driver
            .create_buffer(context, 16, AccessMode::ReadWrite)
            .unwrap_err();
        assert_eq!(err, DriverError::UnknownContext(context));
    }
}
