//! A scripted [`ComputeDriver`] for unit tests.
//!
//! The real host driver never fails an attribute query and builds every
//! device identically, so the failure paths of the dispatch layer need a
//! backend that misbehaves on request: specific info keys can be made to
//! fail and specific devices can be made to report build errors.

use parking_lot::Mutex;
use prism_driver::{
    AccessMode, ArgSlotKind, AttrTarget, BoundArg, BufferHandle, BuildStatus, CommandDescriptor,
    CommandOutput, CompletionSink, ComputeDriver, ContextHandle, DeviceBuildReport, DeviceHandle,
    DeviceTypeMask, DriverError, EventHandle, InfoKey, KernelHandle, KernelInfo, PlatformHandle,
    ProgramHandle, QueueHandle, QueueOrdering, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const PLATFORM: PlatformHandle = PlatformHandle::new(0);
const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

struct ScriptedDevice {
    name: &'static str,
    device_type: DeviceTypeMask,
}

fn device_spec(device: DeviceHandle) -> Result<ScriptedDevice> {
    match device.id() {
        0 => Ok(ScriptedDevice {
            name: "Scripted CPU",
            device_type: DeviceTypeMask::CPU.union(DeviceTypeMask::DEFAULT),
        }),
        1 => Ok(ScriptedDevice {
            name: "Scripted GPU",
            device_type: DeviceTypeMask::GPU,
        }),
        _ => Err(DriverError::UnknownDevice(device)),
    }
}

pub(crate) struct ScriptedDriver {
    failing_keys: Vec<InfoKey>,
    build_outcomes: HashMap<u64, BuildStatus>,
    queues: Mutex<HashMap<u64, Arc<dyn CompletionSink>>>,
    next_handle: AtomicU64,
}

impl ScriptedDriver {
    pub(crate) fn new() -> Self {
        Self {
            failing_keys: Vec::new(),
            build_outcomes: HashMap::new(),
            queues: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(0),
        }
    }

    /// Make every query for `key` fail.
    pub(crate) fn with_failing_key(mut self, key: InfoKey) -> Self {
        self.failing_keys.push(key);
        self
    }

    /// Fix the build outcome reported for the device with raw id
    /// `device_id`. Unscripted devices build successfully.
    pub(crate) fn with_build_outcome(mut self, device_id: u64, status: BuildStatus) -> Self {
        self.build_outcomes.insert(device_id, status);
        self
    }

    fn mint(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

impl ComputeDriver for ScriptedDriver {
    fn enumerate_platforms(&self) -> Result<Vec<PlatformHandle>> {
        Ok(vec![PLATFORM])
    }

    fn enumerate_devices(
        &self,
        platform: PlatformHandle,
        filter: DeviceTypeMask,
    ) -> Result<Vec<DeviceHandle>> {
        if platform != PLATFORM {
            return Err(DriverError::UnknownPlatform(platform));
        }
        let mut devices = Vec::new();
        for id in 0..2 {
            let handle = DeviceHandle::new(id);
            if device_spec(handle)?.device_type.intersects(filter) {
                devices.push(handle);
            }
        }
        Ok(devices)
    }

    fn query_attribute(&self, target: AttrTarget, key: InfoKey) -> Result<Vec<u8>> {
        if self.failing_keys.contains(&key) {
            return Err(DriverError::unsupported_attribute(key, target));
        }
        match target {
            AttrTarget::Platform(handle) => {
                if handle != PLATFORM {
                    return Err(DriverError::UnknownPlatform(handle));
                }
                let text = match key {
                    InfoKey::PlatformName => "Scripted Platform",
                    InfoKey::PlatformVendor => "Scripted",
                    InfoKey::PlatformVersion => "PRISM 1.0",
                    InfoKey::PlatformProfile => "FULL_PROFILE",
                    InfoKey::PlatformExtensions => "",
                    _ => return Err(DriverError::unsupported_attribute(key, target)),
                };
                Ok(text.as_bytes().to_vec())
            }
            AttrTarget::Device(handle) => {
                let spec = device_spec(handle)?;
                let raw = match key {
                    InfoKey::DeviceName => spec.name.as_bytes().to_vec(),
                    InfoKey::DeviceVendor => b"Scripted".to_vec(),
                    InfoKey::DeviceExtensions => Vec::new(),
                    InfoKey::DeviceType => spec.device_type.0.to_le_bytes().to_vec(),
                    InfoKey::DeviceComputeUnits => 4u32.to_le_bytes().to_vec(),
                    InfoKey::DeviceGlobalMemSize => (1024 * MIB).to_le_bytes().to_vec(),
                    InfoKey::DeviceLocalMemSize => (32 * KIB).to_le_bytes().to_vec(),
                    InfoKey::DeviceMaxAllocSize => (256 * MIB).to_le_bytes().to_vec(),
                    InfoKey::DeviceMaxWorkGroupSize => 64u64.to_le_bytes().to_vec(),
                    InfoKey::DeviceMaxWorkItemDimensions => 3u32.to_le_bytes().to_vec(),
                    InfoKey::DeviceMaxWorkItemSizes => [64u64, 64, 64]
                        .iter()
                        .flat_map(|size| size.to_le_bytes())
                        .collect(),
                    InfoKey::DeviceAvailable => vec![1],
                    InfoKey::DevicePlatform => PLATFORM.id().to_le_bytes().to_vec(),
                    _ => return Err(DriverError::unsupported_attribute(key, target)),
                };
                Ok(raw)
            }
        }
    }

    fn create_context(
        &self,
        platform: PlatformHandle,
        devices: &[DeviceHandle],
    ) -> Result<ContextHandle> {
        if platform != PLATFORM {
            return Err(DriverError::UnknownPlatform(platform));
        }
        for device in devices {
            device_spec(*device)?;
        }
        Ok(ContextHandle::new(self.mint()))
    }

    fn release_context(&self, _context: ContextHandle) -> Result<()> {
        Ok(())
    }

    fn create_buffer(
        &self,
        _context: ContextHandle,
        _size: usize,
        _mode: AccessMode,
    ) -> Result<BufferHandle> {
        Ok(BufferHandle::new(self.mint()))
    }

    fn release_buffer(&self, _buffer: BufferHandle) -> Result<()> {
        Ok(())
    }

    fn compile_program(&self, _context: ContextHandle, _source: &str) -> Result<ProgramHandle> {
        Ok(ProgramHandle::new(self.mint()))
    }

    fn build_program(
        &self,
        _program: ProgramHandle,
        devices: &[DeviceHandle],
        _options: &str,
    ) -> Result<Vec<DeviceBuildReport>> {
        let mut reports = Vec::with_capacity(devices.len());
        for device in devices {
            device_spec(*device)?;
            let status = self
                .build_outcomes
                .get(&device.id())
                .copied()
                .unwrap_or(BuildStatus::Success);
            let log = match status {
                BuildStatus::Error => "scripted build failure".to_string(),
                _ => String::new(),
            };
            reports.push(DeviceBuildReport {
                device: *device,
                status,
                log,
            });
        }
        Ok(reports)
    }

    fn resolve_kernel_entry_point(
        &self,
        _program: ProgramHandle,
        name: &str,
    ) -> Result<KernelInfo> {
        if name != "vadd" {
            return Err(DriverError::EntryPointNotFound {
                name: name.to_string(),
            });
        }
        Ok(KernelInfo {
            handle: KernelHandle::new(self.mint()),
            args: vec![
                ArgSlotKind::Buffer,
                ArgSlotKind::Buffer,
                ArgSlotKind::Buffer,
                ArgSlotKind::Uint,
            ],
        })
    }

    fn bind_argument(&self, _kernel: KernelHandle, _index: usize, _value: BoundArg) -> Result<()> {
        Ok(())
    }

    fn release_kernel(&self, _kernel: KernelHandle) -> Result<()> {
        Ok(())
    }

    fn release_program(&self, _program: ProgramHandle) -> Result<()> {
        Ok(())
    }

    fn create_queue(
        &self,
        _context: ContextHandle,
        device: DeviceHandle,
        _ordering: QueueOrdering,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<QueueHandle> {
        device_spec(device)?;
        let handle = QueueHandle::new(self.mint());
        self.queues.lock().insert(handle.id(), sink);
        Ok(handle)
    }

    fn submit_command(
        &self,
        queue: QueueHandle,
        event: EventHandle,
        descriptor: CommandDescriptor,
    ) -> Result<()> {
        let sink = self
            .queues
            .lock()
            .get(&queue.id())
            .cloned()
            .ok_or(DriverError::UnknownQueue(queue))?;
        let output = match descriptor {
            CommandDescriptor::ReadBuffer { len, .. } => CommandOutput::with_read_data(vec![0; len]),
            _ => CommandOutput::default(),
        };
        // The completion contract forbids calling the sink from inside
        // submit_command, hence the throwaway thread.
        std::thread::spawn(move || {
            sink.command_started(event);
            sink.command_finished(event, Ok(output));
        });
        Ok(())
    }

    fn flush_queue(&self, queue: QueueHandle) -> Result<()> {
        if self.queues.lock().contains_key(&queue.id()) {
            Ok(())
        } else {
            Err(DriverError::UnknownQueue(queue))
        }
    }

    fn block_until(&self, _queue: QueueHandle) -> Result<()> {
        Ok(())
    }

    fn release_queue(&self, queue: QueueHandle) -> Result<()> {
        self.queues.lock().remove(&queue.id());
        Ok(())
    }
}
