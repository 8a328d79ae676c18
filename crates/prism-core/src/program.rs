//! Programs and their per-device build lifecycle
//!
//! A [`Program`] wraps registered kernel source. [`Program::build`] compiles
//! it for a set of devices and records one [`BuildStatus`] and log per
//! device; partial success is an error carrying only the failing devices'
//! logs, while the successful records stay queryable. Kernels can be
//! resolved from a program as soon as any device build succeeded.

use crate::arena::Handle;
use crate::context::{BuildRecord, ContextInner, KernelRes, KernelSlot, ProgramSlot};
use crate::error::{DeviceBuildLog, Error, Result};
use crate::inventory::Device;
use crate::kernel::Kernel;
use prism_driver::{BuildStatus, DeviceHandle, DriverError};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Kernel source registered with a context, buildable per device.
pub struct Program {
    ctx: Weak<ContextInner>,
    handle: Handle<ProgramSlot>,
}

impl Program {
    pub(crate) fn new(ctx: Weak<ContextInner>, handle: Handle<ProgramSlot>) -> Self {
        Self { ctx, handle }
    }

    fn context(&self) -> Result<Arc<ContextInner>> {
        self.ctx.upgrade().ok_or(Error::InvalidContext)
    }

    /// Build the program for `devices`, or for every device of the context
    /// when the list is empty. `options` is forwarded to the driver
    /// untouched.
    ///
    /// Every listed device ends up with a build record. When some devices
    /// fail the call returns [`Error::BuildFailure`] carrying exactly the
    /// failing logs; successful records are kept, so
    /// [`Program::create_kernel`] still works afterwards.
    #[tracing::instrument(skip(self, devices, options), fields(device_count = devices.len()))]
    pub fn build(&self, devices: &[Device], options: &str) -> Result<()> {
        let inner = self.context()?;
        let targets: Vec<Device> = if devices.is_empty() {
            inner.devices.clone()
        } else {
            for device in devices {
                if !inner
                    .devices
                    .iter()
                    .any(|d| d.handle() == device.handle())
                {
                    return Err(Error::invalid_device(format!(
                        "device {} is not part of this context",
                        device.handle()
                    )));
                }
            }
            devices.to_vec()
        };
        let handles: Vec<DeviceHandle> = targets.iter().map(Device::handle).collect();

        // Mark the targets in-progress, remembering what they held before
        // so a driver-level failure leaves the records as they were.
        let mut previous: HashMap<DeviceHandle, Option<BuildRecord>> = HashMap::new();
        let program_res = {
            let mut state = inner.state.write();
            let slot = state
                .programs
                .get_mut(self.handle)
                .ok_or(Error::InvalidContext)?;
            for handle in &handles {
                previous.insert(*handle, slot.builds.get(handle).cloned());
                slot.builds.insert(
                    *handle,
                    BuildRecord {
                        status: BuildStatus::InProgress,
                        log: String::new(),
                    },
                );
            }
            Arc::clone(&slot.res)
        };

        let reports = match inner
            .driver
            .build_program(program_res.handle, &handles, options)
        {
            Ok(reports) => reports,
            Err(err) => {
                let mut state = inner.state.write();
                if let Some(slot) = state.programs.get_mut(self.handle) {
                    for (handle, record) in previous {
                        match record {
                            Some(record) => {
                                slot.builds.insert(handle, record);
                            }
                            None => {
                                slot.builds.remove(&handle);
                            }
                        }
                    }
                }
                return Err(err.into());
            }
        };

        let mut failed = Vec::new();
        {
            let mut state = inner.state.write();
            let slot = state
                .programs
                .get_mut(self.handle)
                .ok_or(Error::InvalidContext)?;
            for report in &reports {
                slot.builds.insert(
                    report.device,
                    BuildRecord {
                        status: report.status,
                        log: report.log.clone(),
                    },
                );
                if report.status == BuildStatus::Error {
                    failed.push(DeviceBuildLog {
                        device: report.device,
                        log: report.log.clone(),
                    });
                }
            }
        }
        tracing::debug!(
            program = %program_res.handle,
            successes = reports.len() - failed.len(),
            failures = failed.len(),
            "program_built"
        );
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::BuildFailure { logs: failed })
        }
    }

    /// Build state recorded for one device, [`BuildStatus::None`] before the
    /// first build that listed it.
    pub fn build_status(&self, device: &Device) -> Result<BuildStatus> {
        let inner = self.context()?;
        let state = inner.state.read();
        let slot = state
            .programs
            .get(self.handle)
            .ok_or(Error::InvalidContext)?;
        Ok(slot
            .builds
            .get(&device.handle())
            .map(|record| record.status)
            .unwrap_or(BuildStatus::None))
    }

    /// Build log recorded for one device. Empty on success, populated with
    /// compiler diagnostics on failure, `None` before any build.
    pub fn build_log(&self, device: &Device) -> Result<Option<String>> {
        let inner = self.context()?;
        let state = inner.state.read();
        let slot = state
            .programs
            .get(self.handle)
            .ok_or(Error::InvalidContext)?;
        Ok(slot
            .builds
            .get(&device.handle())
            .map(|record| record.log.clone()))
    }

    /// Resolve a named entry point into a [`Kernel`].
    ///
    /// Requires at least one successful device build. The kernel holds the
    /// program alive on the driver side, so dropping the program early is
    /// fine.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let inner = self.context()?;
        let program_res = {
            let state = inner.state.read();
            let slot = state
                .programs
                .get(self.handle)
                .ok_or(Error::InvalidContext)?;
            if !slot
                .builds
                .values()
                .any(|record| record.status == BuildStatus::Success)
            {
                return Err(Error::ProgramNotBuilt);
            }
            Arc::clone(&slot.res)
        };

        let info = inner
            .driver
            .resolve_kernel_entry_point(program_res.handle, name)
            .map_err(|err| match err {
                DriverError::EntryPointNotFound { .. } => Error::KernelNotFound {
                    name: name.to_string(),
                },
                DriverError::NotBuilt { .. } => Error::ProgramNotBuilt,
                other => Error::Driver(other),
            })?;

        let arity = info.args.len();
        let res = Arc::new(KernelRes::new(
            Arc::clone(&inner.driver),
            info.handle,
            program_res,
        ));
        let slot = inner.state.write().kernels.insert(KernelSlot {
            res,
            name: name.to_string(),
            slots: info.args,
            bound: vec![false; arity],
            buffer_refs: vec![None; arity],
        });
        tracing::debug!(kernel = %info.handle, name, arity, "kernel_created");
        Ok(Kernel::new(Arc::downgrade(&inner), slot))
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Some(inner) = self.ctx.upgrade() {
            inner.state.write().programs.remove(self.handle);
        }
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program").field("slot", &self.handle).finish()
    }
}
