//! The compute driver contract
//!
//! A driver owns four concerns and nothing else:
//!
//! 1. **Topology** - enumerating platforms and devices and answering raw
//!    attribute queries about them.
//! 2. **Resources** - creating and releasing contexts, buffers, programs,
//!    kernels, and queues, and binding kernel arguments.
//! 3. **Compilation** - building program source for devices, reporting
//!    per-device status and logs.
//! 4. **Execution** - accepting fully-resolved commands on queues and
//!    reporting their completion asynchronously through a [`CompletionSink`].
//!
//! Everything above this line - dependency ordering, event state, access
//! policy, work-size policy, teardown sequencing - belongs to the dispatch
//! layer; a driver never sees a wait list and never decides what runs next.
//!
//! ```text
//!   dispatch layer                        driver
//!   ┌───────────────────────┐            ┌───────────────────────────┐
//!   │ event graph decides   │ submit     │ queue accepts descriptor  │
//!   │ "this command is      ├───────────►│ and executes it on its    │
//!   │  ready to run"        │            │ own thread(s)             │
//!   │                       │ started /  │                           │
//!   │ graph advances state, │ finished   │                           │
//!   │ releases dependents   │◄───────────┤ reports through the sink  │
//!   └───────────────────────┘            └───────────────────────────┘
//! ```

use crate::driver::types::{
    AccessMode, AttrTarget, BoundArg, BufferHandle, CommandDescriptor, CommandOutput,
    ContextHandle, DeviceBuildReport, DeviceHandle, DeviceTypeMask, EventHandle, InfoKey,
    KernelHandle, KernelInfo, PlatformHandle, ProgramHandle, QueueHandle, QueueOrdering,
};
use crate::error::{DriverError, Result};
use std::sync::Arc;

/// Receiver for asynchronous command lifecycle notifications.
///
/// A sink is attached to a queue at creation time. The driver invokes it from
/// its own execution threads, never from inside
/// [`ComputeDriver::submit_command`]; the dispatch layer relies on that to
/// hold its own locks across submission.
pub trait CompletionSink: Send + Sync {
    /// A previously submitted command began executing
    fn command_started(&self, event: EventHandle);

    /// A previously submitted command finished, successfully or not.
    ///
    /// Called exactly once per submitted command, always after
    /// `command_started` for the same event.
    fn command_finished(&self, event: EventHandle, outcome: Result<CommandOutput>);
}

/// The contract between the dispatch layer and a compute backend.
///
/// Implementations must be fully thread-safe; the dispatch layer calls in
/// from arbitrary threads, including from completion callbacks.
///
/// Handle discipline: every handle returned by a `create_*` or resolve call
/// stays valid until its matching `release_*` call. Using a released or
/// never-issued handle yields an `Unknown*` error, never undefined behavior.
pub trait ComputeDriver: Send + Sync {
    // --------------------------------------------------------------------------------------------
    // Topology
    // --------------------------------------------------------------------------------------------

    /// All platforms this driver exposes. Stable across calls.
    fn enumerate_platforms(&self) -> Result<Vec<PlatformHandle>>;

    /// Devices of `platform` whose type mask intersects `filter`.
    ///
    /// An empty result is not an error here; the dispatch layer decides
    /// whether "no devices" is reportable for the caller's request.
    fn enumerate_devices(
        &self,
        platform: PlatformHandle,
        filter: DeviceTypeMask,
    ) -> Result<Vec<DeviceHandle>>;

    /// Raw encoded value of one attribute of a platform or device.
    ///
    /// Encodings are fixed per key kind: UTF-8 text, little-endian integers,
    /// a single byte for booleans, a little-endian `u64` sequence for size
    /// lists, and a little-endian `u64` for handle references. Asking a
    /// platform key of a device target (or vice versa) is
    /// [`DriverError::UnsupportedAttribute`].
    fn query_attribute(&self, target: AttrTarget, key: InfoKey) -> Result<Vec<u8>>;

    // --------------------------------------------------------------------------------------------
    // Contexts and memory
    // --------------------------------------------------------------------------------------------

    /// Create a context spanning `devices`, all of which must belong to
    /// `platform`.
    fn create_context(
        &self,
        platform: PlatformHandle,
        devices: &[DeviceHandle],
    ) -> Result<ContextHandle>;

    /// Release a context. Resources created in it must already be released.
    fn release_context(&self, context: ContextHandle) -> Result<()>;

    /// Allocate a zero-initialized device memory region of `size` bytes.
    fn create_buffer(
        &self,
        context: ContextHandle,
        size: usize,
        mode: AccessMode,
    ) -> Result<BufferHandle>;

    /// Release a buffer. The dispatch layer guarantees no in-flight command
    /// still references it.
    fn release_buffer(&self, buffer: BufferHandle) -> Result<()>;

    // --------------------------------------------------------------------------------------------
    // Programs and kernels
    // --------------------------------------------------------------------------------------------

    /// Register program source with a context. No compilation happens here.
    fn compile_program(&self, context: ContextHandle, source: &str) -> Result<ProgramHandle>;

    /// Build the program for each listed device, returning one report per
    /// device in the same order. `options` is a free-form compiler option
    /// string forwarded untouched.
    ///
    /// Partial success is legal and expected: a device the source cannot
    /// target gets an `Error` report with a populated log while the others
    /// report `Success`. The call itself only fails for invalid handles.
    fn build_program(
        &self,
        program: ProgramHandle,
        devices: &[DeviceHandle],
        options: &str,
    ) -> Result<Vec<DeviceBuildReport>>;

    /// Resolve a named entry point in a built program.
    ///
    /// Fails with [`DriverError::NotBuilt`] when no device build succeeded
    /// and [`DriverError::EntryPointNotFound`] when the name is absent.
    fn resolve_kernel_entry_point(&self, program: ProgramHandle, name: &str)
        -> Result<KernelInfo>;

    /// Bind one positional argument of a kernel. Rebinding a slot replaces
    /// the previous value.
    fn bind_argument(&self, kernel: KernelHandle, index: usize, value: BoundArg) -> Result<()>;

    /// Release a kernel handle.
    fn release_kernel(&self, kernel: KernelHandle) -> Result<()>;

    /// Release a program handle. Kernels resolved from it must already be
    /// released.
    fn release_program(&self, program: ProgramHandle) -> Result<()>;

    // --------------------------------------------------------------------------------------------
    // Queues and execution
    // --------------------------------------------------------------------------------------------

    /// Create a submission channel on `device` reporting completions to
    /// `sink`.
    ///
    /// `ordering` is advisory for the driver: the dispatch layer already
    /// sequences submissions so that a command is only submitted once its
    /// prerequisites completed, so a driver may execute submitted commands
    /// in arrival order regardless.
    fn create_queue(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        ordering: QueueOrdering,
        sink: Arc<dyn CompletionSink>,
    ) -> Result<QueueHandle>;

    /// Submit one command for execution, tagged with a caller-chosen event
    /// handle that completion notifications will carry.
    ///
    /// Must not invoke the sink synchronously. Validation that can only
    /// happen at execution time (bounds, access modes, kernel faults) is
    /// reported through `command_finished`, not as a return value here.
    fn submit_command(
        &self,
        queue: QueueHandle,
        event: EventHandle,
        descriptor: CommandDescriptor,
    ) -> Result<()>;

    /// Hint that buffered submissions should reach the device. Completion is
    /// not implied.
    fn flush_queue(&self, queue: QueueHandle) -> Result<()>;

    /// Block until every command submitted to `queue` so far has finished.
    fn block_until(&self, queue: QueueHandle) -> Result<()>;

    /// Release a queue, blocking until its submitted commands drain.
    fn release_queue(&self, queue: QueueHandle) -> Result<()>;
}
