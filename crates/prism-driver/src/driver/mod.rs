//! Driver contract: the trait and the plain-data types that cross it

pub mod traits;
pub mod types;

pub use traits::{CompletionSink, ComputeDriver};
pub use types::{
    AccessMode, ArgSlotKind, AttrTarget, BoundArg, BufferHandle, BuildStatus, CommandDescriptor,
    CommandOutput, ContextHandle, DeviceBuildReport, DeviceHandle, DeviceTypeMask, EventHandle,
    InfoKey, KernelHandle, KernelInfo, PlatformHandle, ProgramHandle, QueueHandle, QueueOrdering,
};
