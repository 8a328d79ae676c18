//! Driver-boundary error types

use crate::driver::types::{
    AccessMode, BufferHandle, ContextHandle, DeviceHandle, EventHandle, KernelHandle,
    PlatformHandle, ProgramHandle, QueueHandle,
};
use thiserror::Error;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors produced at the driver boundary.
///
/// `Clone` is required because a command failure is stored once in the
/// driver's event table and handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    #[error("unknown platform handle: {0}")]
    UnknownPlatform(PlatformHandle),

    #[error("unknown device handle: {0}")]
    UnknownDevice(DeviceHandle),

    #[error("unknown context handle: {0}")]
    UnknownContext(ContextHandle),

    #[error("unknown buffer handle: {0}")]
    UnknownBuffer(BufferHandle),

    #[error("unknown program handle: {0}")]
    UnknownProgram(ProgramHandle),

    #[error("unknown kernel handle: {0}")]
    UnknownKernel(KernelHandle),

    #[error("unknown queue handle: {0}")]
    UnknownQueue(QueueHandle),

    #[error("unknown event handle: {0}")]
    UnknownEvent(EventHandle),

    #[error("device {device} does not belong to platform {platform}")]
    DeviceNotOnPlatform {
        device: DeviceHandle,
        platform: PlatformHandle,
    },

    #[error("attribute {key:?} is not answerable for target {target}")]
    UnsupportedAttribute { key: String, target: String },

    #[error("buffer range out of bounds: offset {offset} + len {len} > size {size}")]
    BufferOutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("kernel attempted to {op} {buffer}, which is {mode}")]
    AccessViolation {
        buffer: BufferHandle,
        mode: AccessMode,
        op: &'static str,
    },

    #[error("program {program} has no successful build for the target device")]
    NotBuilt { program: ProgramHandle },

    #[error("no kernel named '{name}' in program")]
    EntryPointNotFound { name: String },

    #[error("argument index {index} out of range for kernel with {arity} arguments")]
    InvalidArgIndex { index: usize, arity: usize },

    #[error("argument {index} expects {expected} but received {got}")]
    ArgKindMismatch {
        index: usize,
        expected: String,
        got: String,
    },

    #[error("argument {index} was never bound")]
    UnboundArgument { index: usize },

    #[error("invalid work size: {reason}")]
    InvalidWorkSize { reason: String },

    #[error("kernel execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("queue has shut down")]
    QueueShutdown,
}

impl DriverError {
    pub fn unsupported_attribute(
        key: crate::driver::types::InfoKey,
        target: crate::driver::types::AttrTarget,
    ) -> Self {
        Self::UnsupportedAttribute {
            key: format!("{:?}", key),
            target: target.to_string(),
        }
    }

    pub fn invalid_work_size(reason: impl Into<String>) -> Self {
        Self::InvalidWorkSize {
            reason: reason.into(),
        }
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::BufferOutOfBounds {
            offset: 100,
            len: 64,
            size: 128,
        };
        assert_eq!(
            err.to_string(),
            "buffer range out of bounds: offset 100 + len 64 > size 128"
        );
    }

    #[test]
    fn test_access_violation_display() {
        let err = DriverError::AccessViolation {
            buffer: BufferHandle::new(3),
            mode: AccessMode::ReadOnly,
            op: "write",
        };
        assert_eq!(err.to_string(), "kernel attempted to write buf3, which is read-only");
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = DriverError::UnknownBuffer(BufferHandle::new(9));
        let copy = err.clone();
        assert_eq!(err, copy);
    }
}
