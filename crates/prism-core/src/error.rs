//! Error taxonomy of the dispatch layer
//!
//! Every fallible operation in this crate returns [`enum@Error`]. Driver
//! faults that the layer does not translate into a more specific variant
//! pass through as [`Error::Driver`]. The enum is `Clone` because a command
//! failure is recorded once on its event and handed to every waiter.

use prism_driver::{DeviceHandle, DeviceTypeMask, DriverError, InfoKey, PlatformHandle};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Compiler output captured for one device in a failed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuildLog {
    pub device: DeviceHandle,
    pub log: String,
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("no device matches filter {filter} on platform {platform}")]
    NoDeviceFound {
        platform: PlatformHandle,
        filter: DeviceTypeMask,
    },

    #[error("invalid device: {reason}")]
    InvalidDevice { reason: String },

    #[error("context is no longer valid")]
    InvalidContext,

    #[error("info {key} unavailable for {target}: {reason}")]
    InfoUnavailable {
        key: String,
        target: String,
        reason: String,
    },

    #[error("program build failed on {} device(s)", logs.len())]
    BuildFailure { logs: Vec<DeviceBuildLog> },

    #[error("no kernel named '{name}' in the built program")]
    KernelNotFound { name: String },

    #[error("program has no successful build")]
    ProgramNotBuilt,

    #[error("argument index {index} out of range for a kernel with {arity} argument(s)")]
    InvalidArgIndex { index: usize, arity: usize },

    #[error("invalid value for argument {index}: {reason}")]
    InvalidArgValue { index: usize, reason: String },

    #[error("kernel '{name}' launched with unbound argument(s) {missing:?}")]
    IncompleteKernelArgs { name: String, missing: Vec<usize> },

    #[error("invalid buffer size: requested {requested}, limit {limit}")]
    InvalidBufferSize { requested: usize, limit: usize },

    #[error("memory access violation: {message}")]
    MemObjectAccessViolation { message: String },

    #[error("invalid work-group size: {reason}")]
    InvalidWorkGroupSize { reason: String },

    #[error("invalid event wait list: {reason}")]
    InvalidEventWaitList { reason: String },

    #[error("{} event(s) in the wait list finished with an error", failed.len())]
    ExecStatusErrorInWaitList { failed: Vec<(u64, String)> },

    #[error("context was destroyed before the command completed")]
    ContextDestroyed,

    #[error("event carries no data payload")]
    EventDataUnavailable,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl Error {
    pub fn invalid_device(reason: impl Into<String>) -> Self {
        Self::InvalidDevice {
            reason: reason.into(),
        }
    }

    pub fn info_unavailable(
        key: InfoKey,
        target: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InfoUnavailable {
            key: format!("{key:?}"),
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_arg_value(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidArgValue {
            index,
            reason: reason.into(),
        }
    }

    pub fn invalid_work_group_size(reason: impl Into<String>) -> Self {
        Self::InvalidWorkGroupSize {
            reason: reason.into(),
        }
    }

    pub fn invalid_wait_list(reason: impl Into<String>) -> Self {
        Self::InvalidEventWaitList {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NoDeviceFound {
            platform: PlatformHandle::new(0),
            filter: DeviceTypeMask::GPU,
        };
        assert_eq!(err.to_string(), "no device matches filter GPU on platform plat0");

        let err = Error::IncompleteKernelArgs {
            name: "vector_add".to_string(),
            missing: vec![1, 3],
        };
        assert_eq!(
            err.to_string(),
            "kernel 'vector_add' launched with unbound argument(s) [1, 3]"
        );

        let err = Error::InvalidBufferSize {
            requested: 128,
            limit: 64,
        };
        assert_eq!(err.to_string(), "invalid buffer size: requested 128, limit 64");
    }

    #[test]
    fn test_build_failure_counts_devices() {
        let err = Error::BuildFailure {
            logs: vec![
                DeviceBuildLog {
                    device: DeviceHandle::new(0),
                    log: "error: unexpected token".to_string(),
                },
                DeviceBuildLog {
                    device: DeviceHandle::new(1),
                    log: "error: unexpected token".to_string(),
                },
            ],
        };
        assert_eq!(err.to_string(), "program build failed on 2 device(s)");
    }

    #[test]
    fn test_driver_error_passes_through() {
        let err = Error::from(DriverError::QueueShutdown);
        assert_eq!(err.to_string(), DriverError::QueueShutdown.to_string());
        assert!(matches!(err, Error::Driver(DriverError::QueueShutdown)));
    }

    #[test]
    fn test_info_unavailable_helper() {
        let err = Error::info_unavailable(InfoKey::DeviceName, "dev3", "driver returned garbage");
        assert_eq!(
            err.to_string(),
            "info DeviceName unavailable for dev3: driver returned garbage"
        );
    }
}
