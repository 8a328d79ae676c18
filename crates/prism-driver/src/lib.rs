//! Compute driver contract and in-process reference driver
//!
//! This crate defines the boundary between a host-side dispatch layer and a
//! compute backend, plus one complete backend that runs entirely in host
//! memory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      dispatch layer                          │
//! │        (contexts, event graph, policy and validation)        │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ ComputeDriver / CompletionSink
//! ┌──────────────────────────────▼──────────────────────────────┐
//! │                         HostDriver                           │
//! │  ┌────────────┐ ┌────────────┐ ┌──────────────────────────┐ │
//! │  │ inventory  │ │   memory   │ │   lang (lexer, parser,   │ │
//! │  │ (topology) │ │ (buffers)  │ │   work-item interpreter) │ │
//! │  └────────────┘ └────────────┘ └──────────────────────────┘ │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  queue workers: one thread per queue, completions    │   │
//! │  │  reported through the caller's CompletionSink        │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The contract is intentionally thin: a driver enumerates topology, owns
//! resources, compiles programs, and executes fully-resolved commands. All
//! dependency ordering happens above it; a command reaches
//! [`ComputeDriver::submit_command`] only when it is already eligible to
//! run, and its completion flows back asynchronously through the
//! [`CompletionSink`] attached to the queue.
//!
//! # Example
//!
//! ```
//! use prism_driver::{ComputeDriver, DeviceTypeMask, HostDriver};
//!
//! let driver = HostDriver::new();
//! let platforms = driver.enumerate_platforms()?;
//! let devices = driver.enumerate_devices(platforms[0], DeviceTypeMask::ALL)?;
//! assert!(!devices.is_empty());
//! # Ok::<(), prism_driver::DriverError>(())
//! ```

pub mod driver;
pub mod error;
pub mod host;

pub use driver::{
    AccessMode, ArgSlotKind, AttrTarget, BoundArg, BufferHandle, BuildStatus, CommandDescriptor,
    CommandOutput, CompletionSink, ComputeDriver, ContextHandle, DeviceBuildReport, DeviceHandle,
    DeviceTypeMask, EventHandle, InfoKey, KernelHandle, KernelInfo, PlatformHandle, ProgramHandle,
    QueueHandle, QueueOrdering,
};
pub use error::{DriverError, Result};
pub use host::{DeviceSpec, HostDriver, PlatformSpec};
pub use host::inventory::HostDriverConfig;
