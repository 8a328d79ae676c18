//! Host-side compute dispatch
//!
//! This crate is the layer an application talks to: it discovers platforms
//! and devices, carves out contexts, compiles kernel programs, allocates
//! device buffers, and runs commands through queues whose dependencies are
//! tracked as an event graph. The actual execution backend sits behind the
//! [`ComputeDriver`] trait from `prism-driver`; everything here is policy
//! and bookkeeping on top of that contract.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  Host ─ platforms ─ devices          (discovery + capability   │
//! │                                       registry, typed decode)  │
//! ├────────────────────────────────────────────────────────────────┤
//! │  Context                                                       │
//! │   ├─ Buffer / Program / Kernel       (arena-tracked resources, │
//! │   │                                   deferred driver release) │
//! │   └─ Queue ──► EventGraph ──► Event  (ordering, fail-fast      │
//! │                                       propagation, profiling)  │
//! └──────────────────────────────┬─────────────────────────────────┘
//!                                │ ComputeDriver / CompletionSink
//!                        ┌───────▼────────┐
//!                        │ driver backend │
//!                        └────────────────┘
//! ```
//!
//! Commands are asynchronous: each enqueue returns an [`Event`], ordering
//! comes from queue mode plus explicit wait lists, and a failed command
//! fails its whole dependent subtree with the root cause. Blocking
//! conveniences ([`Queue::write_blocking`], [`Queue::read_blocking`],
//! [`Queue::finish`]) wrap the same machinery.
//!
//! # Example
//!
//! ```
//! use prism_core::{AccessMode, DeviceTypeMask, Host, HostDriver, QueueOrdering};
//! use std::sync::Arc;
//!
//! let host = Host::new(Arc::new(HostDriver::new()));
//! let platform = host.platforms()?[0].clone();
//! let context = host.create_context_from_type(&platform, DeviceTypeMask::ALL)?;
//! let device = context.devices()[0].clone();
//! let queue = context.create_queue(&device, QueueOrdering::InOrder)?;
//!
//! let buffer = context.create_buffer(AccessMode::ReadWrite, 16)?;
//! queue.write_blocking(&buffer, 0, &[7u8; 16])?;
//! assert_eq!(queue.read_blocking(&buffer, 0, 16)?, vec![7u8; 16]);
//! # Ok::<(), prism_core::Error>(())
//! ```

mod arena;
pub mod buffer;
pub mod context;
pub mod error;
pub mod event;
pub mod graph;
pub mod inventory;
pub mod kernel;
pub mod program;
pub mod queue;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_driver;

pub use buffer::Buffer;
pub use context::Context;
pub use error::{DeviceBuildLog, Error, Result};
pub use event::{wait_for_events, Event};
pub use graph::{CommandKind, EventProfile, EventStatus};
pub use inventory::{Device, Host, Platform};
pub use kernel::{ArgValue, Kernel};
pub use program::Program;
pub use queue::Queue;
pub use registry::{value_kind, InfoValue, ValueKind};

pub use prism_driver::{
    AccessMode, ArgSlotKind, BuildStatus, ComputeDriver, DeviceTypeMask, DriverError, HostDriver,
    InfoKey, QueueOrdering,
};
