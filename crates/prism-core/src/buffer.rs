//! Device buffer handles

use crate::arena::Handle;
use crate::context::{BufferSlot, ContextInner};
use prism_driver::AccessMode;
use std::fmt;
use std::sync::{Arc, Weak};

/// A device memory region owned by a [`Context`](crate::Context).
///
/// The size and access mode are fixed at creation; data moves in and out
/// through commands enqueued on a [`Queue`](crate::Queue). Dropping the
/// buffer releases the driver region once no in-flight command references
/// it anymore.
pub struct Buffer {
    ctx: Weak<ContextInner>,
    handle: Handle<BufferSlot>,
    size: usize,
    mode: AccessMode,
}

impl Buffer {
    pub(crate) fn new(
        ctx: Weak<ContextInner>,
        handle: Handle<BufferSlot>,
        size: usize,
        mode: AccessMode,
    ) -> Self {
        Self {
            ctx,
            handle,
            size,
            mode,
        }
    }

    /// Capacity in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Device-side access contract. Host transfers are not constrained by
    /// the mode; kernels are.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub(crate) fn slot(&self) -> Handle<BufferSlot> {
        self.handle
    }

    /// True when this buffer was created by `inner`. Slot handles are only
    /// meaningful within their own context's arena, so callers check this
    /// before resolving.
    pub(crate) fn belongs_to(&self, inner: &Arc<ContextInner>) -> bool {
        self.ctx
            .upgrade()
            .map(|ctx| Arc::ptr_eq(&ctx, inner))
            .unwrap_or(false)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(inner) = self.ctx.upgrade() {
            inner.state.write().buffers.remove(self.handle);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("slot", &self.handle)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Host;
    use prism_driver::{DeviceTypeMask, HostDriver};

    #[test]
    fn test_drop_releases_slot() {
        let host = Host::new(Arc::new(HostDriver::new()));
        let platform = host.platforms().unwrap()[0].clone();
        let context = host
            .create_context_from_type(&platform, DeviceTypeMask::ALL)
            .unwrap();
        let buffer = context.create_buffer(AccessMode::ReadWrite, 64).unwrap();
        assert_eq!(context.inner.state.read().buffers.len(), 1);
        drop(buffer);
        assert_eq!(context.inner.state.read().buffers.len(), 0);
    }

    #[test]
    fn test_metadata_survives_context() {
        let host = Host::new(Arc::new(HostDriver::new()));
        let platform = host.platforms().unwrap()[0].clone();
        let context = host
            .create_context_from_type(&platform, DeviceTypeMask::ALL)
            .unwrap();
        let buffer = context.create_buffer(AccessMode::WriteOnly, 128).unwrap();
        drop(context);
        assert_eq!(buffer.size(), 128);
        assert_eq!(buffer.mode(), AccessMode::WriteOnly);
    }
}
