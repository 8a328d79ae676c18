//! Kernels and argument binding
//!
//! A [`Kernel`] is a resolved entry point with positional argument slots.
//! [`Kernel::set_arg`] checks the value against the declared slot kind
//! before it reaches the driver, so kind mismatches surface at bind time
//! with a precise index instead of failing inside a launch. Launching with
//! unbound slots is caught by the queue.

use crate::arena::Handle;
use crate::buffer::Buffer;
use crate::context::{BufferRes, ContextInner, KernelSlot};
use crate::error::{Error, Result};
use prism_driver::{ArgSlotKind, BoundArg};
use std::fmt;
use std::sync::{Arc, Weak};

/// A value for one kernel argument slot.
///
/// Buffers are passed by reference; the kernel records the binding and
/// launches retain the buffer until they reach a terminal state, so
/// dropping a bound buffer between launches is safe.
#[derive(Debug, Clone, Copy)]
pub enum ArgValue<'a> {
    Buffer(&'a Buffer),
    Char(i8),
    Uchar(u8),
    Short(i16),
    Ushort(u16),
    Int(i32),
    Uint(u32),
    Long(i64),
    Ulong(u64),
    Float(f32),
}

impl ArgValue<'_> {
    /// The slot kind this value satisfies
    pub fn kind(&self) -> ArgSlotKind {
        match self {
            Self::Buffer(_) => ArgSlotKind::Buffer,
            Self::Char(_) => ArgSlotKind::Char,
            Self::Uchar(_) => ArgSlotKind::Uchar,
            Self::Short(_) => ArgSlotKind::Short,
            Self::Ushort(_) => ArgSlotKind::Ushort,
            Self::Int(_) => ArgSlotKind::Int,
            Self::Uint(_) => ArgSlotKind::Uint,
            Self::Long(_) => ArgSlotKind::Long,
            Self::Ulong(_) => ArgSlotKind::Ulong,
            Self::Float(_) => ArgSlotKind::Float,
        }
    }
}

/// A resolved kernel entry point with bindable argument slots.
pub struct Kernel {
    ctx: Weak<ContextInner>,
    handle: Handle<KernelSlot>,
}

impl Kernel {
    pub(crate) fn new(ctx: Weak<ContextInner>, handle: Handle<KernelSlot>) -> Self {
        Self { ctx, handle }
    }

    fn context(&self) -> Result<Arc<ContextInner>> {
        self.ctx.upgrade().ok_or(Error::InvalidContext)
    }

    pub(crate) fn slot(&self) -> Handle<KernelSlot> {
        self.handle
    }

    pub(crate) fn belongs_to(&self, inner: &Arc<ContextInner>) -> bool {
        self.ctx
            .upgrade()
            .map(|ctx| Arc::ptr_eq(&ctx, inner))
            .unwrap_or(false)
    }

    /// Entry-point name the kernel was resolved under
    pub fn name(&self) -> Result<String> {
        let inner = self.context()?;
        let state = inner.state.read();
        let slot = state.kernels.get(self.handle).ok_or(Error::InvalidContext)?;
        Ok(slot.name.clone())
    }

    /// Number of argument slots
    pub fn arity(&self) -> Result<usize> {
        let inner = self.context()?;
        let state = inner.state.read();
        let slot = state.kernels.get(self.handle).ok_or(Error::InvalidContext)?;
        Ok(slot.slots.len())
    }

    /// Declared argument kinds, in positional order
    pub fn arg_kinds(&self) -> Result<Vec<ArgSlotKind>> {
        let inner = self.context()?;
        let state = inner.state.read();
        let slot = state.kernels.get(self.handle).ok_or(Error::InvalidContext)?;
        Ok(slot.slots.clone())
    }

    /// Bind one positional argument. Rebinding a slot replaces the previous
    /// value; bindings persist across launches.
    pub fn set_arg(&self, index: usize, value: ArgValue<'_>) -> Result<()> {
        let inner = self.context()?;
        let (expected, kernel_handle) = {
            let state = inner.state.read();
            let slot = state.kernels.get(self.handle).ok_or(Error::InvalidContext)?;
            if index >= slot.slots.len() {
                return Err(Error::InvalidArgIndex {
                    index,
                    arity: slot.slots.len(),
                });
            }
            (slot.slots[index], slot.res.handle)
        };

        let got = value.kind();
        if got != expected {
            return Err(Error::invalid_arg_value(
                index,
                format!("expected {expected}, got {got}"),
            ));
        }

        let (bound, buffer_ref): (BoundArg, Option<Arc<BufferRes>>) = match value {
            ArgValue::Buffer(buffer) => {
                if !buffer.belongs_to(&inner) {
                    return Err(Error::invalid_arg_value(
                        index,
                        "buffer belongs to a different context",
                    ));
                }
                let state = inner.state.read();
                let slot = state
                    .buffers
                    .get(buffer.slot())
                    .ok_or(Error::InvalidContext)?;
                (BoundArg::Buffer(slot.res.handle), Some(Arc::clone(&slot.res)))
            }
            ArgValue::Char(v) => (BoundArg::Char(v), None),
            ArgValue::Uchar(v) => (BoundArg::Uchar(v), None),
            ArgValue::Short(v) => (BoundArg::Short(v), None),
            ArgValue::Ushort(v) => (BoundArg::Ushort(v), None),
            ArgValue::Int(v) => (BoundArg::Int(v), None),
            ArgValue::Uint(v) => (BoundArg::Uint(v), None),
            ArgValue::Long(v) => (BoundArg::Long(v), None),
            ArgValue::Ulong(v) => (BoundArg::Ulong(v), None),
            ArgValue::Float(v) => (BoundArg::Float(v), None),
        };

        inner.driver.bind_argument(kernel_handle, index, bound)?;

        let mut state = inner.state.write();
        if let Some(slot) = state.kernels.get_mut(self.handle) {
            slot.bound[index] = true;
            slot.buffer_refs[index] = buffer_ref;
        }
        tracing::trace!(kernel = %kernel_handle, index, kind = %got, "argument_bound");
        Ok(())
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if let Some(inner) = self.ctx.upgrade() {
            inner.state.write().kernels.remove(self.handle);
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel").field("slot", &self.handle).finish()
    }
}
