//! Host-memory buffer storage for the reference driver

use crate::driver::types::{AccessMode, BufferHandle};
use crate::error::{DriverError, Result};
use std::collections::HashMap;

/// Backing storage and metadata of one buffer
#[derive(Debug)]
pub struct BufferRecord {
    pub data: Vec<u8>,
    pub mode: AccessMode,
}

/// All buffer storage of the driver. Host transfers (write, read, copy) are
/// unrestricted by access mode; the mode only constrains kernel-side element
/// access, which the interpreter checks itself.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buffers: HashMap<u64, BufferRecord>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zero-initialized buffer
    pub fn allocate(&mut self, size: usize, mode: AccessMode) -> BufferHandle {
        let handle = BufferHandle::new(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            handle.id(),
            BufferRecord {
                data: vec![0u8; size],
                mode,
            },
        );
        handle
    }

    pub fn free(&mut self, buffer: BufferHandle) -> Result<()> {
        self.buffers
            .remove(&buffer.id())
            .map(|_| ())
            .ok_or(DriverError::UnknownBuffer(buffer))
    }

    pub fn record(&self, buffer: BufferHandle) -> Option<&BufferRecord> {
        self.buffers.get(&buffer.id())
    }

    pub fn record_mut(&mut self, buffer: BufferHandle) -> Option<&mut BufferRecord> {
        self.buffers.get_mut(&buffer.id())
    }

    pub fn size(&self, buffer: BufferHandle) -> Result<usize> {
        self.record(buffer)
            .map(|r| r.data.len())
            .ok_or(DriverError::UnknownBuffer(buffer))
    }

    /// Host write into a byte range
    pub fn write(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let record = self
            .record_mut(buffer)
            .ok_or(DriverError::UnknownBuffer(buffer))?;
        check_range(offset, data.len(), record.data.len())?;
        record.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Host read of a byte range
    pub fn read(&self, buffer: BufferHandle, offset: usize, len: usize) -> Result<Vec<u8>> {
        let record = self
            .record(buffer)
            .ok_or(DriverError::UnknownBuffer(buffer))?;
        check_range(offset, len, record.data.len())?;
        Ok(record.data[offset..offset + len].to_vec())
    }

    /// Device-to-device copy. Staged through a temporary so overlapping
    /// ranges within one buffer behave like memmove.
    pub fn copy(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        let staged = self.read(src, src_offset, len)?;
        self.write(dst, dst_offset, &staged)
    }
}

fn check_range(offset: usize, len: usize, size: usize) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or(DriverError::BufferOutOfBounds { offset, len, size })?;
    if end > size {
        return Err(DriverError::BufferOutOfBounds { offset, len, size });
    }
    Ok(())
}
