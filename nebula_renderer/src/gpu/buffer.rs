/// Buffer trait and buffer descriptor

use bitflags::bitflags;
use crate::gpu::memory::{DeviceMemoryInfo, MemoryPropertyFlags};

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 0b0000_0001;
        const TRANSFER_DST = 0b0000_0010;
        const UNIFORM = 0b0000_0100;
        const STORAGE = 0b0000_1000;
        const INDEX = 0b0001_0000;
        const VERTEX = 0b0010_0000;
    }
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Debug name (used by the backend allocator and logs)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
    /// Memory properties the backing allocation must have
    pub memory: MemoryPropertyFlags,
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types. A buffer is bound to exactly
/// one device memory allocation and destroys both when dropped.
pub trait Buffer: Send + Sync {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Usage the buffer was created with
    fn usage(&self) -> BufferUsage;

    /// Backing allocation
    fn memory(&self) -> DeviceMemoryInfo;

    /// Byte offset of the buffer within its backing allocation
    ///
    /// `memory_offset() + size()` never exceeds `memory().size`.
    fn memory_offset(&self) -> u64 {
        0
    }

    /// Raw pointer to persistently mapped memory
    ///
    /// Returns None if the buffer is not CPU-accessible (device-local only).
    /// The pointer remains valid for the lifetime of the buffer.
    fn mapped_ptr(&self) -> Option<*mut u8>;
}
