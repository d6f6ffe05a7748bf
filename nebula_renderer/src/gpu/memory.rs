/// Device memory description and memory-type selection
///
/// A `DeviceMemoryInfo` describes one GPU allocation. It is owned by exactly one
/// buffer or image and released when that resource is dropped.

use bitflags::bitflags;

bitflags! {
    /// Memory property flags (subset of VkMemoryPropertyFlags)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        const DEVICE_LOCAL = 0b0000_0001;
        const HOST_VISIBLE = 0b0000_0010;
        const HOST_COHERENT = 0b0000_0100;
        const HOST_CACHED = 0b0000_1000;
        const LAZILY_ALLOCATED = 0b0001_0000;
    }
}

impl MemoryPropertyFlags {
    /// Host-visible and coherent: map without explicit flushes
    pub fn is_host_coherent(&self) -> bool {
        self.contains(MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT)
    }
}

/// Memory requirements reported for a buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Required allocation size in bytes
    pub size: u64,
    /// Required alignment of the allocation offset
    pub alignment: u64,
    /// Bit `i` set means memory type `i` is acceptable
    pub memory_type_bits: u32,
}

/// One memory type exposed by the physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Properties of this memory type
    pub properties: MemoryPropertyFlags,
    /// Heap index backing this type
    pub heap_index: u32,
}

/// Description of one live GPU allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMemoryInfo {
    /// Allocation size in bytes
    pub size: u64,
    /// Memory type the allocation was made from
    pub memory_type_index: u32,
    /// Properties requested for the allocation
    pub properties: MemoryPropertyFlags,
}

/// Select the first memory type allowed by `type_bits` whose properties
/// contain all of `required`
///
/// # Arguments
///
/// * `types` - Memory types of the physical device, in device order
/// * `type_bits` - Acceptable types from `MemoryRequirements::memory_type_bits`
/// * `required` - Properties the memory type must have
///
/// # Returns
///
/// The index of the first matching memory type, or None.
pub fn select_memory_type(
    types: &[MemoryType],
    type_bits: u32,
    required: MemoryPropertyFlags,
) -> Option<u32> {
    types
        .iter()
        .enumerate()
        .take(32)
        .find(|(index, memory_type)| {
            type_bits & (1u32 << index) != 0 && memory_type.properties.contains(required)
        })
        .map(|(index, _)| index as u32)
}

/// Round `value` up to the next multiple of `alignment` (alignment 0 or 1 is a no-op)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
