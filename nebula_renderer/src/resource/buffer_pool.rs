/// Buffer pool: one backing buffer sub-allocated into sub-buffers
///
/// A pool reserves a single GPU buffer (and its allocation) once and hands out
/// byte ranges of it on demand. Placement is first-fit: live entries are
/// scanned by ascending offset and the first aligned gap that fits is taken,
/// otherwise the range is appended after the last entry. Freed ranges become
/// gaps; there is no compaction.
///
/// The entry map is mutex-guarded so pools can be shared (`Arc<BufferPool>`)
/// between scene construction and task completions.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::gpu::{
    align_up, submit_and_wait, Buffer, BufferDesc, BufferUsage, GraphicsDevice,
    MemoryPropertyFlags, QueueKind,
};
use crate::{engine_bail_warn, engine_debug, engine_warn};

/// Identifier of a live sub-buffer (never reused within a pool)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubBufferId(u64);

impl SubBufferId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Byte range of the backing buffer owned by one sub-buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBuffer {
    pub offset: u64,
    pub size: u64,
}

impl SubBuffer {
    /// One past the last byte
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Buffer range bound to a descriptor or a draw
#[derive(Clone)]
pub struct BufferBinding {
    pub buffer: Arc<dyn Buffer>,
    pub offset: u64,
    pub range: u64,
}

struct PoolState {
    next_id: u64,
    entries: BTreeMap<SubBufferId, SubBuffer>,
    mapped: FxHashSet<SubBufferId>,
}

/// Sub-allocating buffer pool
pub struct BufferPool {
    name: String,
    device: Arc<dyn GraphicsDevice>,
    backing: Arc<dyn Buffer>,
    properties: MemoryPropertyFlags,
    usage: BufferUsage,
    capacity: u64,
    alignment: u64,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Reserve the backing buffer of a pool
    ///
    /// # Arguments
    ///
    /// * `device` - Device creating the backing buffer
    /// * `name` - Pool name used in logs and errors ("geometry", "uniform", ...)
    /// * `properties` - Memory properties of the backing allocation
    /// * `usage` - Usage of the backing buffer (and of every sub-buffer)
    /// * `capacity` - Total size in bytes
    pub fn allocate(
        device: Arc<dyn GraphicsDevice>,
        name: &str,
        properties: MemoryPropertyFlags,
        usage: BufferUsage,
        capacity: u64,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InitializationFailed(format!("buffer pool '{}' has zero capacity", name)));
        }

        let backing = device.create_buffer(&BufferDesc {
            name: format!("{}_pool", name),
            size: capacity,
            usage,
            memory: properties,
        })?;
        let alignment = device.limits().alignment_for(usage);

        engine_debug!("nebula::BufferPool", "Pool '{}' reserved {} bytes (alignment {}, memory type {})",
            name, capacity, alignment, backing.memory().memory_type_index);

        Ok(Self {
            name: name.to_string(),
            device,
            backing,
            properties,
            usage,
            capacity,
            alignment,
            state: Mutex::new(PoolState {
                next_id: 0,
                entries: BTreeMap::new(),
                mapped: FxHashSet::default(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the entry map half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backing(&self) -> &Arc<dyn Buffer> {
        &self.backing
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn properties(&self) -> MemoryPropertyFlags {
        self.properties
    }

    /// Default offset alignment derived from the pool usage
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Range of a live sub-buffer
    pub fn sub_buffer(&self, id: SubBufferId) -> Option<SubBuffer> {
        self.lock().entries.get(&id).copied()
    }

    /// Live sub-buffers sorted by offset
    pub fn sub_buffers(&self) -> Vec<(SubBufferId, SubBuffer)> {
        let mut entries: Vec<_> = self.lock().entries.iter().map(|(id, sub)| (*id, *sub)).collect();
        entries.sort_by_key(|(_, sub)| sub.offset);
        entries
    }

    /// Number of live sub-buffers
    pub fn live_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Sum of live sub-buffer sizes
    pub fn used_bytes(&self) -> u64 {
        self.lock().entries.values().map(|sub| sub.size).sum()
    }

    /// Binding of a whole sub-buffer
    pub fn binding(&self, id: SubBufferId) -> Result<BufferBinding> {
        let sub = self.checked(id)?;
        Ok(BufferBinding { buffer: self.backing.clone(), offset: sub.offset, range: sub.size })
    }

    fn checked(&self, id: SubBufferId) -> Result<SubBuffer> {
        match self.sub_buffer(id) {
            Some(sub) => Ok(sub),
            None => engine_bail_warn!("nebula::BufferPool", "Pool '{}': unknown sub-buffer {:?}", self.name, id),
        }
    }

    // ===== ALLOCATION =====

    /// Sub-allocate `size` bytes at the pool's default alignment
    pub fn make_buffer(&self, size: u64) -> Result<SubBufferId> {
        self.make_buffer_aligned(size, self.alignment)
    }

    /// Sub-allocate `size` bytes at an explicit alignment
    ///
    /// Fails with `Error::OutOfSpace` when no gap and no tail space can hold
    /// the request; the pool is left unchanged in that case.
    pub fn make_buffer_aligned(&self, size: u64, alignment: u64) -> Result<SubBufferId> {
        if size == 0 {
            engine_bail_warn!("nebula::BufferPool", "Pool '{}': zero-sized sub-buffer requested", self.name);
        }

        let mut state = self.lock();
        let offset = match find_placement(state.entries.values(), size, alignment, self.capacity) {
            Some(offset) => offset,
            None => {
                engine_warn!("nebula::BufferPool", "Pool '{}' out of space: {} bytes requested, {} of {} bytes live",
                    self.name, size, state.entries.values().map(|sub| sub.size).sum::<u64>(), self.capacity);
                return Err(Error::OutOfSpace {
                    pool: self.name.clone(),
                    requested: size,
                    capacity: self.capacity,
                });
            }
        };

        let id = SubBufferId(state.next_id);
        state.next_id += 1;
        state.entries.insert(id, SubBuffer { offset, size });
        Ok(id)
    }

    /// Release a sub-buffer; its range becomes a reusable gap
    pub fn free_buffer(&self, id: SubBufferId) -> Result<()> {
        let mut state = self.lock();
        if state.entries.remove(&id).is_none() {
            drop(state);
            engine_bail_warn!("nebula::BufferPool", "Pool '{}': free of unknown sub-buffer {:?}", self.name, id);
        }
        state.mapped.remove(&id);
        Ok(())
    }

    // ===== HOST ACCESS =====

    /// Map a sub-buffer of a host-coherent pool
    ///
    /// The range is unmapped when the returned guard is dropped.
    pub fn map(&self, id: SubBufferId) -> Result<MappedRange<'_>> {
        if !self.properties.is_host_coherent() {
            engine_bail_warn!("nebula::BufferPool", "Pool '{}' is not host-coherent and cannot be mapped", self.name);
        }
        let base = match self.backing.mapped_ptr() {
            Some(ptr) => ptr,
            None => engine_bail_warn!("nebula::BufferPool", "Pool '{}' backing buffer is not mapped", self.name),
        };

        let mut state = self.lock();
        let sub = match state.entries.get(&id) {
            Some(sub) => *sub,
            None => {
                drop(state);
                engine_bail_warn!("nebula::BufferPool", "Pool '{}': map of unknown sub-buffer {:?}", self.name, id);
            }
        };
        if !state.mapped.insert(id) {
            drop(state);
            engine_bail_warn!("nebula::BufferPool", "Pool '{}': sub-buffer {:?} is already mapped", self.name, id);
        }

        Ok(MappedRange {
            pool: self,
            id,
            ptr: unsafe { base.add(sub.offset as usize) },
            len: sub.size as usize,
        })
    }

    /// Copy `data` into a host-coherent sub-buffer at `offset`
    pub fn write(&self, id: SubBufferId, offset: u64, data: &[u8]) -> Result<()> {
        let mut mapped = self.map(id)?;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(data.len()).map(|end| start..end))
            .filter(|range| range.end <= mapped.len());
        let Some(range) = range else {
            let len = mapped.len();
            drop(mapped);
            engine_bail_warn!("nebula::BufferPool", "Pool '{}': write of {} bytes at {} overflows sub-buffer of {} bytes",
                self.name, data.len(), offset, len);
        };
        mapped[range].copy_from_slice(data);
        Ok(())
    }

    /// Fill a sub-buffer of a device-local pool through a staging pool
    ///
    /// A temporary staging sub-buffer holds `data` while a one-shot transfer
    /// copies it into place; the call returns once the copy completed.
    pub fn upload(&self, staging: &BufferPool, id: SubBufferId, data: &[u8]) -> Result<()> {
        let dst = self.checked(id)?;
        if data.len() as u64 > dst.size {
            engine_bail_warn!("nebula::BufferPool", "Pool '{}': upload of {} bytes into sub-buffer of {} bytes",
                self.name, data.len(), dst.size);
        }
        if data.is_empty() {
            return Ok(());
        }

        let staged = staging.make_buffer(data.len() as u64)?;
        let result = staging.write(staged, 0, data).and_then(|_| {
            let src = staging.checked(staged)?;
            submit_and_wait(self.device.as_ref(), QueueKind::Transfer, |cmd| {
                cmd.copy_buffer(
                    staging.backing.as_ref(),
                    src.offset,
                    self.backing.as_ref(),
                    dst.offset,
                    data.len() as u64,
                )
            })
        });
        staging.free_buffer(staged)?;
        result
    }

    fn unmap(&self, id: SubBufferId) {
        self.lock().mapped.remove(&id);
    }
}

/// First-fit placement over live ranges
///
/// Returns the aligned offset of the first gap (by ascending offset) that can
/// hold `size` bytes, else the aligned offset after the last range if the pool
/// capacity allows it.
pub(crate) fn find_placement<'a>(
    entries: impl Iterator<Item = &'a SubBuffer>,
    size: u64,
    alignment: u64,
    capacity: u64,
) -> Option<u64> {
    let mut ranges: Vec<&SubBuffer> = entries.collect();
    ranges.sort_by_key(|sub| sub.offset);

    let mut cursor = 0u64;
    for range in ranges {
        let start = align_up(cursor, alignment);
        if start.checked_add(size)? <= range.offset {
            return Some(start);
        }
        cursor = cursor.max(range.end());
    }

    let start = align_up(cursor, alignment);
    match start.checked_add(size) {
        Some(end) if end <= capacity => Some(start),
        _ => None,
    }
}

/// Host view of a mapped sub-buffer; unmaps on drop
pub struct MappedRange<'a> {
    pool: &'a BufferPool,
    id: SubBufferId,
    ptr: *mut u8,
    len: usize,
}

impl MappedRange<'_> {
    pub fn id(&self) -> SubBufferId {
        self.id
    }

    /// Explicit unmap (same as dropping the guard)
    pub fn unmap(self) {}
}

impl Deref for MappedRange<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for MappedRange<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // The mapped set guarantees a single live guard per sub-buffer
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for MappedRange<'_> {
    fn drop(&mut self) {
        self.pool.unmap(self.id);
    }
}

#[cfg(test)]
#[path = "buffer_pool_tests.rs"]
mod tests;
