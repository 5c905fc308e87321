use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use slab::Slab;

use crate::{
    utils::create_gpu_only_buffer_from_data, Buffer, Context, Error, MappedBuffer, MemoryClass,
};

/// Slot of a buffer owned by a [`ResourceAllocator`]. The generation tells a
/// released handle apart from a later buffer reusing its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: usize,
    generation: u64,
}

struct Entry<T> {
    generation: u64,
    value: T,
}

/// Slab whose keys carry the generation they were issued with.
struct Arena<T> {
    entries: Slab<Entry<T>>,
    next_generation: u64,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            entries: Slab::new(),
            next_generation: 0,
        }
    }

    fn insert(&mut self, value: T) -> BufferHandle {
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.entries.insert(Entry { generation, value });

        BufferHandle { index, generation }
    }

    fn get(&self, handle: BufferHandle) -> Option<&T> {
        self.entries
            .get(handle.index)
            .filter(|entry| entry.generation == handle.generation)
            .map(|entry| &entry.value)
    }

    fn get_mut(&mut self, handle: BufferHandle) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index)
            .filter(|entry| entry.generation == handle.generation)
            .map(|entry| &mut entry.value)
    }

    fn remove(&mut self, handle: BufferHandle) -> Option<T> {
        self.get(handle)?;
        self.entries.try_remove(handle.index).map(|entry| entry.value)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owns every device buffer of the renderer. Buffers are released with
/// [`ResourceAllocator::destroy`]; anything left over is freed on drop.
pub struct ResourceAllocator {
    context: Arc<Context>,
    buffers: Arena<Buffer>,
}

impl ResourceAllocator {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            buffers: Arena::new(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
    ) -> Result<BufferHandle> {
        let buffer = self.context.create_buffer(usage, memory_class, size)?;
        Ok(self.buffers.insert(buffer))
    }

    /// Copies `data` into a new device-local buffer through a staging buffer.
    /// Returns once the copy has completed and the staging memory is released.
    pub fn upload_buffer<T: Copy>(
        &mut self,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<BufferHandle> {
        let buffer = create_gpu_only_buffer_from_data(&self.context, usage, data)?;
        log::debug!("Uploaded {} bytes", buffer.size);

        Ok(self.buffers.insert(buffer))
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&Buffer> {
        self.buffers
            .get(handle)
            .ok_or_else(|| Error::StaleHandle(handle).into())
    }

    pub fn get_mut(&mut self, handle: BufferHandle) -> Result<&mut Buffer> {
        self.buffers
            .get_mut(handle)
            .ok_or_else(|| Error::StaleHandle(handle).into())
    }

    pub fn map(&mut self, handle: BufferHandle) -> Result<MappedBuffer<'_>> {
        self.get_mut(handle)?.map()
    }

    pub fn destroy(&mut self, handle: BufferHandle) -> Result<()> {
        self.buffers
            .remove(handle)
            .map(drop)
            .ok_or_else(|| Error::StaleHandle(handle).into())
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            log::warn!(
                "{} buffers were not destroyed explicitly, releasing them",
                self.buffers.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handle_stays_stale_after_slot_reuse() {
        let mut arena = Arena::new();
        let first = arena.insert("first");
        assert_eq!(arena.remove(first), Some("first"));

        let second = arena.insert("second");
        assert_eq!(second.index, first.index);

        assert_eq!(arena.get(first), None);
        assert!(arena.get_mut(first).is_none());
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn double_remove_is_rejected() {
        let mut arena = Arena::new();
        let handle = arena.insert(7u32);

        assert_eq!(arena.remove(handle), Some(7));
        assert_eq!(arena.remove(handle), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn live_entries_are_reachable() {
        let mut arena = Arena::new();
        let a = arena.insert(1u32);
        let b = arena.insert(2u32);

        if let Some(value) = arena.get_mut(a) {
            *value = 10;
        }

        assert_ne!(a, b);
        assert_eq!(arena.get(a), Some(&10));
        assert_eq!(arena.get(b), Some(&2));
    }
}
