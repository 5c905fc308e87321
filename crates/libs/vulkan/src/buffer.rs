use std::{
    mem::{size_of, size_of_val},
    sync::{Arc, Mutex},
};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};

use crate::{device::Device, Context, Error};

/// Where a buffer's memory lives and whether the host may map it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    DeviceLocal,
    /// Host visible and coherent, written by the host.
    HostUpload,
    /// Host visible, coherent and cached where the device offers it.
    HostReadback,
}

impl MemoryClass {
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }

    pub(crate) fn location(self) -> MemoryLocation {
        match self {
            Self::DeviceLocal => MemoryLocation::GpuOnly,
            Self::HostUpload => MemoryLocation::CpuToGpu,
            Self::HostReadback => MemoryLocation::GpuToCpu,
        }
    }
}

pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory_class: MemoryClass,
}

impl Buffer {
    pub fn as_raw(&self) -> u64 {
        use vk::Handle;
        self.inner.as_raw()
    }

    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::Allocation("buffer size must be non-zero".to_string()).into());
        }

        let create_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        let inner = unsafe { device.inner.create_buffer(&create_info, None) }
            .map_err(|e| Error::Allocation(format!("vkCreateBuffer: {e}")))?;
        let requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };

        let allocation = allocator
            .lock()
            .map_err(|_| Error::Allocation("allocator mutex poisoned".to_string()))
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: "buffer",
                        requirements,
                        location: memory_class.location(),
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| Error::Allocation(e.to_string()))
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                release(&device, &allocator, inner, None);
                return Err(e.into());
            }
        };

        let bound = unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            release(&device, &allocator, inner, Some(allocation));
            return Err(Error::Allocation(format!("vkBindBufferMemory: {e}")).into());
        }

        log::debug!("Allocated {size} byte {memory_class:?} buffer with usage {usage:?}");

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            size,
            usage,
            memory_class,
        })
    }

    pub fn has_usage(&self, usage: vk::BufferUsageFlags) -> bool {
        self.usage.contains(usage)
    }

    pub fn ensure_usage(&self, usage: vk::BufferUsageFlags) -> Result<()> {
        if self.has_usage(usage) {
            Ok(())
        } else {
            Err(Error::MissingUsage(usage & !self.usage).into())
        }
    }

    /// Maps a host-visible buffer. The returned guard only exposes the first
    /// `size` bytes of the allocation.
    pub fn map(&mut self) -> Result<MappedBuffer<'_>> {
        if !self.memory_class.is_host_visible() {
            return Err(Error::NotHostVisible.into());
        }
        let size = self.size as usize;
        let bytes = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or(Error::NotHostVisible)?;

        Ok(MappedBuffer {
            bytes: &mut bytes[..size],
        })
    }

    pub fn copy_data_to_buffer<T: Copy>(&mut self, data: &[T]) -> Result<()> {
        self.map()?.write(data)
    }

    pub fn get_device_address(&self) -> u64 {
        let addr_info = vk::BufferDeviceAddressInfo::builder().buffer(self.inner);
        unsafe { self.device.inner.get_buffer_device_address(&addr_info) }
    }
}

/// Host view of a mapped buffer. Reads only observe GPU writes made visible
/// by a host-read barrier that has completed.
pub struct MappedBuffer<'a> {
    bytes: &'a mut [u8],
}

impl MappedBuffer<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Copies the whole mapping out as `T`s. Trailing bytes that do not make a
    /// full `T` are ignored.
    pub fn read<T: Copy + Default>(&self) -> Vec<T> {
        let count = self.bytes.len() / size_of::<T>();
        let mut out = vec![T::default(); count];
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.bytes.as_ptr(),
                out.as_mut_ptr() as *mut u8,
                count * size_of::<T>(),
            );
        }
        out
    }

    pub fn write<T: Copy>(&mut self, data: &[T]) -> Result<()> {
        let size = size_of_val(data);
        if size > self.bytes.len() {
            return Err(Error::Upload(format!(
                "{size} bytes do not fit a {} byte buffer",
                self.bytes.len()
            ))
            .into());
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, self.bytes.as_mut_ptr(), size)
        };

        Ok(())
    }

    /// Ends host access. Memory stays persistently mapped by the allocator.
    pub fn unmap(self) {}
}

impl Context {
    pub fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
        size: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_class,
            size,
        )
    }
}

/// Destroys `inner` and returns its memory to the allocator.
fn release(
    device: &Device,
    allocator: &Mutex<Allocator>,
    inner: vk::Buffer,
    allocation: Option<Allocation>,
) {
    unsafe { device.inner.destroy_buffer(inner, None) };

    let Some(allocation) = allocation else {
        return;
    };
    match allocator.lock() {
        Ok(mut allocator) => {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free buffer memory: {e}");
            }
        }
        Err(_) => log::error!("Allocator mutex poisoned, leaking buffer memory"),
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        release(&self.device, &self.allocator, self.inner, self.allocation.take());
    }
}
