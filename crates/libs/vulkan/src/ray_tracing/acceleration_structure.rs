use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{Buffer, Context, Error, MemoryClass, RayTracingContext};

/// An acceleration structure object and the device memory backing it. The
/// contents are undefined until a build into it has completed.
pub struct AccelerationStructure {
    ray_tracing: Arc<RayTracingContext>,
    pub(crate) inner: vk::AccelerationStructureKHR,
    _buffer: Buffer,
    pub address: u64,
    pub level: vk::AccelerationStructureTypeKHR,
}

impl std::fmt::Debug for AccelerationStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelerationStructure")
            .field("inner", &self.inner)
            .field("address", &self.address)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl AccelerationStructure {
    pub(crate) fn new(
        context: &Context,
        level: vk::AccelerationStructureTypeKHR,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let ray_tracing = context.ray_tracing.clone();

        let buffer = context.create_buffer(
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryClass::DeviceLocal,
            size,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(size)
            .ty(level);
        let inner = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .create_acceleration_structure(&create_info, None)
        }
        .map_err(|e| Error::Allocation(format!("vkCreateAccelerationStructureKHR: {e}")))?;

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(inner);
        let address = unsafe {
            ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_device_address(&address_info)
        };

        Ok(Self {
            ray_tracing,
            inner,
            _buffer: buffer,
            address,
            level,
        })
    }

    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.inner
    }
}

impl Context {
    /// Device memory needed to build `geometries` with the given flags.
    pub fn acceleration_structure_build_sizes(
        &self,
        level: vk::AccelerationStructureTypeKHR,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        geometries: &[vk::AccelerationStructureGeometryKHR],
        max_primitive_counts: &[u32],
    ) -> vk::AccelerationStructureBuildSizesInfoKHR {
        let build_geo_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(level)
            .flags(flags)
            .geometries(geometries);

        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_geo_info,
                    max_primitive_counts,
                )
        }
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}
