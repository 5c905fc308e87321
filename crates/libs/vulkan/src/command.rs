use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{
    device::Device, Buffer, ComputePipeline, DescriptorSet, PipelineLayout, QueueFamily,
    RayTracingContext,
};

pub struct CommandPool {
    device: Arc<Device>,
    ray_tracing: Arc<RayTracingContext>,
    pub inner: vk::CommandPool,
}

impl CommandPool {
    pub(crate) fn new(
        device: Arc<Device>,
        ray_tracing: Arc<RayTracingContext>,
        queue_family: QueueFamily,
        flags: Option<vk::CommandPoolCreateFlags>,
    ) -> Result<Self> {
        let flags = flags.unwrap_or_else(vk::CommandPoolCreateFlags::empty);

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family.index)
            .flags(flags);
        let inner = unsafe { device.inner.create_command_pool(&command_pool_info, None)? };

        Ok(Self {
            device,
            ray_tracing,
            inner,
        })
    }

    pub fn allocate_command_buffers(
        &self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.inner)
            .level(level)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.inner.allocate_command_buffers(&allocate_info)? };
        let buffers = buffers
            .into_iter()
            .map(|inner| CommandBuffer {
                device: self.device.clone(),
                ray_tracing: self.ray_tracing.clone(),
                inner,
            })
            .collect();

        Ok(buffers)
    }

    pub fn allocate_command_buffer(&self, level: vk::CommandBufferLevel) -> Result<CommandBuffer> {
        self.allocate_command_buffers(level, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Driver returned no command buffer"))
    }

    pub fn free_command_buffer(&self, buffer: &CommandBuffer) {
        let buffs = [buffer.inner];
        unsafe { self.device.inner.free_command_buffers(self.inner, &buffs) };
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_command_pool(self.inner, None) };
    }
}

pub struct CommandBuffer {
    device: Arc<Device>,
    ray_tracing: Arc<RayTracingContext>,
    pub inner: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn begin(&self, flags: Option<vk::CommandBufferUsageFlags>) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(flags.unwrap_or(vk::CommandBufferUsageFlags::empty()));
        unsafe {
            self.device
                .inner
                .begin_command_buffer(self.inner, &begin_info)?
        };

        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        unsafe { self.device.inner.end_command_buffer(self.inner)? };

        Ok(())
    }

    pub fn bind_compute_pipeline(&self, pipeline: &ComputePipeline) {
        unsafe {
            self.device.inner.cmd_bind_pipeline(
                self.inner,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.inner,
            )
        }
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device
                .inner
                .cmd_dispatch(self.inner, group_count_x, group_count_y, group_count_z);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
    ) {
        let sets = sets.iter().map(|s| s.inner).collect::<Vec<_>>();
        unsafe {
            self.device.inner.cmd_bind_descriptor_sets(
                self.inner,
                bind_point,
                layout.inner,
                first_set,
                &sets,
                &[],
            )
        }
    }

    pub fn pipeline_memory_barriers(&self, barriers: &[MemoryBarrier]) {
        let barriers = barriers
            .iter()
            .map(|b| {
                vk::MemoryBarrier2::builder()
                    .src_stage_mask(b.src_stage_mask)
                    .src_access_mask(b.src_access_mask)
                    .dst_stage_mask(b.dst_stage_mask)
                    .dst_access_mask(b.dst_access_mask)
                    .build()
            })
            .collect::<Vec<_>>();

        let dependency_info = vk::DependencyInfo::builder().memory_barriers(&barriers);

        unsafe {
            self.device
                .inner
                .cmd_pipeline_barrier2(self.inner, &dependency_info)
        };
    }

    pub fn copy_buffer(&self, src_buffer: &Buffer, dst_buffer: &Buffer) {
        unsafe {
            let region = vk::BufferCopy::builder().size(src_buffer.size);
            self.device.inner.cmd_copy_buffer(
                self.inner,
                src_buffer.inner,
                dst_buffer.inner,
                std::slice::from_ref(&region),
            )
        };
    }

    /// Fills the whole buffer with the bit pattern of `value`.
    pub fn fill_buffer(&self, buffer: &Buffer, value: f32) -> Result<()> {
        buffer.ensure_usage(vk::BufferUsageFlags::TRANSFER_DST)?;
        unsafe {
            self.device.inner.cmd_fill_buffer(
                self.inner,
                buffer.inner,
                0,
                vk::WHOLE_SIZE,
                value.to_bits(),
            )
        };

        Ok(())
    }

    pub fn build_acceleration_structures(
        &self,
        as_build_geo_info: &vk::AccelerationStructureBuildGeometryInfoKHR,
        as_build_range_info: &[vk::AccelerationStructureBuildRangeInfoKHR],
    ) {
        unsafe {
            self.ray_tracing
                .acceleration_structure_fn
                .cmd_build_acceleration_structures(
                    self.inner,
                    std::slice::from_ref(as_build_geo_info),
                    std::slice::from_ref(&as_build_range_info),
                )
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_access_mask: vk::AccessFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
}

impl MemoryBarrier {
    /// Orders acceleration structure builds that share a scratch buffer.
    pub const ACCELERATION_STRUCTURE_BUILD: Self = Self {
        src_access_mask: vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        dst_access_mask: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR.as_raw()
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
        ),
        src_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
        dst_stage_mask: vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
    };

    /// Makes transfer writes (fills, copies) visible to compute shaders.
    pub const TRANSFER_TO_COMPUTE: Self = Self {
        src_access_mask: vk::AccessFlags2::TRANSFER_WRITE,
        dst_access_mask: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        src_stage_mask: vk::PipelineStageFlags2::TRANSFER,
        dst_stage_mask: vk::PipelineStageFlags2::COMPUTE_SHADER,
    };

    /// Makes device writes from the given stages visible to host reads.
    pub fn host_read(include_compute: bool, include_transfer: bool) -> Self {
        let mut src_stage_mask = vk::PipelineStageFlags2::NONE;
        let mut src_access_mask = vk::AccessFlags2::NONE;
        if include_compute {
            src_stage_mask |= vk::PipelineStageFlags2::COMPUTE_SHADER;
            src_access_mask |= vk::AccessFlags2::SHADER_STORAGE_WRITE;
        }
        if include_transfer {
            src_stage_mask |= vk::PipelineStageFlags2::TRANSFER;
            src_access_mask |= vk::AccessFlags2::TRANSFER_WRITE;
        }

        Self {
            src_access_mask,
            dst_access_mask: vk::AccessFlags2::HOST_READ,
            src_stage_mask,
            dst_stage_mask: vk::PipelineStageFlags2::HOST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_read_after_compute_only() {
        let barrier = MemoryBarrier::host_read(true, false);

        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::SHADER_STORAGE_WRITE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::HOST);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::HOST_READ);
    }

    #[test]
    fn host_read_after_clear_includes_transfer() {
        let barrier = MemoryBarrier::host_read(true, true);

        assert!(barrier
            .src_stage_mask
            .contains(vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER));
        assert!(barrier
            .src_access_mask
            .contains(vk::AccessFlags2::SHADER_STORAGE_WRITE | vk::AccessFlags2::TRANSFER_WRITE));
    }

    #[test]
    fn host_read_after_fill_without_dispatch() {
        let barrier = MemoryBarrier::host_read(false, true);

        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
    }

    #[test]
    fn scratch_barrier_waits_on_build_writes() {
        let barrier = MemoryBarrier::ACCELERATION_STRUCTURE_BUILD;

        assert_eq!(barrier.src_stage_mask, barrier.dst_stage_mask);
        assert!(barrier
            .dst_access_mask
            .contains(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR));
    }
}
