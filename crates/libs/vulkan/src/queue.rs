use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, CommandBuffer, Fence};

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub(crate) inner: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub(crate) fn new(index: u32, inner: vk::QueueFamilyProperties) -> Self {
        Self { index, inner }
    }

    pub fn supports_compute(&self) -> bool {
        self.inner.queue_flags.contains(vk::QueueFlags::COMPUTE)
    }

    pub fn supports_graphics(&self) -> bool {
        self.inner.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }

    pub fn has_queues(&self) -> bool {
        self.inner.queue_count > 0
    }

    /// Graphics, compute and (implicitly) transfer on one queue.
    pub fn supports_gct(&self) -> bool {
        self.has_queues() && self.supports_graphics() && self.supports_compute()
    }
}

pub struct Queue {
    device: Arc<Device>,
    pub inner: vk::Queue,
}

impl Queue {
    pub(crate) fn new(device: Arc<Device>, inner: vk::Queue) -> Self {
        Self { device, inner }
    }

    pub fn submit(&self, command_buffer: &CommandBuffer, fence: &Fence) -> Result<()> {
        let cmd_buffer_submit_info =
            vk::CommandBufferSubmitInfo::builder().command_buffer(command_buffer.inner);

        let submit_info = vk::SubmitInfo2::builder()
            .command_buffer_infos(std::slice::from_ref(&cmd_buffer_submit_info));

        unsafe {
            self.device.inner.queue_submit2(
                self.inner,
                std::slice::from_ref(&submit_info),
                fence.inner,
            )?
        };

        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.inner.queue_wait_idle(self.inner)? };

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> QueueFamily {
        QueueFamily::new(
            0,
            vk::QueueFamilyProperties {
                queue_flags: flags,
                queue_count,
                ..Default::default()
            },
        )
    }

    #[test]
    fn gct_requires_graphics_and_compute() {
        assert!(family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1).supports_gct());
        assert!(!family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 1).supports_gct());
        assert!(!family(vk::QueueFlags::GRAPHICS, 1).supports_gct());
    }

    #[test]
    fn empty_family_is_unusable() {
        assert!(!family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 0).supports_gct());
    }
}
