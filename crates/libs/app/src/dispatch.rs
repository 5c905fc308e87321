use anyhow::Result;
use vulkan::{
    ash::vk, Buffer, ComputePipeline, Context, Error, MemoryBarrier, PipelineLayout,
    ResourceBinder,
};

/// Workgroup counts of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// Smallest grid of `group_width x group_height` workgroups covering a
    /// `width x height` image.
    pub fn covering(width: u32, height: u32, group_width: u32, group_height: u32) -> Self {
        Self {
            x: width.div_ceil(group_width),
            y: height.div_ceil(group_height),
            z: 1,
        }
    }
}

/// Fill of the output buffer recorded ahead of the dispatch.
#[derive(Clone, Copy)]
pub struct Clear<'a> {
    pub buffer: &'a Buffer,
    pub value: f32,
}

/// One compute pass over the output image.
pub struct Dispatch<'a> {
    pub pipeline: &'a ComputePipeline,
    pub layout: &'a PipelineLayout,
    pub binder: &'a ResourceBinder,
    pub grid: DispatchGrid,
    pub clear: Option<Clear<'a>>,
}

impl Dispatch<'_> {
    /// Records, submits and waits for the pass. On return every write of the
    /// shader is visible to host reads of mapped memory.
    pub fn submit(&self, context: &Context) -> Result<()> {
        self.binder.ensure_complete()?;
        if let Some(clear) = &self.clear {
            clear.buffer.ensure_usage(vk::BufferUsageFlags::TRANSFER_DST)?;
        }

        let DispatchGrid { x, y, z } = self.grid;
        log::debug!("Dispatching {x}x{y}x{z} workgroups");

        context
            .execute_one_time_commands(|cmd_buffer| -> Result<()> {
                if let Some(clear) = &self.clear {
                    cmd_buffer.fill_buffer(clear.buffer, clear.value)?;
                    cmd_buffer.pipeline_memory_barriers(&[MemoryBarrier::TRANSFER_TO_COMPUTE]);
                }

                cmd_buffer.bind_compute_pipeline(self.pipeline);
                cmd_buffer.bind_descriptor_sets(
                    vk::PipelineBindPoint::COMPUTE,
                    self.layout,
                    0,
                    &[&self.binder.set],
                );
                cmd_buffer.dispatch(x, y, z);

                cmd_buffer.pipeline_memory_barriers(&[MemoryBarrier::host_read(
                    true,
                    self.clear.is_some(),
                )]);

                Ok(())
            })
            .and_then(|recorded| recorded)
            .map_err(|e| Error::Dispatch(format!("{e:#}")))?;

        Ok(())
    }
}

/// Fills `buffer` with `value` and makes the fill visible to the host without
/// running any shader.
pub fn clear_for_readback(context: &Context, buffer: &Buffer, value: f32) -> Result<()> {
    buffer.ensure_usage(vk::BufferUsageFlags::TRANSFER_DST)?;

    context
        .execute_one_time_commands(|cmd_buffer| -> Result<()> {
            cmd_buffer.fill_buffer(buffer, value)?;
            cmd_buffer.pipeline_memory_barriers(&[MemoryBarrier::host_read(false, true)]);

            Ok(())
        })
        .and_then(|recorded| recorded)
        .map_err(|e| Error::Dispatch(format!("{e:#}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiples_need_no_extra_group() {
        assert_eq!(
            DispatchGrid::covering(800, 600, 16, 8),
            DispatchGrid { x: 50, y: 75, z: 1 }
        );
    }

    #[test]
    fn remainders_round_up() {
        assert_eq!(
            DispatchGrid::covering(801, 601, 16, 8),
            DispatchGrid { x: 51, y: 76, z: 1 }
        );
        assert_eq!(
            DispatchGrid::covering(1, 1, 16, 8),
            DispatchGrid { x: 1, y: 1, z: 1 }
        );
    }

    #[test]
    fn grid_is_minimal() {
        for (width, height) in [(1, 1), (15, 7), (16, 8), (17, 9), (800, 600), (1920, 1080)] {
            let grid = DispatchGrid::covering(width, height, 16, 8);

            assert!(grid.x * 16 >= width && grid.y * 8 >= height);
            assert!((grid.x - 1) * 16 < width && (grid.y - 1) * 8 < height);
        }
    }

    #[test]
    fn huge_images_do_not_overflow() {
        let grid = DispatchGrid::covering(u32::MAX, u32::MAX, 16, 8);
        assert_eq!(grid.x, u32::MAX / 16 + 1);
        assert_eq!(grid.y, u32::MAX / 8 + 1);
    }
}
