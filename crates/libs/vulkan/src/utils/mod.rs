use std::mem::size_of_val;

use anyhow::Result;
use ash::vk;

use crate::{Buffer, Context, Error, MemoryClass};

/// Rounds `size` up to a multiple of `alignment`, which must be a power of two.
pub fn compute_aligned_size(size: u64, alignment: u64) -> u64 {
    (size + (alignment - 1)) & !(alignment - 1)
}

pub fn read_shader_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(ash::util::read_spv(&mut cursor)?)
}

/// Uploads `data` into a new device-local buffer through a host-visible
/// staging buffer. Blocks until the copy completed.
pub fn create_gpu_only_buffer_from_data<T: Copy>(
    context: &Context,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<Buffer> {
    let size = size_of_val(data) as _;
    if size == 0 {
        return Err(Error::Upload("no data to upload".to_string()).into());
    }

    let mut staging_buffer = context.create_buffer(
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryClass::HostUpload,
        size,
    )?;
    staging_buffer.copy_data_to_buffer(data)?;

    let buffer = context.create_buffer(
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryClass::DeviceLocal,
        size,
    )?;

    context
        .execute_one_time_commands(|cmd_buffer| {
            cmd_buffer.copy_buffer(&staging_buffer, &buffer);
        })
        .map_err(|e| Error::Upload(format!("{e:#}")))?;

    Ok(buffer)
}
