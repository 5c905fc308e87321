use anyhow::Result;
use vulkan::ash::vk;
use vulkan::{BufferHandle, ResourceAllocator};

use crate::geometry::Mesh;

/// Usage shared by the vertex and index buffers: read by the BLAS build
/// through their device address and by the compute shader as storage.
pub const MESH_BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS.as_raw()
        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw(),
);

/// Device copies of one mesh.
#[derive(Debug, Clone, Copy)]
pub struct MeshBuffers {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    pub max_index: u32,
}

impl MeshBuffers {
    pub fn upload(allocator: &mut ResourceAllocator, mesh: &Mesh) -> Result<Self> {
        mesh.validate()?;

        let vertex_buffer = allocator.upload_buffer(&mesh.positions, MESH_BUFFER_USAGE)?;
        let index_buffer = match allocator.upload_buffer(&mesh.indices, MESH_BUFFER_USAGE) {
            Ok(handle) => handle,
            Err(e) => {
                allocator.destroy(vertex_buffer)?;
                return Err(e);
            }
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count(),
            index_count: mesh.indices.len() as _,
            max_index: mesh.max_index(),
        })
    }

    pub fn destroy(self, allocator: &mut ResourceAllocator) -> Result<()> {
        allocator.destroy(self.vertex_buffer)?;
        allocator.destroy(self.index_buffer)
    }
}
