use crate::{AS_BIND, INDEX_BIND, OUTPUT_BIND, VERTEX_BIND};
use app::anyhow::Result;
use app::vulkan::{
    AccelerationStructure, BoundResource, BufferHandle, ResourceAllocator, ResourceBinder,
};
use asset_loader::globals::MeshBuffers;

pub fn write_descriptor_sets(
    allocator: &ResourceAllocator,
    binder: &mut ResourceBinder,
    output_buffer: BufferHandle,
    tlas: &AccelerationStructure,
    mesh_buffers: &MeshBuffers,
) -> Result<()> {
    binder.write_all(&[
        (
            OUTPUT_BIND,
            BoundResource::StorageBuffer(allocator.get(output_buffer)?),
        ),
        (AS_BIND, BoundResource::AccelerationStructure(tlas)),
        (
            VERTEX_BIND,
            BoundResource::StorageBuffer(allocator.get(mesh_buffers.vertex_buffer)?),
        ),
        (
            INDEX_BIND,
            BoundResource::StorageBuffer(allocator.get(mesh_buffers.index_buffer)?),
        ),
    ])
}
