use anyhow::Result;
use glam::Mat4;
use vulkan::{
    AccelerationStructureBuilder, BlasHandle, BlasInput, BuildPreference, ResourceAllocator,
    TlasInstance,
};

use crate::globals::MeshBuffers;

pub fn blas_input(allocator: &ResourceAllocator, buffers: &MeshBuffers) -> Result<BlasInput> {
    BlasInput::triangles(
        allocator.get(buffers.vertex_buffer)?,
        buffers.vertex_count,
        allocator.get(buffers.index_buffer)?,
        buffers.index_count,
        buffers.max_index,
    )
}

/// Row-major 3x4 instance transform from a column-major matrix.
pub fn instance_transform(transform: Mat4) -> [f32; 12] {
    let transform = transform.transpose().to_cols_array();
    let mut matrix = [0.; 12];
    // Row major.
    matrix.copy_from_slice(&transform[..12]);
    matrix
}

/// Builds one BLAS over the mesh and a TLAS holding a single instance of it.
pub fn create_as(
    builder: &mut AccelerationStructureBuilder,
    allocator: &ResourceAllocator,
    buffers: &MeshBuffers,
    transform: Mat4,
) -> Result<BlasHandle> {
    let input = blas_input(allocator, buffers)?;
    let blas = builder
        .build_blas(&[vec![input]], BuildPreference::FastTrace)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No BLAS was built"))?;

    let instance = TlasInstance {
        transform: instance_transform(transform),
        ..TlasInstance::new(blas)
    };
    builder.build_tlas(&[instance], BuildPreference::FastTrace)?;

    Ok(blas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn identity_matches_instance_default() {
        assert_eq!(instance_transform(Mat4::IDENTITY), TlasInstance::IDENTITY);
    }

    #[test]
    fn translation_ends_each_row() {
        let matrix = instance_transform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));

        assert_eq!(matrix[3], 1.0);
        assert_eq!(matrix[7], 2.0);
        assert_eq!(matrix[11], 3.0);
    }
}
