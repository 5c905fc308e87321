use std::{mem::size_of, sync::Arc};

use anyhow::Result;
use ash::vk::{self, Packed24_8};

use crate::{
    utils::compute_aligned_size, AccelerationStructure, Buffer, Context, Error, MemoryBarrier,
    MemoryClass,
};

/// Lifecycle of an [`AccelerationStructureBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    BlasBuilt,
    TlasBuilt,
    Destroyed,
}

impl BuildState {
    fn check_build_blas(self) -> Result<()> {
        match self {
            Self::Empty => Ok(()),
            state => Err(Error::InvalidState(format!("cannot build BLAS in state {state:?}")).into()),
        }
    }

    fn check_build_tlas(self) -> Result<()> {
        match self {
            Self::BlasBuilt | Self::TlasBuilt => Ok(()),
            state => Err(Error::InvalidState(format!("cannot build TLAS in state {state:?}")).into()),
        }
    }

    fn check_destroy(self) -> Result<()> {
        match self {
            Self::BlasBuilt | Self::TlasBuilt => Ok(()),
            state => Err(Error::InvalidState(format!("cannot destroy in state {state:?}")).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BuildPreference {
    #[default]
    FastTrace,
    FastBuild,
}

impl BuildPreference {
    pub fn flags(self) -> vk::BuildAccelerationStructureFlagsKHR {
        match self {
            Self::FastTrace => vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            Self::FastBuild => vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD,
        }
    }
}

/// Part of the index data a triangle geometry is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasRange {
    /// Byte offset into the index buffer.
    pub primitive_offset: u32,
    pub primitive_count: u32,
    pub first_vertex: u32,
}

/// One triangle geometry of a bottom level acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasInput {
    pub vertex_address: vk::DeviceAddress,
    pub vertex_stride: vk::DeviceSize,
    pub vertex_count: u32,
    pub vertex_format: vk::Format,
    pub index_address: vk::DeviceAddress,
    pub index_type: vk::IndexType,
    pub index_count: u32,
    /// Largest vertex index referenced by the index data.
    pub max_index: u32,
    pub flags: vk::GeometryFlagsKHR,
    pub range: BlasRange,
}

impl BlasInput {
    /// Opaque `vec3` positions indexed by `u32` triangles, covering the whole
    /// index buffer.
    pub fn triangles(
        vertex_buffer: &Buffer,
        vertex_count: u32,
        index_buffer: &Buffer,
        index_count: u32,
        max_index: u32,
    ) -> Result<Self> {
        let required = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        vertex_buffer.ensure_usage(required)?;
        index_buffer.ensure_usage(required)?;

        Ok(Self {
            vertex_address: vertex_buffer.get_device_address(),
            vertex_stride: (size_of::<f32>() * 3) as _,
            vertex_count,
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            index_address: index_buffer.get_device_address(),
            index_type: vk::IndexType::UINT32,
            index_count,
            max_index,
            flags: vk::GeometryFlagsKHR::OPAQUE,
            range: BlasRange {
                primitive_offset: 0,
                primitive_count: index_count / 3,
                first_vertex: 0,
            },
        })
    }

    /// Host-side checks that need no device.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(Error::AccelBuild(msg).into()) };

        let index_size = match self.index_type {
            vk::IndexType::UINT16 => 2,
            vk::IndexType::UINT32 => 4,
            other => return fail(format!("unsupported index type {other:?}")),
        };
        if self.vertex_address == 0 || self.index_address == 0 {
            return fail("null vertex or index buffer address".to_string());
        }
        if self.vertex_count == 0 {
            return fail("geometry has no vertices".to_string());
        }
        if self.range.primitive_count == 0 {
            return fail("geometry has no triangles".to_string());
        }
        if self.index_count % 3 != 0 {
            return fail(format!(
                "index count {} is not a multiple of 3",
                self.index_count
            ));
        }
        if self.range.primitive_offset % index_size != 0 {
            return fail(format!(
                "primitive offset {} is not aligned to the index size",
                self.range.primitive_offset
            ));
        }
        let first_index = u64::from(self.range.primitive_offset / index_size);
        let end_index = first_index + u64::from(self.range.primitive_count) * 3;
        if end_index > u64::from(self.index_count) {
            return fail(format!(
                "range ends at index {end_index} past {} indices",
                self.index_count
            ));
        }
        let highest_vertex = u64::from(self.max_index) + u64::from(self.range.first_vertex);
        if highest_vertex >= u64::from(self.vertex_count) {
            return fail(format!(
                "vertex index {highest_vertex} out of range for {} vertices",
                self.vertex_count
            ));
        }

        Ok(())
    }

    fn geometry(&self) -> vk::AccelerationStructureGeometryKHR {
        let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
            .vertex_format(self.vertex_format)
            .vertex_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.vertex_address,
            })
            .vertex_stride(self.vertex_stride)
            .max_vertex(self.max_index + self.range.first_vertex)
            .index_type(self.index_type)
            .index_data(vk::DeviceOrHostAddressConstKHR {
                device_address: self.index_address,
            })
            .build();

        vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
            .flags(self.flags)
            .build()
    }

    fn build_range(&self) -> vk::AccelerationStructureBuildRangeInfoKHR {
        vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(self.range.primitive_count)
            .primitive_offset(self.range.primitive_offset)
            .first_vertex(self.range.first_vertex)
            .transform_offset(0)
            .build()
    }
}

/// Index of a BLAS owned by an [`AccelerationStructureBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasHandle(usize);

const MAX_24_BIT: u32 = (1 << 24) - 1;

/// Placement of one BLAS in the top level structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TlasInstance {
    pub blas: BlasHandle,
    /// Row-major 3x4 affine transform.
    pub transform: [f32; 12],
    pub custom_index: u32,
    pub sbt_record_offset: u32,
    pub mask: u8,
    pub flags: vk::GeometryInstanceFlagsKHR,
}

impl TlasInstance {
    pub const IDENTITY: [f32; 12] = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    pub fn new(blas: BlasHandle) -> Self {
        Self {
            blas,
            transform: Self::IDENTITY,
            custom_index: 0,
            sbt_record_offset: 0,
            mask: 0xFF,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
        }
    }

    fn to_vk(&self, blas_address: vk::DeviceAddress) -> Result<vk::AccelerationStructureInstanceKHR> {
        if self.custom_index > MAX_24_BIT || self.sbt_record_offset > MAX_24_BIT {
            return Err(Error::AccelBuild(format!(
                "custom index {} or record offset {} does not fit 24 bits",
                self.custom_index, self.sbt_record_offset
            ))
            .into());
        }

        Ok(vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR {
                matrix: self.transform,
            },
            instance_custom_index_and_mask: Packed24_8::new(self.custom_index, self.mask),
            instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(
                self.sbt_record_offset,
                self.flags.as_raw() as _,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: blas_address,
            },
        })
    }
}

/// Builds the bottom level structures of a scene once, then one top level
/// structure over them (rebuildable).
pub struct AccelerationStructureBuilder {
    context: Arc<Context>,
    state: BuildState,
    blas: Vec<AccelerationStructure>,
    tlas: Option<AccelerationStructure>,
}

impl AccelerationStructureBuilder {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            state: BuildState::Empty,
            blas: vec![],
            tlas: None,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn tlas(&self) -> Option<&AccelerationStructure> {
        self.tlas.as_ref()
    }

    pub fn blas_address(&self, handle: BlasHandle) -> Option<vk::DeviceAddress> {
        self.blas.get(handle.0).map(|blas| blas.address)
    }

    /// Builds one BLAS per entry of `meshes`, each from its geometries. Nothing
    /// is allocated unless every input is valid.
    pub fn build_blas(
        &mut self,
        meshes: &[Vec<BlasInput>],
        preference: BuildPreference,
    ) -> Result<Vec<BlasHandle>> {
        self.state.check_build_blas()?;

        if meshes.is_empty() {
            return Err(Error::AccelBuild("no meshes to build".to_string()).into());
        }
        for (mesh_index, inputs) in meshes.iter().enumerate() {
            if inputs.is_empty() {
                return Err(Error::AccelBuild(format!("mesh {mesh_index} has no geometry")).into());
            }
            for input in inputs {
                input.validate()?;
                if !self
                    .context
                    .physical_device
                    .supports_acceleration_structure_vertex_format(input.vertex_format)
                {
                    return Err(Error::AccelBuild(format!(
                        "vertex format {:?} is not supported for acceleration structures",
                        input.vertex_format
                    ))
                    .into());
                }
            }
        }

        let flags = preference.flags();
        let level = vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL;

        let geometries = meshes
            .iter()
            .map(|inputs| inputs.iter().map(BlasInput::geometry).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let ranges = meshes
            .iter()
            .map(|inputs| inputs.iter().map(BlasInput::build_range).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        let sizes = geometries
            .iter()
            .zip(meshes)
            .map(|(geometries, inputs)| {
                let max_primitive_counts = inputs
                    .iter()
                    .map(|input| input.range.primitive_count)
                    .collect::<Vec<_>>();
                self.context.acceleration_structure_build_sizes(
                    level,
                    flags,
                    geometries,
                    &max_primitive_counts,
                )
            })
            .collect::<Vec<_>>();

        let blas = sizes
            .iter()
            .map(|size| {
                log::debug!(
                    "BLAS size {} bytes, scratch {} bytes",
                    size.acceleration_structure_size,
                    size.build_scratch_size
                );
                AccelerationStructure::new(&self.context, level, size.acceleration_structure_size)
            })
            .collect::<Result<Vec<_>>>()?;

        let scratch_size = sizes
            .iter()
            .map(|size| size.build_scratch_size)
            .max()
            .unwrap_or_default();
        let (_scratch_buffer, scratch_address) = self.create_scratch(scratch_size)?;

        let build_infos = geometries
            .iter()
            .zip(blas.iter())
            .map(|(geometries, blas)| {
                vk::AccelerationStructureBuildGeometryInfoKHR::builder()
                    .ty(level)
                    .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                    .flags(flags)
                    .geometries(geometries)
                    .dst_acceleration_structure(blas.inner)
                    .scratch_data(vk::DeviceOrHostAddressKHR {
                        device_address: scratch_address,
                    })
                    .build()
            })
            .collect::<Vec<_>>();

        self.context
            .execute_one_time_commands(|cmd_buffer| {
                for (i, (build_info, ranges)) in build_infos.iter().zip(ranges.iter()).enumerate() {
                    if i > 0 {
                        cmd_buffer
                            .pipeline_memory_barriers(&[MemoryBarrier::ACCELERATION_STRUCTURE_BUILD]);
                    }
                    cmd_buffer.build_acceleration_structures(build_info, ranges);
                }
            })
            .map_err(|e| Error::AccelBuild(format!("{e:#}")))?;

        log::info!("Built {} bottom level acceleration structures", blas.len());

        let first = self.blas.len();
        self.blas.extend(blas);
        self.state = BuildState::BlasBuilt;

        Ok((first..self.blas.len()).map(BlasHandle).collect())
    }

    /// Builds (or rebuilds) the top level structure. A rebuild replaces the
    /// previous handle; descriptor sets holding it must be written again.
    pub fn build_tlas(
        &mut self,
        instances: &[TlasInstance],
        preference: BuildPreference,
    ) -> Result<&AccelerationStructure> {
        self.state.check_build_tlas()?;

        if instances.is_empty() {
            return Err(Error::AccelBuild("no instances to build".to_string()).into());
        }
        let instances = instances
            .iter()
            .map(|instance| {
                let address = self.blas_address(instance.blas).ok_or_else(|| {
                    Error::AccelBuild(format!("{:?} was not built here", instance.blas))
                })?;
                instance.to_vk(address)
            })
            .collect::<Result<Vec<_>>>()?;
        let instance_count = instances.len() as u32;

        // host visible so the build reads host writes without a transfer
        let mut instance_buffer = self.context.create_buffer(
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryClass::HostUpload,
            (size_of::<vk::AccelerationStructureInstanceKHR>() * instances.len()) as _,
        )?;
        instance_buffer.copy_data_to_buffer(&instances)?;

        let instances_data = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
            .array_of_pointers(false)
            .data(vk::DeviceOrHostAddressConstKHR {
                device_address: instance_buffer.get_device_address(),
            })
            .build();
        let geometry = vk::AccelerationStructureGeometryKHR::builder()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: instances_data,
            })
            .build();
        let geometries = [geometry];

        let flags = preference.flags();
        let level = vk::AccelerationStructureTypeKHR::TOP_LEVEL;
        let size = self.context.acceleration_structure_build_sizes(
            level,
            flags,
            &geometries,
            &[instance_count],
        );
        log::debug!(
            "TLAS size {} bytes, scratch {} bytes",
            size.acceleration_structure_size,
            size.build_scratch_size
        );

        let tlas = AccelerationStructure::new(&self.context, level, size.acceleration_structure_size)?;
        let (_scratch_buffer, scratch_address) = self.create_scratch(size.build_scratch_size)?;

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(level)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .flags(flags)
            .geometries(&geometries)
            .dst_acceleration_structure(tlas.inner)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            });
        let range = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(instance_count)
            .build();

        self.context
            .execute_one_time_commands(|cmd_buffer| {
                cmd_buffer.build_acceleration_structures(&build_info, std::slice::from_ref(&range));
            })
            .map_err(|e| Error::AccelBuild(format!("{e:#}")))?;

        log::info!("Built top level acceleration structure over {instance_count} instances");

        if self.tlas.is_some() {
            log::debug!("Replacing previous TLAS");
        }
        self.state = BuildState::TlasBuilt;

        Ok(&*self.tlas.insert(tlas))
    }

    /// Releases every structure. Only valid once something was built.
    pub fn destroy(&mut self) -> Result<()> {
        self.state.check_destroy()?;

        self.tlas = None;
        self.blas.clear();
        self.state = BuildState::Destroyed;

        Ok(())
    }

    /// Scratch buffer of at least `size` bytes and its device address aligned
    /// to the device's scratch offset alignment.
    fn create_scratch(&self, size: vk::DeviceSize) -> Result<(Buffer, vk::DeviceAddress)> {
        let alignment = self.context.ray_tracing.scratch_alignment();
        let buffer = self.context.create_buffer(
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryClass::DeviceLocal,
            compute_aligned_size(size, alignment) + alignment,
        )?;
        let address = compute_aligned_size(buffer.get_device_address(), alignment);

        Ok((buffer, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_input() -> BlasInput {
        BlasInput {
            vertex_address: 0x1000,
            vertex_stride: 12,
            vertex_count: 3,
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            index_address: 0x2000,
            index_type: vk::IndexType::UINT32,
            index_count: 3,
            max_index: 2,
            flags: vk::GeometryFlagsKHR::OPAQUE,
            range: BlasRange {
                primitive_offset: 0,
                primitive_count: 1,
                first_vertex: 0,
            },
        }
    }

    fn accel_build_error(input: BlasInput) -> bool {
        matches!(
            input.validate().unwrap_err().downcast_ref::<Error>(),
            Some(Error::AccelBuild(_))
        )
    }

    #[test]
    fn valid_triangle_passes() {
        assert!(triangle_input().validate().is_ok());
    }

    #[test]
    fn index_past_vertex_count_is_rejected() {
        assert!(accel_build_error(BlasInput {
            max_index: 3,
            ..triangle_input()
        }));
    }

    #[test]
    fn first_vertex_counts_towards_vertex_range() {
        let mut input = triangle_input();
        input.range.first_vertex = 1;
        assert!(accel_build_error(input));
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        let mut no_triangles = triangle_input();
        no_triangles.range.primitive_count = 0;
        assert!(accel_build_error(no_triangles));

        assert!(accel_build_error(BlasInput {
            index_count: 4,
            ..triangle_input()
        }));
        assert!(accel_build_error(BlasInput {
            vertex_address: 0,
            ..triangle_input()
        }));
        assert!(accel_build_error(BlasInput {
            index_type: vk::IndexType::NONE_KHR,
            ..triangle_input()
        }));
    }

    #[test]
    fn range_must_stay_inside_index_data() {
        let mut input = triangle_input();
        input.range.primitive_offset = 4;
        assert!(accel_build_error(input));

        let mut input = BlasInput {
            index_count: 6,
            ..triangle_input()
        };
        input.range.primitive_offset = 12;
        assert!(input.validate().is_ok());

        input.range.primitive_offset = 2;
        assert!(accel_build_error(input));
    }

    #[test]
    fn state_machine_orders_stages() {
        assert!(BuildState::Empty.check_build_blas().is_ok());
        assert!(BuildState::BlasBuilt.check_build_blas().is_err());
        assert!(BuildState::Empty.check_build_tlas().is_err());
        assert!(BuildState::BlasBuilt.check_build_tlas().is_ok());
        assert!(BuildState::TlasBuilt.check_build_tlas().is_ok());
        assert!(BuildState::Destroyed.check_build_tlas().is_err());
    }

    #[test]
    fn destroy_is_rejected_when_nothing_is_owned() {
        for state in [BuildState::Empty, BuildState::Destroyed] {
            let err = state.check_destroy().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::InvalidState(_))
            ));
        }
        assert!(BuildState::TlasBuilt.check_destroy().is_ok());
    }

    #[test]
    fn instance_packs_index_mask_and_flags() {
        let instance = TlasInstance {
            custom_index: 7,
            sbt_record_offset: 2,
            ..TlasInstance::new(BlasHandle(0))
        };
        let packed = instance.to_vk(0xABCD).unwrap();

        assert_eq!(packed.instance_custom_index_and_mask.low_24(), 7);
        assert_eq!(packed.instance_custom_index_and_mask.high_8(), 0xFF);
        assert_eq!(
            packed
                .instance_shader_binding_table_record_offset_and_flags
                .low_24(),
            2
        );
        assert_eq!(
            u32::from(
                packed
                    .instance_shader_binding_table_record_offset_and_flags
                    .high_8()
            ),
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw()
        );
        assert_eq!(packed.transform.matrix, TlasInstance::IDENTITY);
    }

    #[test]
    fn oversized_custom_index_is_rejected() {
        let instance = TlasInstance {
            custom_index: 1 << 24,
            ..TlasInstance::new(BlasHandle(0))
        };

        assert!(instance.to_vk(0xABCD).is_err());
    }

    #[test]
    fn build_preference_maps_to_flags() {
        assert_eq!(
            BuildPreference::default().flags(),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
        );
        assert_eq!(
            BuildPreference::FastBuild.flags(),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD
        );
    }
}
