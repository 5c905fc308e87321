//! End-to-end checks against a real device. They need a GPU with ray query
//! support and compiled shaders: `cargo test -- --ignored`.

use std::sync::Arc;

use app::anyhow::Result;
use app::vulkan::ash::vk;
use app::vulkan::{
    AccelerationStructureBuilder, BoundResource, BuildPreference, BuildState, Context, Error,
    MemoryClass, ResourceAllocator, TlasInstance,
};
use app::{App, BaseApp, Dispatch, RenderConfig};
use asset_loader::acceleration_structures::blas_input;
use asset_loader::globals::MeshBuffers;
use asset_loader::Mesh;
use ray_query::pipeline_res::create_pipeline;
use ray_query::{SceneRenderer, AS_BIND, OUTPUT_BIND, WHITE_SHADER};

fn triangle() -> Mesh {
    Mesh {
        positions: vec![-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0],
        indices: vec![0, 1, 2],
    }
}

fn setup() -> (Arc<Context>, ResourceAllocator) {
    let context = app::create_context("ray query tests").unwrap();
    let allocator = ResourceAllocator::new(context.clone());
    (context, allocator)
}

fn error_kind(err: &app::anyhow::Error) -> Option<&Error> {
    err.downcast_ref::<Error>()
}

struct WhiteTriangle {
    scene: SceneRenderer,
}

impl App for WhiteTriangle {
    fn new(base: &mut BaseApp<Self>) -> Result<Self> {
        let scene = SceneRenderer::new(base, &triangle(), WHITE_SHADER)?;
        Ok(Self { scene })
    }

    fn render(&mut self, base: &mut BaseApp<Self>) -> Result<()> {
        self.scene.render(base)
    }

    fn destroy(self, base: &mut BaseApp<Self>) -> Result<()> {
        self.scene.destroy(base)
    }
}

#[test]
#[ignore]
fn white_shader_fills_every_pixel() {
    let pixels = app::render::<WhiteTriangle>("white triangle", RenderConfig::default()).unwrap();

    assert_eq!(pixels.len(), 800 * 600 * 3);
    assert!(pixels.iter().all(|&c| c == 1.0));
}

#[test]
#[ignore]
fn white_shader_overwrites_a_clear() {
    let config = RenderConfig {
        clear: Some(0.5),
        ..Default::default()
    };
    let pixels = app::render::<WhiteTriangle>("white triangle", config).unwrap();

    assert!(pixels.iter().all(|&c| c == 1.0));
}

#[test]
#[ignore]
fn cleared_output_reads_back_without_dispatch() {
    let (context, mut allocator) = setup();
    let config = RenderConfig::default();
    let output = allocator
        .create_buffer(
            config.output_size(),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryClass::HostReadback,
        )
        .unwrap();

    app::clear_for_readback(&context, allocator.get(output).unwrap(), 0.5).unwrap();
    let pixels = app::read_output(&mut allocator, output).unwrap();

    assert_eq!(pixels.len(), config.component_count());
    assert!(pixels.iter().all(|&c| c == 0.5));
    allocator.destroy(output).unwrap();
}

#[test]
#[ignore]
fn mapped_write_reads_back_identical() {
    let (_context, mut allocator) = setup();
    let data = (0..256).map(|i| i as f32 * 0.25).collect::<Vec<_>>();
    let buffer = allocator
        .create_buffer(
            (data.len() * 4) as _,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryClass::HostUpload,
        )
        .unwrap();

    allocator.map(buffer).unwrap().write(&data).unwrap();
    let mapped = allocator.map(buffer).unwrap();

    assert_eq!(mapped.read::<f32>(), data);
    mapped.unmap();
    allocator.destroy(buffer).unwrap();
}

#[test]
#[ignore]
fn device_local_memory_cannot_be_mapped() {
    let (_context, mut allocator) = setup();
    let buffer = allocator
        .upload_buffer(&[1u32, 2, 3], vk::BufferUsageFlags::STORAGE_BUFFER)
        .unwrap();

    let err = allocator.map(buffer).err().unwrap();
    assert!(matches!(error_kind(&err), Some(Error::NotHostVisible)));

    allocator.destroy(buffer).unwrap();
    let err = allocator.destroy(buffer).unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::StaleHandle(_))));
}

#[test]
#[ignore]
fn failed_allocation_leaves_the_allocator_usable() {
    let (_context, mut allocator) = setup();

    let err = allocator
        .create_buffer(
            1 << 40,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryClass::HostUpload,
        )
        .unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::Allocation(_))));
    assert_eq!(allocator.live_buffers(), 0);

    let buffer = allocator
        .create_buffer(16, vk::BufferUsageFlags::STORAGE_BUFFER, MemoryClass::HostUpload)
        .unwrap();
    assert_eq!(allocator.live_buffers(), 1);
    allocator.destroy(buffer).unwrap();
}

#[test]
#[ignore]
fn released_handle_does_not_alias_a_new_buffer() {
    let (_context, mut allocator) = setup();
    let usage = vk::BufferUsageFlags::STORAGE_BUFFER;

    let first = allocator
        .create_buffer(16, usage, MemoryClass::HostUpload)
        .unwrap();
    allocator.destroy(first).unwrap();
    let second = allocator
        .create_buffer(32, usage, MemoryClass::HostUpload)
        .unwrap();

    let err = allocator.get(first).err().unwrap();
    assert!(matches!(error_kind(&err), Some(Error::StaleHandle(_))));
    let err = allocator.destroy(first).unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::StaleHandle(_))));
    assert_eq!(allocator.get(second).unwrap().size, 32);

    allocator.destroy(second).unwrap();
}

#[test]
#[ignore]
fn one_time_commands_run_back_to_back() {
    let (context, _allocator) = setup();

    for i in 0..512u32 {
        let recorded = context
            .execute_one_time_commands(|_| if i % 2 == 0 { Ok(i) } else { Err(i) })
            .unwrap();
        assert_eq!(recorded, if i % 2 == 0 { Ok(i) } else { Err(i) });
    }
}

#[test]
#[ignore]
fn out_of_range_index_builds_nothing() {
    let (context, mut allocator) = setup();
    let mesh_buffers = MeshBuffers::upload(&mut allocator, &triangle()).unwrap();
    let mut builder = AccelerationStructureBuilder::new(context);

    let valid = blas_input(&allocator, &mesh_buffers).unwrap();
    let invalid = app::vulkan::BlasInput {
        max_index: valid.vertex_count,
        ..valid
    };
    let err = builder
        .build_blas(&[vec![invalid]], BuildPreference::FastTrace)
        .unwrap_err();

    assert!(matches!(error_kind(&err), Some(Error::AccelBuild(_))));
    assert_eq!(builder.state(), BuildState::Empty);

    let blas = builder
        .build_blas(&[vec![valid]], BuildPreference::FastTrace)
        .unwrap();
    assert_eq!(blas.len(), 1);

    builder.destroy().unwrap();
    mesh_buffers.destroy(&mut allocator).unwrap();
}

#[test]
#[ignore]
fn identity_instance_tlas_is_built() {
    let (context, mut allocator) = setup();
    let mesh_buffers = MeshBuffers::upload(&mut allocator, &triangle()).unwrap();
    let mut builder = AccelerationStructureBuilder::new(context);

    let err = builder
        .build_tlas(&[], BuildPreference::FastTrace)
        .unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::InvalidState(_))));

    let input = blas_input(&allocator, &mesh_buffers).unwrap();
    let blas = builder
        .build_blas(&[vec![input]], BuildPreference::FastTrace)
        .unwrap();
    assert!(builder.blas_address(blas[0]).unwrap() != 0);

    let tlas = builder
        .build_tlas(&[TlasInstance::new(blas[0])], BuildPreference::FastTrace)
        .unwrap();
    assert_ne!(tlas.handle(), vk::AccelerationStructureKHR::null());
    assert_eq!(tlas.level, vk::AccelerationStructureTypeKHR::TOP_LEVEL);
    assert_eq!(builder.state(), BuildState::TlasBuilt);

    // rebuild with two instances of the same BLAS
    let moved = TlasInstance {
        transform: asset_loader::acceleration_structures::instance_transform(
            glam::Mat4::from_translation(glam::Vec3::X * 3.0),
        ),
        ..TlasInstance::new(blas[0])
    };
    builder
        .build_tlas(
            &[TlasInstance::new(blas[0]), moved],
            BuildPreference::FastTrace,
        )
        .unwrap();
    assert_eq!(builder.state(), BuildState::TlasBuilt);

    builder.destroy().unwrap();
    mesh_buffers.destroy(&mut allocator).unwrap();
}

#[test]
#[ignore]
fn destroy_twice_is_rejected() {
    let (context, mut allocator) = setup();
    let mesh_buffers = MeshBuffers::upload(&mut allocator, &triangle()).unwrap();
    let mut builder = AccelerationStructureBuilder::new(context);

    let err = builder.destroy().unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::InvalidState(_))));

    let input = blas_input(&allocator, &mesh_buffers).unwrap();
    builder
        .build_blas(&[vec![input]], BuildPreference::FastTrace)
        .unwrap();
    builder.destroy().unwrap();
    assert_eq!(builder.state(), BuildState::Destroyed);

    let err = builder.destroy().unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::InvalidState(_))));
    assert!(builder.tlas().is_none());

    mesh_buffers.destroy(&mut allocator).unwrap();
}

#[test]
#[ignore]
fn binder_rejects_bad_writes_and_incomplete_sets() {
    let (context, mut allocator) = setup();
    let mut pipeline_res = create_pipeline(&context, WHITE_SHADER).unwrap();
    let output = allocator
        .create_buffer(
            RenderConfig::default().output_size(),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryClass::HostReadback,
        )
        .unwrap();
    let no_storage = allocator
        .create_buffer(16, vk::BufferUsageFlags::TRANSFER_DST, MemoryClass::HostUpload)
        .unwrap();

    let err = pipeline_res
        .binder
        .write(
            AS_BIND,
            BoundResource::StorageBuffer(allocator.get(output).unwrap()),
        )
        .unwrap_err();
    assert!(matches!(
        error_kind(&err),
        Some(Error::SlotTypeMismatch { slot: AS_BIND, .. })
    ));

    let err = pipeline_res
        .binder
        .write(
            OUTPUT_BIND,
            BoundResource::StorageBuffer(allocator.get(no_storage).unwrap()),
        )
        .unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::MissingUsage(_))));

    pipeline_res
        .binder
        .write(
            OUTPUT_BIND,
            BoundResource::StorageBuffer(allocator.get(output).unwrap()),
        )
        .unwrap();
    let err = Dispatch {
        pipeline: &pipeline_res.pipeline,
        layout: &pipeline_res.pipeline_layout,
        binder: &pipeline_res.binder,
        grid: RenderConfig::default().grid(),
        clear: None,
    }
    .submit(&context)
    .unwrap_err();
    assert!(matches!(error_kind(&err), Some(Error::UnwrittenSlot(AS_BIND))));

    allocator.destroy(no_storage).unwrap();
    allocator.destroy(output).unwrap();
}
