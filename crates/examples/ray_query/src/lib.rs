use app::anyhow::{anyhow, Result};
use app::vulkan::{AccelerationStructureBuilder, BuildState};
use app::{App, BaseApp, Dispatch};
use asset_loader::acceleration_structures::create_as;
use asset_loader::globals::MeshBuffers;
use asset_loader::Mesh;
use glam::Mat4;

pub mod desc_sets;
pub mod pipeline_res;

use desc_sets::write_descriptor_sets;
use pipeline_res::{create_pipeline, PipelineRes};

pub const APP_NAME: &str = "Ray query cornell box";
pub const SCENE_PATH: &str = "scenes/CornellBox-Original-Merged.obj";
pub const SHADER: &str = "raytrace.comp.glsl.spv";
pub const WHITE_SHADER: &str = "white.comp.glsl.spv";

pub const OUTPUT_BIND: u32 = 0;
pub const AS_BIND: u32 = 1;
pub const VERTEX_BIND: u32 = 2;
pub const INDEX_BIND: u32 = 3;

/// A mesh on the device, its acceleration structures and a compute pipeline
/// bound to them and to the output image.
pub struct SceneRenderer {
    mesh_buffers: MeshBuffers,
    as_builder: AccelerationStructureBuilder,
    pipeline_res: PipelineRes,
}

impl SceneRenderer {
    pub fn new<B: App>(base: &mut BaseApp<B>, mesh: &Mesh, shader: &str) -> Result<Self> {
        let mesh_buffers = MeshBuffers::upload(&mut base.allocator, mesh)?;

        let mut as_builder = AccelerationStructureBuilder::new(base.context.clone());
        create_as(&mut as_builder, &base.allocator, &mesh_buffers, Mat4::IDENTITY)?;
        let tlas = as_builder
            .tlas()
            .ok_or_else(|| anyhow!("Scene has no top level acceleration structure"))?;

        let mut pipeline_res = create_pipeline(&base.context, shader)?;
        write_descriptor_sets(
            &base.allocator,
            &mut pipeline_res.binder,
            base.output_buffer,
            tlas,
            &mesh_buffers,
        )?;

        Ok(Self {
            mesh_buffers,
            as_builder,
            pipeline_res,
        })
    }

    pub fn render<B: App>(&self, base: &BaseApp<B>) -> Result<()> {
        Dispatch {
            pipeline: &self.pipeline_res.pipeline,
            layout: &self.pipeline_res.pipeline_layout,
            binder: &self.pipeline_res.binder,
            grid: base.config.grid(),
            clear: base.clear()?,
        }
        .submit(&base.context)
    }

    pub fn destroy<B: App>(mut self, base: &mut BaseApp<B>) -> Result<()> {
        if matches!(
            self.as_builder.state(),
            BuildState::BlasBuilt | BuildState::TlasBuilt
        ) {
            self.as_builder.destroy()?;
        }
        self.mesh_buffers.destroy(&mut base.allocator)
    }
}

/// Renders the cornell box with primary ray queries.
pub struct RayQuery {
    scene: SceneRenderer,
}

impl App for RayQuery {
    fn new(base: &mut BaseApp<Self>) -> Result<Self> {
        let mesh = asset_loader::load_file(SCENE_PATH)?;
        let scene = SceneRenderer::new(base, &mesh, SHADER)?;

        Ok(Self { scene })
    }

    fn render(&mut self, base: &mut BaseApp<Self>) -> Result<()> {
        self.scene.render(base)
    }

    fn destroy(self, base: &mut BaseApp<Self>) -> Result<()> {
        self.scene.destroy(base)
    }
}
