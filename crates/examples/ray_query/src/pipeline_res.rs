use crate::{AS_BIND, INDEX_BIND, OUTPUT_BIND, VERTEX_BIND};
use app::anyhow::Result;
use app::load_spv;
use app::vulkan::ash::vk;
use app::vulkan::{
    BindingLayout, BindingType, ComputePipeline, ComputePipelineCreateInfo, Context,
    PipelineLayout, ResourceBinder,
};

pub struct PipelineRes {
    pub pipeline: ComputePipeline,
    pub pipeline_layout: PipelineLayout,
    pub binder: ResourceBinder,
}

/// Output image, scene TLAS, vertex and index buffers, all read by the
/// compute stage.
pub fn binding_layout() -> Result<BindingLayout> {
    let stage = vk::ShaderStageFlags::COMPUTE;

    let mut layout = BindingLayout::new();
    layout
        .declare_binding(OUTPUT_BIND, BindingType::StorageBuffer, stage)?
        .declare_binding(AS_BIND, BindingType::AccelerationStructure, stage)?
        .declare_binding(VERTEX_BIND, BindingType::StorageBuffer, stage)?
        .declare_binding(INDEX_BIND, BindingType::StorageBuffer, stage)?;

    Ok(layout)
}

pub fn create_pipeline(context: &Context, shader: &str) -> Result<PipelineRes> {
    let binder = binding_layout()?.finalize(context)?;
    let pipeline_layout = context.create_pipeline_layout_for(&binder)?;

    let shader_source = load_spv(shader)?;
    let pipeline = context.create_compute_pipeline(
        &pipeline_layout,
        ComputePipelineCreateInfo::new(&shader_source),
    )?;

    Ok(PipelineRes {
        pipeline,
        pipeline_layout,
        binder,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_the_shader_interface() {
        let layout = binding_layout().unwrap();

        assert_eq!(layout.binding_type(0), Some(BindingType::StorageBuffer));
        assert_eq!(layout.binding_type(1), Some(BindingType::AccelerationStructure));
        assert_eq!(layout.binding_type(2), Some(BindingType::StorageBuffer));
        assert_eq!(layout.binding_type(3), Some(BindingType::StorageBuffer));
        assert_eq!(layout.binding_type(4), None);
    }
}
