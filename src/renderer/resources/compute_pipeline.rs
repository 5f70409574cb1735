use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::frame_ctx::deletion::DeletionTasks;
use crate::renderer::contexts::frame_ctx::frame::FrameContext;
use crate::renderer::contexts::pipeline_ctx::shader_library::{ShaderId, ShaderLibrary};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayout;
use crate::renderer::resources::pipeline::{
    check_recreatable, Pipeline, PipelineLayout, PipelineLayoutBuilder,
};

#[derive(Clone, Default)]
pub struct ComputePipelineBuilder {
    shader: Option<ShaderId>,
    layout: PipelineLayoutBuilder,
}

impl ComputePipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shader(mut self, shader: ShaderId) -> Self {
        let _ = self.shader.replace(shader);
        self
    }

    pub fn with_set_layout(mut self, layout: Arc<DescriptorSetLayout>) -> Self {
        self.layout = self.layout.with_set_layout(layout);
        self
    }

    pub fn with_push_constants<T: Pod>(mut self) -> Self {
        self.layout = self.layout.with_push_constants::<T>(vk::ShaderStageFlags::COMPUTE);
        self
    }

    pub fn with_pipeline_layout(mut self, layout: PipelineLayoutBuilder) -> Self {
        self.layout = layout;
        self
    }

    pub fn build(self, ctx: &RenderContext, library: &ShaderLibrary) -> Result<ComputePipeline> {
        let layout = self.layout.build(ctx.device.clone())?;
        let raw = self.create_raw(&ctx.device, library, &layout)?;

        Ok(ComputePipeline {
            pipeline: Pipeline::new(raw, layout, vk::PipelineBindPoint::COMPUTE, ctx.device.clone()),
            description: self,
            outdated: false,
        })
    }

    fn shaders(&self) -> &[ShaderId] {
        self.shader.as_slice()
    }

    fn create_raw(
        &self,
        device: &Arc<ash::Device>,
        library: &ShaderLibrary,
        layout: &PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let shader = self
            .shader
            .ok_or_eyre("No shader provided for ComputePipelineBuilder")?;
        let source = library.get(shader)?;
        let module = source.create_module(device.clone())?;

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .layout(layout.raw())
            .stage(module.stage_info());
        let pipeline = unsafe {
            match device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => Ok(pipelines),
                Err(_) => Err(eyre!("Failed to create compute pipeline '{}'", source.name())),
            }
        }?[0];

        Ok(pipeline)
    }
}

pub struct ComputePipeline {
    pipeline: Pipeline,
    description: ComputePipelineBuilder,
    outdated: bool,
}

impl ComputePipeline {
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        self.pipeline.bind(command_buffer);
    }

    pub fn dispatch(&self, command_buffer: vk::CommandBuffer, groups: [u32; 3]) {
        unsafe {
            self.pipeline.device().cmd_dispatch(command_buffer, groups[0], groups[1], groups[2]);
        }
    }

    pub fn is_outdated(&self) -> bool {
        self.outdated
    }

    pub fn needs_rebuild(&self, library: &ShaderLibrary) -> bool {
        !self.outdated && library.needs_rebuild(self.description.shaders())
    }

    pub fn recreate(&mut self, ctx: &RenderContext, library: &ShaderLibrary) -> Result<Self> {
        check_recreatable(self.outdated, library, self.description.shaders())?;

        let layout = self.pipeline.layout().clone();
        let raw = self.description.create_raw(&ctx.device, library, &layout)?;
        self.outdated = true;

        log::debug!("Recreated compute pipeline");

        Ok(Self {
            pipeline: Pipeline::new(raw, layout, vk::PipelineBindPoint::COMPUTE, ctx.device.clone()),
            description: self.description.clone(),
            outdated: false,
        })
    }

    pub fn recreate_pipeline(
        &mut self,
        ctx: &RenderContext,
        library: &ShaderLibrary,
        deletion_tasks: &mut DeletionTasks,
        frame: &FrameContext,
    ) -> Result<()> {
        let fresh = self.recreate(ctx, library)?;
        let retired = std::mem::replace(self, fresh);
        deletion_tasks.retire(retired, frame);
        Ok(())
    }
}

/// Number of workgroups needed to cover `extent` with `local_size` invocations per group.
pub fn dispatch_size(extent: [u32; 3], local_size: [u32; 3]) -> [u32; 3] {
    std::array::from_fn(|i| extent[i].div_ceil(local_size[i].max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_size_rounds_up() {
        assert_eq!(dispatch_size([1920, 1080, 1], [16, 16, 1]), [120, 68, 1]);
        assert_eq!(dispatch_size([1, 1, 1], [64, 1, 1]), [1, 1, 1]);
        assert_eq!(dispatch_size([0, 7, 1], [8, 0, 1]), [0, 7, 1]);
    }

    #[test]
    fn push_constants_target_the_compute_stage() {
        let builder = ComputePipelineBuilder::new().with_push_constants::<[u32; 4]>();
        let ranges = builder.layout.push_constant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::COMPUTE);
        assert!(builder.shaders().is_empty());
    }
}
