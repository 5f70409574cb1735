use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::frame_ctx::deletion::DeletionTasks;
use crate::renderer::contexts::frame_ctx::frame::FrameContext;
use crate::renderer::contexts::pipeline_ctx::shader_library::{ShaderId, ShaderLibrary};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayout;
use crate::renderer::resources::pipeline::{
    check_recreatable, create_shader_modules, Pipeline, PipelineLayout, PipelineLayoutBuilder,
};
use crate::renderer::resources::vertex::VertexInputDescription;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// Transparent geometry must be drawn after the opaque pass.
    Alpha,
    Additive,
}

impl BlendMode {
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);

        match self {
            Self::Disabled => state.blend_enable(false),
            Self::Alpha => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
            Self::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::DST_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// Owned description of a graphics pipeline.
///
/// Kept alive inside the built [`GraphicsPipeline`] so recreation can replay it with fresh
/// bytecode.
#[derive(Clone)]
pub struct GraphicsPipelineBuilder {
    shaders: Vec<ShaderId>,
    vertex_input: VertexInputDescription,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    line_width: f32,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend: BlendMode,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    samples: vk::SampleCountFlags,
    color_attachment_count: Option<u32>,
    layout: PipelineLayoutBuilder,
}

impl GraphicsPipelineBuilder {
    pub fn new() -> Self {
        Self {
            shaders: Vec::new(),
            vertex_input: VertexInputDescription::empty(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            blend: BlendMode::Disabled,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            // 1 sample per pixel means no multisampling
            samples: vk::SampleCountFlags::TYPE_1,
            color_attachment_count: None,
            layout: PipelineLayoutBuilder::new(),
        }
    }

    pub fn with_shader(mut self, shader: ShaderId) -> Self {
        self.shaders.push(shader);
        self
    }

    pub fn with_vertex_input(mut self, description: VertexInputDescription) -> Self {
        self.vertex_input = description;
        self
    }

    pub fn with_input_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn with_line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }

    pub fn with_cull_mode(
        mut self,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn with_blending(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_blending_disabled(self) -> Self {
        self.with_blending(BlendMode::Disabled)
    }

    pub fn with_alpha_blending_enabled(self) -> Self {
        self.with_blending(BlendMode::Alpha)
    }

    pub fn with_additive_blending_enabled(self) -> Self {
        self.with_blending(BlendMode::Additive)
    }

    /// Disabling the test also disables depth writes.
    pub fn with_depth_test(mut self, enable: bool, compare: Option<vk::CompareOp>) -> Self {
        self.depth_test = enable;
        self.depth_write = enable;
        self.depth_compare = if enable {
            compare.unwrap_or(vk::CompareOp::LESS_OR_EQUAL)
        } else {
            vk::CompareOp::ALWAYS
        };
        self
    }

    pub fn with_depth_write(mut self, enable: bool) -> Self {
        self.depth_write = enable;
        self
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Defaults to the number of color attachments of the subpass the pipeline is built for.
    pub fn with_color_attachment_count(mut self, count: u32) -> Self {
        self.color_attachment_count = Some(count);
        self
    }

    pub fn with_set_layout(mut self, layout: Arc<DescriptorSetLayout>) -> Self {
        self.layout = self.layout.with_set_layout(layout);
        self
    }

    pub fn with_push_constants<T: Pod>(mut self, stages: vk::ShaderStageFlags) -> Self {
        self.layout = self.layout.with_push_constants::<T>(stages);
        self
    }

    pub fn with_pipeline_layout(mut self, layout: PipelineLayoutBuilder) -> Self {
        self.layout = layout;
        self
    }

    pub fn shaders(&self) -> &[ShaderId] {
        &self.shaders
    }

    pub fn blend(&self) -> BlendMode {
        self.blend
    }

    pub fn color_attachment_count(&self) -> Option<u32> {
        self.color_attachment_count
    }

    pub fn layout(&self) -> &PipelineLayoutBuilder {
        &self.layout
    }

    pub fn depth_stencil_state(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
    }

    pub fn rasterization_state(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(self.line_width)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
    }

    /// Builds the pipeline for `subpass` of `render_pass`, consuming the description.
    pub fn build(
        self,
        ctx: &RenderContext,
        library: &ShaderLibrary,
        render_pass: vk::RenderPass,
        subpass: u32,
    ) -> Result<GraphicsPipeline> {
        let layout = self.layout.build(ctx.device.clone())?;
        let raw = self.create_raw(&ctx.device, library, &layout, render_pass, subpass)?;

        Ok(GraphicsPipeline {
            pipeline: Pipeline::new(raw, layout, vk::PipelineBindPoint::GRAPHICS, ctx.device.clone()),
            description: self,
            render_pass,
            subpass,
            outdated: false,
        })
    }

    fn create_raw(
        &self,
        device: &Arc<ash::Device>,
        library: &ShaderLibrary,
        layout: &PipelineLayout,
        render_pass: vk::RenderPass,
        subpass: u32,
    ) -> Result<vk::Pipeline> {
        if self.shaders.is_empty() {
            return Err(eyre!("No shader provided for GraphicsPipelineBuilder"));
        }

        let modules = create_shader_modules(device, library, &self.shaders)?;
        let shader_stages: Vec<_> = modules
            .iter()
            .map(|module| module.stage_info())
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_input.bindings)
            .vertex_attribute_descriptions(&self.vertex_input.attributes)
            .flags(self.vertex_input.flags);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);
        let rasterization = self.rasterization_state();
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(self.samples)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);
        let depth_stencil = self.depth_stencil_state();

        let blend_attachments =
            vec![self.blend.attachment_state(); self.color_attachment_count.unwrap_or(1) as usize];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        // Viewport and scissor are set per draw context
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(layout.raw())
            .render_pass(render_pass)
            .subpass(subpass)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_info);

        let pipeline = unsafe {
            match device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => Ok(pipelines),
                Err(_) => Err(eyre!("Failed to create graphics pipeline for subpass {}", subpass)),
            }
        }?[0];

        Ok(pipeline)
    }
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A graphics pipeline bound to one subpass of a render pass.
pub struct GraphicsPipeline {
    pipeline: Pipeline,
    description: GraphicsPipelineBuilder,
    render_pass: vk::RenderPass,
    subpass: u32,
    outdated: bool,
}

impl GraphicsPipeline {
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn description(&self) -> &GraphicsPipelineBuilder {
        &self.description
    }

    pub fn subpass(&self) -> u32 {
        self.subpass
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        self.pipeline.bind(command_buffer);
    }

    pub fn is_outdated(&self) -> bool {
        self.outdated
    }

    /// Whether any stage holds bytecode this pipeline was not built from.
    pub fn needs_rebuild(&self, library: &ShaderLibrary) -> bool {
        !self.outdated && library.needs_rebuild(&self.description.shaders)
    }

    /// Derives a new pipeline from this one's description and the library's current bytecode.
    ///
    /// On success this pipeline is marked outdated and can no longer serve as a base.
    pub fn recreate(&mut self, ctx: &RenderContext, library: &ShaderLibrary) -> Result<Self> {
        check_recreatable(self.outdated, library, &self.description.shaders)?;

        let fresh = self.rebuild(ctx, library)?;
        self.outdated = true;
        Ok(fresh)
    }

    /// Creates the replacement without validating shader state or touching this pipeline.
    pub(crate) fn rebuild(&self, ctx: &RenderContext, library: &ShaderLibrary) -> Result<Self> {
        let layout = self.pipeline.layout().clone();
        let raw = self.description.create_raw(
            &ctx.device,
            library,
            &layout,
            self.render_pass,
            self.subpass,
        )?;

        log::debug!("Recreated graphics pipeline for subpass {}", self.subpass);

        Ok(Self {
            pipeline: Pipeline::new(raw, layout, vk::PipelineBindPoint::GRAPHICS, ctx.device.clone()),
            description: self.description.clone(),
            render_pass: self.render_pass,
            subpass: self.subpass,
            outdated: false,
        })
    }

    /// Swaps in a recreated pipeline. The replaced one is destroyed once `frame`'s ring slot
    /// comes around again. On error the current pipeline stays in place.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_modes_produce_expected_factors() {
        let disabled = BlendMode::Disabled.attachment_state();
        assert_eq!(disabled.blend_enable, vk::FALSE);
        assert_eq!(disabled.color_write_mask, vk::ColorComponentFlags::RGBA);

        let alpha = BlendMode::Alpha.attachment_state();
        assert_eq!(alpha.blend_enable, vk::TRUE);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);

        let additive = BlendMode::Additive.attachment_state();
        assert_eq!(additive.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::DST_ALPHA);
    }

    #[test]
    fn disabling_depth_test_disables_writes() {
        let builder = GraphicsPipelineBuilder::new().with_depth_test(false, None);
        let state = builder.depth_stencil_state();
        assert_eq!(state.depth_test_enable, vk::FALSE);
        assert_eq!(state.depth_write_enable, vk::FALSE);
        assert_eq!(state.depth_compare_op, vk::CompareOp::ALWAYS);

        let state = GraphicsPipelineBuilder::new()
            .with_depth_test(true, Some(vk::CompareOp::GREATER))
            .with_depth_write(false)
            .depth_stencil_state();
        assert_eq!(state.depth_test_enable, vk::TRUE);
        assert_eq!(state.depth_write_enable, vk::FALSE);
        assert_eq!(state.depth_compare_op, vk::CompareOp::GREATER);
    }

    #[test]
    fn fixed_function_state_is_kept_in_description() {
        let builder = GraphicsPipelineBuilder::new()
            .with_polygon_mode(vk::PolygonMode::LINE)
            .with_line_width(2.0)
            .with_cull_mode(vk::CullModeFlags::BACK, vk::FrontFace::COUNTER_CLOCKWISE)
            .with_alpha_blending_enabled();

        let described = builder.clone();
        let rasterization = described.rasterization_state();
        assert_eq!(rasterization.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(rasterization.line_width, 2.0);
        assert_eq!(rasterization.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(described.blend(), BlendMode::Alpha);
        assert_eq!(described.color_attachment_count(), None);
    }
}
