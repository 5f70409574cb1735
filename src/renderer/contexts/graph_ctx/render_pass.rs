use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::frame_ctx::deletion::DeletionTasks;
use crate::renderer::contexts::frame_ctx::frame::FrameContext;
use crate::renderer::contexts::graph_ctx::barrier::is_depth_format;
use crate::renderer::contexts::graph_ctx::draw::DrawContext;
use crate::renderer::contexts::pipeline_ctx::shader_library::{ShaderId, ShaderLibrary};
use crate::renderer::error::CoreError;
use crate::renderer::resources::graphics_pipeline::{GraphicsPipeline, GraphicsPipelineBuilder};
use crate::renderer::resources::pipeline::check_recreatable;

/// One render pass attachment. Always cleared on load.
#[derive(Clone, Copy)]
pub struct Attachment {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub clear_value: vk::ClearValue,
    /// The swapchain image. Only valid as attachment 0.
    pub is_presentation: bool,
    /// Contents are discarded when the pass ends.
    pub internal_only: bool,
}

impl Attachment {
    pub fn color(format: vk::Format, clear_color: [f32; 4]) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            },
            is_presentation: false,
            internal_only: false,
        }
    }

    pub fn presentation(format: vk::Format, clear_color: [f32; 4]) -> Self {
        Self {
            is_presentation: true,
            ..Self::color(format, clear_color)
        }
    }

    pub fn depth(format: vk::Format, clear_depth: f32) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear_depth,
                    stencil: 0,
                },
            },
            is_presentation: false,
            internal_only: false,
        }
    }

    pub fn internal(mut self) -> Self {
        self.internal_only = true;
        self
    }

    pub fn is_depth(&self) -> bool {
        is_depth_format(self.format)
    }

    pub fn final_layout(&self) -> vk::ImageLayout {
        if self.is_presentation {
            vk::ImageLayout::PRESENT_SRC_KHR
        } else if self.is_depth() {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        }
    }

    pub fn description(&self) -> vk::AttachmentDescription {
        let store_op = if self.internal_only {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        };

        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.final_layout())
    }
}

/// Attachments one subpass reads and writes, plus the pipeline it draws with.
#[derive(Clone)]
pub struct SubpassBuilder {
    color_attachments: Vec<u32>,
    depth_attachment: Option<u32>,
    input_attachments: Vec<u32>,
    pipeline: GraphicsPipelineBuilder,
}

impl SubpassBuilder {
    pub fn new(pipeline: GraphicsPipelineBuilder) -> Self {
        Self {
            color_attachments: Vec::new(),
            depth_attachment: None,
            input_attachments: Vec::new(),
            pipeline,
        }
    }

    pub fn with_color_attachment(mut self, attachment: u32) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth_attachment(mut self, attachment: u32) -> Self {
        let _ = self.depth_attachment.replace(attachment);
        self
    }

    pub fn with_input_attachment(mut self, attachment: u32) -> Self {
        self.input_attachments.push(attachment);
        self
    }
}

/// Attachment references of one compiled subpass.
#[derive(Debug, Clone, Default)]
pub struct SubpassReferences {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub input: Vec<vk::AttachmentReference>,
}

/// Everything `vkCreateRenderPass` needs, computed without touching the device.
#[derive(Debug, Clone)]
pub struct RenderPassLayout {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<SubpassReferences>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

const ATTACHMENT_WRITE_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

const ATTACHMENT_WRITE_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

pub fn compile_render_pass_layout(
    attachments: &[Attachment],
    subpasses: &[SubpassBuilder],
) -> Result<RenderPassLayout> {
    if subpasses.is_empty() {
        return Err(eyre!("A render pass needs at least one subpass"));
    }
    if attachments.iter().skip(1).any(|attachment| attachment.is_presentation) {
        return Err(eyre!("Only attachment 0 can be the presentation surface"));
    }

    let reference = |index: u32, layout: vk::ImageLayout| -> Result<vk::AttachmentReference> {
        if index as usize >= attachments.len() {
            return Err(eyre!(
                "Subpass references attachment {} but only {} are declared",
                index,
                attachments.len(),
            ));
        }
        Ok(vk::AttachmentReference { attachment: index, layout })
    };

    let subpass_references = subpasses
        .iter()
        .map(|subpass| {
            let color = subpass.color_attachments
                .iter()
                .map(|index| reference(*index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect::<Result<Vec<_>>>()?;
            let depth = subpass.depth_attachment
                .map(|index| reference(index, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL))
                .transpose()?;
            let input = subpass.input_attachments
                .iter()
                .map(|index| {
                    let is_depth = attachments
                        .get(*index as usize)
                        .is_some_and(Attachment::is_depth);
                    let layout = if is_depth {
                        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    };
                    reference(*index, layout)
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(SubpassReferences { color, depth, input })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut dependencies = vec![
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(ATTACHMENT_WRITE_STAGES)
            .dst_stage_mask(ATTACHMENT_WRITE_STAGES)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(ATTACHMENT_WRITE_ACCESS),
    ];
    for subpass in 1..subpasses.len() as u32 {
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(subpass - 1)
                .dst_subpass(subpass)
                .src_stage_mask(ATTACHMENT_WRITE_STAGES)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER | ATTACHMENT_WRITE_STAGES)
                .src_access_mask(ATTACHMENT_WRITE_ACCESS)
                .dst_access_mask(
                    vk::AccessFlags::INPUT_ATTACHMENT_READ
                        | vk::AccessFlags::SHADER_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | ATTACHMENT_WRITE_ACCESS,
                )
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        );
    }

    Ok(RenderPassLayout {
        attachments: attachments.iter().map(Attachment::description).collect(),
        subpasses: subpass_references,
        dependencies,
    })
}

/// Image views a render pass renders into.
#[derive(Debug, Clone)]
pub struct RenderTargets {
    pub extent: vk::Extent2D,
    /// One view per swapchain image, used for attachment 0 when it is the presentation surface.
    pub swapchain_views: Vec<vk::ImageView>,
    /// One entry per attachment. The presentation attachment's entry is ignored.
    pub attachment_views: Vec<Option<vk::ImageView>>,
}

/// Attachment views of every framebuffer: one per swapchain image when attachment 0 is the
/// presentation surface, otherwise a single fixed framebuffer.
pub fn framebuffer_views(
    attachments: &[Attachment],
    targets: &RenderTargets,
) -> Result<Vec<Vec<vk::ImageView>>> {
    let presents = attachments.first().is_some_and(|attachment| attachment.is_presentation);

    let fixed_view = |index: usize| -> Result<vk::ImageView> {
        targets.attachment_views
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| eyre!("No image view provided for attachment {}", index))
    };

    if !presents {
        let views = (0..attachments.len())
            .map(fixed_view)
            .collect::<Result<Vec<_>>>()?;
        return Ok(vec![views]);
    }

    if targets.swapchain_views.is_empty() {
        return Err(eyre!("Presentation attachment declared without swapchain views"));
    }
    targets.swapchain_views
        .iter()
        .map(|swapchain_view| {
            std::iter::once(Ok(*swapchain_view))
                .chain((1..attachments.len()).map(fixed_view))
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// Subpasses whose pipelines must be rebuilt, given each pipeline's outdated flag and stages.
///
/// Every pipeline is checked before any index is returned, so a compile error in one subpass
/// blocks the rebuild of the whole pass.
pub fn plan_pipeline_rebuild(
    library: &ShaderLibrary,
    pipelines: &[(bool, &[ShaderId])],
) -> Result<Vec<usize>, CoreError> {
    for (outdated, shaders) in pipelines {
        check_recreatable(*outdated, library, shaders)?;
    }

    Ok(pipelines
        .iter()
        .enumerate()
        .filter(|(_, (_, shaders))| library.needs_rebuild(shaders))
        .map(|(subpass, _)| subpass)
        .collect())
}

pub fn check_handler_count(expected: usize, actual: usize) -> Result<(), CoreError> {
    if expected != actual {
        return Err(CoreError::SubpassHandlerCount { expected, actual });
    }
    Ok(())
}

/// Per-subpass recording hooks driven by [`RenderPass::execute`].
pub trait SubpassHandler {
    /// Called once after the render pass has been compiled.
    fn register_subpass(&mut self, subpass: u32, pipeline: &GraphicsPipeline) -> Result<()>;

    /// Records the subpass's draws. The subpass pipeline is already bound.
    fn begin_subpass(&mut self, frame: &FrameContext, draw: &mut DrawContext<'_>) -> Result<()>;
}

/// A compiled multi-subpass render pass with one pipeline per subpass and its framebuffers.
pub struct RenderPass {
    raw: vk::RenderPass,
    attachments: Vec<Attachment>,
    pipelines: Vec<GraphicsPipeline>,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    device: Arc<ash::Device>,
}

impl RenderPass {
    pub fn new(
        ctx: &RenderContext,
        library: &ShaderLibrary,
        attachments: Vec<Attachment>,
        subpasses: Vec<SubpassBuilder>,
        targets: &RenderTargets,
    ) -> Result<Self> {
        let layout = compile_render_pass_layout(&attachments, &subpasses)?;

        let subpass_descriptions: Vec<vk::SubpassDescription> = layout.subpasses
            .iter()
            .map(|references| {
                let description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&references.color)
                    .input_attachments(&references.input);
                match &references.depth {
                    Some(depth) => description.depth_stencil_attachment(depth),
                    None => description,
                }
            })
            .collect();

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&layout.attachments)
            .subpasses(&subpass_descriptions)
            .dependencies(&layout.dependencies);
        let raw = unsafe {
            ctx.device.create_render_pass(&render_pass_info, None)?
        };

        let mut render_pass = Self {
            raw,
            attachments,
            pipelines: Vec::with_capacity(subpasses.len()),
            framebuffers: Vec::new(),
            extent: targets.extent,
            device: ctx.device.clone(),
        };

        for (index, subpass) in subpasses.into_iter().enumerate() {
            let builder = match subpass.pipeline.color_attachment_count() {
                Some(_) => subpass.pipeline,
                None => subpass.pipeline
                    .with_color_attachment_count(subpass.color_attachments.len() as u32),
            };
            let pipeline = builder.build(ctx, library, raw, index as u32)?;
            render_pass.pipelines.push(pipeline);
        }

        render_pass.create_framebuffers(targets)?;

        log::info!(
            "Compiled render pass: {} attachment(s), {} subpass(es), {} framebuffer(s)",
            render_pass.attachments.len(),
            render_pass.pipelines.len(),
            render_pass.framebuffers.len(),
        );

        Ok(render_pass)
    }

    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    pub fn subpass_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn pipeline(&self, subpass: usize) -> Option<&GraphicsPipeline> {
        self.pipelines.get(subpass)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Rebuilds the framebuffers for new targets, e.g. after a swapchain resize.
    /// The caller must ensure no submitted work still uses the old ones.
    pub fn recreate_framebuffers(&mut self, targets: &RenderTargets) -> Result<()> {
        self.destroy_framebuffers();
        self.extent = targets.extent;
        self.create_framebuffers(targets)
    }

    /// Recreates every subpass pipeline whose shaders changed. Returns how many were rebuilt.
    ///
    /// Either every stale pipeline is replaced or none is. Replaced pipelines are destroyed
    /// once `frame`'s ring slot comes around again.
    pub fn recreate_pipelines(
        &mut self,
        ctx: &RenderContext,
        library: &ShaderLibrary,
        deletion_tasks: &mut DeletionTasks,
        frame: &FrameContext,
    ) -> Result<usize> {
        let stages: Vec<(bool, &[ShaderId])> = self.pipelines
            .iter()
            .map(|pipeline| (pipeline.is_outdated(), pipeline.description().shaders()))
            .collect();
        let subpasses = plan_pipeline_rebuild(library, &stages)?;

        let fresh = subpasses
            .iter()
            .map(|subpass| self.pipelines[*subpass].rebuild(ctx, library))
            .collect::<Result<Vec<_>>>()?;

        let rebuilt = fresh.len();
        for (subpass, pipeline) in subpasses.into_iter().zip(fresh) {
            let retired = std::mem::replace(&mut self.pipelines[subpass], pipeline);
            deletion_tasks.retire(retired, frame);
        }
        Ok(rebuilt)
    }

    pub fn register_handlers(&self, handlers: &mut [Box<dyn SubpassHandler>]) -> Result<()> {
        check_handler_count(self.pipelines.len(), handlers.len())?;
        for (index, (handler, pipeline)) in handlers.iter_mut().zip(&self.pipelines).enumerate() {
            handler.register_subpass(index as u32, pipeline)?;
        }
        Ok(())
    }

    /// Begins the pass on `command_buffer` in subpass 0.
    pub fn begin(
        &self,
        command_buffer: vk::CommandBuffer,
        frame: &FrameContext,
    ) -> Result<ActiveRenderPass<'_>> {
        let presents = self.attachments.first().is_some_and(|attachment| attachment.is_presentation);
        let framebuffer_index = if presents {
            frame.swapchain_image_index as usize
        } else {
            0
        };
        let framebuffer = *self.framebuffers
            .get(framebuffer_index)
            .ok_or_eyre("No framebuffer for the current swapchain image")?;

        let clear_values: Vec<vk::ClearValue> = self.attachments
            .iter()
            .map(|attachment| attachment.clear_value)
            .collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.raw)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }

        Ok(ActiveRenderPass {
            render_pass: self,
            command_buffer,
            cursor: SubpassCursor::new(self.pipelines.len()),
        })
    }

    /// Records the whole pass, handing each subpass to its handler in order.
    pub fn execute(
        &self,
        command_buffer: vk::CommandBuffer,
        frame: &FrameContext,
        handlers: &mut [Box<dyn SubpassHandler>],
    ) -> Result<()> {
        check_handler_count(self.pipelines.len(), handlers.len())?;

        let mut active = self.begin(command_buffer, frame)?;
        for (index, handler) in handlers.iter_mut().enumerate() {
            if index > 0 {
                active.next_subpass()?;
            }
            let mut draw = active.draw_context()?;
            handler.begin_subpass(frame, &mut draw)?;
        }
        active.end()?;

        Ok(())
    }

    fn create_framebuffers(&mut self, targets: &RenderTargets) -> Result<()> {
        for views in framebuffer_views(&self.attachments, targets)? {
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.raw)
                .attachments(&views)
                .width(targets.extent.width)
                .height(targets.extent.height)
                .layers(1);
            let framebuffer = unsafe {
                self.device.create_framebuffer(&framebuffer_info, None)?
            };
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe {
            self.device.destroy_render_pass(self.raw, None);
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SubpassState {
    Subpass(usize),
    Ended,
}

/// Position inside a render pass. Never wraps around.
#[derive(Debug, Clone)]
pub struct SubpassCursor {
    state: SubpassState,
    count: usize,
}

impl SubpassCursor {
    pub fn new(count: usize) -> Self {
        Self {
            state: SubpassState::Subpass(0),
            count,
        }
    }

    pub fn state(&self) -> SubpassState {
        self.state
    }

    pub fn current(&self) -> Result<usize, CoreError> {
        match self.state {
            SubpassState::Subpass(index) => Ok(index),
            SubpassState::Ended => Err(CoreError::RenderPassEnded),
        }
    }

    pub fn advance(&mut self) -> Result<usize, CoreError> {
        let next = self.current()? + 1;
        if next >= self.count {
            return Err(CoreError::SubpassOutOfRange {
                requested: next,
                count: self.count,
            });
        }
        self.state = SubpassState::Subpass(next);
        Ok(next)
    }

    /// Number of subpasses left to step through before the pass can end.
    pub fn remaining(&self) -> usize {
        match self.state {
            SubpassState::Subpass(index) => self.count.saturating_sub(index + 1),
            SubpassState::Ended => 0,
        }
    }

    pub fn end(&mut self) -> Result<(), CoreError> {
        self.current()?;
        self.state = SubpassState::Ended;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.state == SubpassState::Ended
    }
}

/// A render pass being recorded. Ends the pass when dropped.
pub struct ActiveRenderPass<'a> {
    render_pass: &'a RenderPass,
    command_buffer: vk::CommandBuffer,
    cursor: SubpassCursor,
}

impl ActiveRenderPass<'_> {
    pub fn subpass_index(&self) -> Result<usize, CoreError> {
        self.cursor.current()
    }

    pub fn next_subpass(&mut self) -> Result<(), CoreError> {
        self.cursor.advance()?;
        unsafe {
            self.render_pass.device.cmd_next_subpass(self.command_buffer, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    /// Binds the current subpass's pipeline and returns a context to draw with it.
    pub fn draw_context(&self) -> Result<DrawContext<'_>, CoreError> {
        let index = self.cursor.current()?;
        let count = self.render_pass.pipelines.len();
        let pipeline = self.render_pass.pipelines
            .get(index)
            .ok_or(CoreError::SubpassOutOfRange { requested: index, count })?;

        Ok(DrawContext::new(
            &self.render_pass.device,
            self.command_buffer,
            pipeline,
            self.render_pass.extent,
        ))
    }

    /// Steps through any subpasses not yet visited, then ends the pass.
    pub fn end(mut self) -> Result<(), CoreError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), CoreError> {
        while self.cursor.remaining() > 0 {
            self.next_subpass()?;
        }
        self.cursor.end()?;
        unsafe {
            self.render_pass.device.cmd_end_render_pass(self.command_buffer);
        }
        Ok(())
    }
}

impl Drop for ActiveRenderPass<'_> {
    fn drop(&mut self) {
        if !self.cursor.is_ended() {
            if let Err(err) = self.finish() {
                log::error!("Failed to end render pass: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;
    use crate::renderer::contexts::pipeline_ctx::compiler::mock::ScriptedCompiler;
    use crate::renderer::resources::shader::ShaderOrigin;

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    fn deferred_attachments() -> Vec<Attachment> {
        vec![
            Attachment::presentation(vk::Format::B8G8R8A8_SRGB, [0.0; 4]),
            Attachment::color(vk::Format::R16G16B16A16_SFLOAT, [0.0; 4]).internal(),
            Attachment::depth(vk::Format::D32_SFLOAT, 1.0),
        ]
    }

    fn deferred_subpasses() -> Vec<SubpassBuilder> {
        vec![
            SubpassBuilder::new(GraphicsPipelineBuilder::new())
                .with_color_attachment(1)
                .with_depth_attachment(2),
            SubpassBuilder::new(GraphicsPipelineBuilder::new().with_depth_test(false, None))
                .with_color_attachment(0)
                .with_input_attachment(1),
        ]
    }

    #[test]
    fn two_subpass_cursor_advances_once() {
        let mut cursor = SubpassCursor::new(2);
        assert_eq!(cursor.current(), Ok(0));
        assert_eq!(cursor.advance(), Ok(1));
        assert_eq!(
            cursor.advance(),
            Err(CoreError::SubpassOutOfRange { requested: 2, count: 2 })
        );
        assert_eq!(cursor.current(), Ok(1));
        assert_eq!(cursor.remaining(), 0);

        cursor.end().unwrap();
        assert!(cursor.is_ended());
        assert_eq!(cursor.advance(), Err(CoreError::RenderPassEnded));
        assert_eq!(cursor.end(), Err(CoreError::RenderPassEnded));
    }

    #[test]
    fn single_subpass_cannot_advance() {
        let mut cursor = SubpassCursor::new(1);
        assert!(cursor.advance().is_err());
        assert_eq!(cursor.state(), SubpassState::Subpass(0));
    }

    #[test]
    fn attachment_final_layouts_follow_their_role() {
        let attachments = deferred_attachments();
        let present = attachments[0].description();
        assert_eq!(present.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(present.store_op, vk::AttachmentStoreOp::STORE);

        let gbuffer = attachments[1].description();
        assert_eq!(gbuffer.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(gbuffer.store_op, vk::AttachmentStoreOp::DONT_CARE);

        let depth = attachments[2].description();
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn layout_chains_subpasses_by_region() {
        let layout = compile_render_pass_layout(&deferred_attachments(), &deferred_subpasses()).unwrap();

        assert_eq!(layout.attachments.len(), 3);
        assert_eq!(layout.subpasses[0].color[0].attachment, 1);
        assert_eq!(layout.subpasses[0].depth.map(|depth| depth.attachment), Some(2));
        assert_eq!(layout.subpasses[1].input[0].layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        assert_eq!(layout.dependencies.len(), 2);
        assert_eq!(layout.dependencies[0].src_subpass, vk::SUBPASS_EXTERNAL);
        let chain = layout.dependencies[1];
        assert_eq!((chain.src_subpass, chain.dst_subpass), (0, 1));
        assert_eq!(chain.dependency_flags, vk::DependencyFlags::BY_REGION);
        assert!(chain.dst_access_mask.contains(vk::AccessFlags::INPUT_ATTACHMENT_READ));
    }

    #[test]
    fn layout_rejects_unknown_attachments() {
        let subpasses = vec![SubpassBuilder::new(GraphicsPipelineBuilder::new()).with_color_attachment(5)];
        assert!(compile_render_pass_layout(&deferred_attachments(), &subpasses).is_err());
        assert!(compile_render_pass_layout(&deferred_attachments(), &[]).is_err());

        let mut attachments = deferred_attachments();
        attachments[1].is_presentation = true;
        assert!(compile_render_pass_layout(&attachments, &deferred_subpasses()).is_err());
    }

    #[test]
    fn presentation_pass_gets_one_framebuffer_per_swapchain_image() {
        let targets = RenderTargets {
            extent: vk::Extent2D { width: 1280, height: 720 },
            swapchain_views: vec![view(10), view(11), view(12)],
            attachment_views: vec![None, Some(view(20)), Some(view(30))],
        };

        let framebuffers = framebuffer_views(&deferred_attachments(), &targets).unwrap();
        assert_eq!(framebuffers.len(), 3);
        assert_eq!(framebuffers[2], vec![view(12), view(20), view(30)]);
    }

    #[test]
    fn offscreen_pass_gets_one_fixed_framebuffer() {
        let attachments = vec![
            Attachment::color(vk::Format::R8G8B8A8_UNORM, [0.0; 4]),
            Attachment::depth(vk::Format::D32_SFLOAT, 1.0),
        ];
        let mut targets = RenderTargets {
            extent: vk::Extent2D { width: 256, height: 256 },
            swapchain_views: vec![view(10)],
            attachment_views: vec![Some(view(1)), Some(view(2))],
        };
        assert_eq!(framebuffer_views(&attachments, &targets).unwrap(), vec![vec![view(1), view(2)]]);

        targets.attachment_views.pop();
        assert!(framebuffer_views(&attachments, &targets).is_err());
    }

    #[test]
    fn compile_error_in_one_subpass_blocks_the_whole_rebuild() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut library = ShaderLibrary::new(ScriptedCompiler::default());
        let mut add = |name: &str, stage| {
            library
                .add(name, ShaderOrigin::Memory(b"v1".to_vec()), stage)
                .unwrap()
        };
        let gbuffer = [
            add("gbuffer.vert", vk::ShaderStageFlags::VERTEX),
            add("gbuffer.frag", vk::ShaderStageFlags::FRAGMENT),
        ];
        let lighting = [
            add("fullscreen.vert", vk::ShaderStageFlags::VERTEX),
            add("lighting.frag", vk::ShaderStageFlags::FRAGMENT),
        ];

        library.set_source(gbuffer[1], "v2").unwrap();
        library.set_source(lighting[1], "error").unwrap();
        library.recompile_stale_shaders();

        let stages: [(bool, &[ShaderId]); 2] = [(false, &gbuffer), (false, &lighting)];
        assert_eq!(
            plan_pipeline_rebuild(&library, &stages),
            Err(CoreError::ShaderCompileErrors { count: 1 })
        );

        library.set_source(lighting[1], "v3").unwrap();
        library.recompile_stale_shaders();
        assert_eq!(plan_pipeline_rebuild(&library, &stages), Ok(vec![0, 1]));

        let stages: [(bool, &[ShaderId]); 2] = [(false, &gbuffer), (true, &lighting)];
        assert_eq!(
            plan_pipeline_rebuild(&library, &stages),
            Err(CoreError::OutdatedPipeline)
        );

        library.mark_pipelines_rebuilt();
        let stages: [(bool, &[ShaderId]); 2] = [(false, &gbuffer), (false, &lighting)];
        assert_eq!(plan_pipeline_rebuild(&library, &stages), Ok(vec![]));
    }

    #[test]
    fn handler_count_must_match_subpasses() {
        assert!(check_handler_count(2, 2).is_ok());
        assert_eq!(
            check_handler_count(2, 1),
            Err(CoreError::SubpassHandlerCount { expected: 2, actual: 1 })
        );
    }
}
