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

pub const RAY_TRACING_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::ANY_HIT_KHR.as_raw()
        | vk::ShaderStageFlags::INTERSECTION_KHR.as_raw()
        | vk::ShaderStageFlags::CALLABLE_KHR.as_raw(),
);

/// Closest-hit, any-hit and intersection stages evaluated for one geometry type.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct HitGroup {
    pub closest_hit: Option<ShaderId>,
    pub any_hit: Option<ShaderId>,
    /// Present for procedural geometry only.
    pub intersection: Option<ShaderId>,
}

/// Shader group counts, in the order the groups appear in the pipeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ShaderGroupCounts {
    pub raygen: u32,
    pub miss: u32,
    pub hit: u32,
}

impl ShaderGroupCounts {
    pub fn total(&self) -> u32 {
        self.raygen + self.miss + self.hit
    }
}

#[derive(Clone)]
pub struct RayTracingPipelineBuilder {
    raygen: Option<ShaderId>,
    miss: Vec<ShaderId>,
    hit_groups: Vec<HitGroup>,
    max_recursion_depth: u32,
    layout: PipelineLayoutBuilder,
}

impl RayTracingPipelineBuilder {
    pub fn new() -> Self {
        Self {
            raygen: None,
            miss: Vec::new(),
            hit_groups: Vec::new(),
            max_recursion_depth: 1,
            layout: PipelineLayoutBuilder::new(),
        }
    }

    pub fn with_raygen(mut self, shader: ShaderId) -> Self {
        let _ = self.raygen.replace(shader);
        self
    }

    pub fn with_miss(mut self, shader: ShaderId) -> Self {
        self.miss.push(shader);
        self
    }

    pub fn with_hit_group(mut self, group: HitGroup) -> Self {
        self.hit_groups.push(group);
        self
    }

    /// Only sizes the ray stack. Shaders still have to track their own recursion depth.
    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_set_layout(mut self, layout: Arc<DescriptorSetLayout>) -> Self {
        self.layout = self.layout.with_set_layout(layout);
        self
    }

    pub fn with_push_constants<T: Pod>(mut self) -> Self {
        self.layout = self.layout.with_push_constants::<T>(RAY_TRACING_STAGES);
        self
    }

    pub fn with_pipeline_layout(mut self, layout: PipelineLayoutBuilder) -> Self {
        self.layout = layout;
        self
    }

    pub fn group_counts(&self) -> ShaderGroupCounts {
        ShaderGroupCounts {
            raygen: self.raygen.is_some() as u32,
            miss: self.miss.len() as u32,
            hit: self.hit_groups.len() as u32,
        }
    }

    /// Flattens the groups into a stage list plus group records indexing into it.
    ///
    /// Stages are ordered raygen, miss, then each hit group's closest-hit, any-hit and
    /// intersection stages.
    pub fn shader_groups(&self) -> (Vec<ShaderId>, Vec<vk::RayTracingShaderGroupCreateInfoKHR<'static>>) {
        let mut stages = Vec::new();
        let mut groups = Vec::new();

        let general = |stage: u32| {
            vk::RayTracingShaderGroupCreateInfoKHR::default()
                .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                .general_shader(stage)
                .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
        };

        for shader in self.raygen.iter().chain(&self.miss) {
            groups.push(general(stages.len() as u32));
            stages.push(*shader);
        }

        for hit_group in &self.hit_groups {
            let mut push = |shader: Option<ShaderId>| match shader {
                Some(shader) => {
                    stages.push(shader);
                    stages.len() as u32 - 1
                }
                None => vk::SHADER_UNUSED_KHR,
            };
            let closest_hit = push(hit_group.closest_hit);
            let any_hit = push(hit_group.any_hit);
            let intersection = push(hit_group.intersection);

            let ty = if hit_group.intersection.is_some() {
                vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP
            } else {
                vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP
            };
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .ty(ty)
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(closest_hit)
                    .any_hit_shader(any_hit)
                    .intersection_shader(intersection),
            );
        }

        (stages, groups)
    }

    pub fn build(self, ctx: &RenderContext, library: &ShaderLibrary) -> Result<RayTracingPipeline> {
        let loader = ctx.ray_tracing_pipeline()?.clone();
        let layout = self.layout.build(ctx.device.clone())?;
        let raw = self.create_raw(&ctx.device, &loader, library, &layout)?;

        Ok(RayTracingPipeline {
            pipeline: Pipeline::new(raw, layout, vk::PipelineBindPoint::RAY_TRACING_KHR, ctx.device.clone()),
            description: self,
            loader,
            outdated: false,
        })
    }

    fn create_raw(
        &self,
        device: &Arc<ash::Device>,
        loader: &ash::khr::ray_tracing_pipeline::Device,
        library: &ShaderLibrary,
        layout: &PipelineLayout,
    ) -> Result<vk::Pipeline> {
        if self.raygen.is_none() {
            return Err(eyre!("No raygen shader provided for RayTracingPipelineBuilder"));
        }

        let (stage_ids, groups) = self.shader_groups();
        let modules = create_shader_modules(device, library, &stage_ids)?;
        let stages: Vec<_> = modules
            .iter()
            .map(|module| module.stage_info())
            .collect();

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .layout(layout.raw())
            .max_pipeline_ray_recursion_depth(self.max_recursion_depth);

        let pipeline = unsafe {
            match loader.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            ) {
                Ok(pipelines) => Ok(pipelines),
                Err(_) => Err(eyre!("Failed to create ray tracing pipeline")),
            }
        }?[0];

        Ok(pipeline)
    }

    fn shaders(&self) -> Vec<ShaderId> {
        self.shader_groups().0
    }
}

impl Default for RayTracingPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RayTracingPipeline {
    pipeline: Pipeline,
    description: RayTracingPipelineBuilder,
    loader: ash::khr::ray_tracing_pipeline::Device,
    outdated: bool,
}

impl RayTracingPipeline {
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn group_counts(&self) -> ShaderGroupCounts {
        self.description.group_counts()
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        self.pipeline.bind(command_buffer);
    }

    /// Opaque group handles for building a shader binding table, `handle_size` bytes each.
    pub fn shader_group_handles(&self, handle_size: u32) -> Result<Vec<u8>> {
        let group_count = self.group_counts().total();
        let handles = unsafe {
            self.loader.get_ray_tracing_shader_group_handles(
                self.pipeline.raw(),
                0,
                group_count,
                (group_count * handle_size) as usize,
            )?
        };
        Ok(handles)
    }

    pub fn is_outdated(&self) -> bool {
        self.outdated
    }

    pub fn needs_rebuild(&self, library: &ShaderLibrary) -> bool {
        !self.outdated && library.needs_rebuild(&self.description.shaders())
    }

    pub fn recreate(&mut self, ctx: &RenderContext, library: &ShaderLibrary) -> Result<Self> {
        check_recreatable(self.outdated, library, &self.description.shaders())?;

        let layout = self.pipeline.layout().clone();
        let raw = self.description.create_raw(&ctx.device, &self.loader, library, &layout)?;
        self.outdated = true;

        log::debug!("Recreated ray tracing pipeline");

        Ok(Self {
            pipeline: Pipeline::new(raw, layout, vk::PipelineBindPoint::RAY_TRACING_KHR, ctx.device.clone()),
            description: self.description.clone(),
            loader: self.loader.clone(),
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

#[cfg(test)]
mod tests {
    use crate::renderer::contexts::pipeline_ctx::compiler::mock::ScriptedCompiler;
    use crate::renderer::resources::shader::ShaderOrigin;
    use super::*;

    fn library_with(names: &[&str]) -> (ShaderLibrary, Vec<ShaderId>) {
        let mut library = ShaderLibrary::new(ScriptedCompiler::default());
        let ids = names
            .iter()
            .map(|name| {
                library
                    .add(*name, ShaderOrigin::Memory(name.as_bytes().to_vec()), vk::ShaderStageFlags::RAYGEN_KHR)
                    .unwrap()
            })
            .collect();
        (library, ids)
    }

    #[test]
    fn groups_index_into_flattened_stages() {
        let (_library, ids) = library_with(&["gen", "miss", "shadow", "chit", "ahit", "sphere.rint", "sphere.rchit"]);
        let builder = RayTracingPipelineBuilder::new()
            .with_raygen(ids[0])
            .with_miss(ids[1])
            .with_miss(ids[2])
            .with_hit_group(HitGroup {
                closest_hit: Some(ids[3]),
                any_hit: Some(ids[4]),
                intersection: None,
            })
            .with_hit_group(HitGroup {
                closest_hit: Some(ids[6]),
                any_hit: None,
                intersection: Some(ids[5]),
            });

        let (stages, groups) = builder.shader_groups();
        assert_eq!(stages, vec![ids[0], ids[1], ids[2], ids[3], ids[4], ids[6], ids[5]]);
        assert_eq!(groups.len(), 5);
        assert_eq!(builder.group_counts(), ShaderGroupCounts { raygen: 1, miss: 2, hit: 2 });

        assert_eq!(groups[0].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[2].general_shader, 2);

        assert_eq!(groups[3].ty, vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP);
        assert_eq!(groups[3].closest_hit_shader, 3);
        assert_eq!(groups[3].any_hit_shader, 4);
        assert_eq!(groups[3].intersection_shader, vk::SHADER_UNUSED_KHR);

        assert_eq!(groups[4].ty, vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP);
        assert_eq!(groups[4].closest_hit_shader, 5);
        assert_eq!(groups[4].any_hit_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(groups[4].intersection_shader, 6);
    }

    #[test]
    fn defaults_to_single_bounce() {
        let builder = RayTracingPipelineBuilder::new();
        assert_eq!(builder.max_recursion_depth, 1);
        assert_eq!(builder.group_counts().total(), 0);
    }
}
