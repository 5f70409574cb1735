use std::sync::Arc;
use ash::vk;
use bytemuck::Pod;
use color_eyre::Result;
use crate::renderer::contexts::pipeline_ctx::shader_library::{ShaderId, ShaderLibrary};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayout;
use crate::renderer::error::CoreError;
use crate::renderer::resources::shader::ShaderModule;

/// Set layouts and push constant ranges a pipeline layout is created from.
#[derive(Clone, Default)]
pub struct PipelineLayoutBuilder {
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the layout for the next set index.
    pub fn with_set_layout(mut self, layout: Arc<DescriptorSetLayout>) -> Self {
        self.set_layouts.push(layout);
        self
    }

    /// Adds a range for `T`, placed right after the previously declared ranges.
    pub fn with_push_constants<T: Pod>(mut self, stages: vk::ShaderStageFlags) -> Self {
        let offset = self.push_constant_size();
        self.push_constant_ranges.push(
            vk::PushConstantRange::default()
                .stage_flags(stages)
                .offset(offset)
                .size(size_of::<T>() as u32),
        );
        self
    }

    pub fn set_layouts(&self) -> &[Arc<DescriptorSetLayout>] {
        &self.set_layouts
    }

    pub fn push_constant_ranges(&self) -> &[vk::PushConstantRange] {
        &self.push_constant_ranges
    }

    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_ranges
            .iter()
            .map(|range| range.offset + range.size)
            .max()
            .unwrap_or(0)
    }

    pub fn build(&self, device: Arc<ash::Device>) -> Result<Arc<PipelineLayout>> {
        let raw_set_layouts: Vec<vk::DescriptorSetLayout> = self.set_layouts
            .iter()
            .map(|layout| layout.raw())
            .collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&raw_set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);
        let raw = unsafe {
            device.create_pipeline_layout(&layout_info, None)?
        };

        Ok(Arc::new(PipelineLayout {
            raw,
            set_layouts: self.set_layouts.clone(),
            push_constant_ranges: self.push_constant_ranges.clone(),
            device,
        }))
    }
}

pub struct PipelineLayout {
    raw: vk::PipelineLayout,
    set_layouts: Vec<Arc<DescriptorSetLayout>>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
    device: Arc<ash::Device>,
}

impl PipelineLayout {
    pub fn raw(&self) -> vk::PipelineLayout {
        self.raw
    }

    pub fn set_count(&self) -> usize {
        self.set_layouts.len()
    }

    /// Stages of every declared range overlapping `[offset, offset + size)`.
    pub fn push_constant_stages(&self, offset: u32, size: u32) -> vk::ShaderStageFlags {
        self.push_constant_ranges
            .iter()
            .filter(|range| range.offset < offset + size && offset < range.offset + range.size)
            .fold(vk::ShaderStageFlags::empty(), |stages, range| stages | range.stage_flags)
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.raw, None);
        }
    }
}

/// A native pipeline and the layout it was created with.
pub struct Pipeline {
    raw: vk::Pipeline,
    layout: Arc<PipelineLayout>,
    bind_point: vk::PipelineBindPoint,
    device: Arc<ash::Device>,
}

impl Pipeline {
    pub(crate) fn new(
        raw: vk::Pipeline,
        layout: Arc<PipelineLayout>,
        bind_point: vk::PipelineBindPoint,
        device: Arc<ash::Device>,
    ) -> Self {
        Self {
            raw,
            layout,
            bind_point,
            device,
        }
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(command_buffer, self.bind_point, self.raw);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                self.bind_point,
                self.layout.raw(),
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    pub fn push_constants<T: Pod>(&self, command_buffer: vk::CommandBuffer, offset: u32, data: &T) {
        let bytes = bytemuck::bytes_of(data);
        unsafe {
            self.device.cmd_push_constants(
                command_buffer,
                self.layout.raw(),
                self.layout.push_constant_stages(offset, bytes.len() as u32),
                offset,
                bytes,
            );
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.raw, None);
        }
    }
}

/// Whether a pipeline built from `shaders` may be recreated right now.
pub fn check_recreatable(
    outdated: bool,
    library: &ShaderLibrary,
    shaders: &[ShaderId],
) -> Result<(), CoreError> {
    if outdated {
        return Err(CoreError::OutdatedPipeline);
    }
    library.check_recreatable(shaders)
}

/// Creates a native module for every stage. Modules are destroyed when the returned vec drops.
pub(crate) fn create_shader_modules(
    device: &Arc<ash::Device>,
    library: &ShaderLibrary,
    shaders: &[ShaderId],
) -> Result<Vec<ShaderModule>> {
    shaders
        .iter()
        .map(|id| library.get(*id)?.create_module(device.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::renderer::contexts::pipeline_ctx::compiler::mock::ScriptedCompiler;
    use crate::renderer::resources::shader::ShaderOrigin;
    use super::*;

    #[repr(C)]
    #[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
    struct DrawConstants {
        object: u32,
        material: u32,
    }

    #[test]
    fn push_constant_ranges_are_packed_in_order() {
        let builder = PipelineLayoutBuilder::new()
            .with_push_constants::<DrawConstants>(vk::ShaderStageFlags::VERTEX)
            .with_push_constants::<[f32; 4]>(vk::ShaderStageFlags::FRAGMENT);

        let ranges = builder.push_constant_ranges();
        assert_eq!(ranges[0].offset, 0);
        assert_eq!(ranges[0].size, 8);
        assert_eq!(ranges[1].offset, 8);
        assert_eq!(ranges[1].size, 16);
        assert_eq!(builder.push_constant_size(), 24);
    }

    #[test]
    fn recreation_is_blocked_by_errors_and_outdated_pipelines() {
        let mut library = ShaderLibrary::new(ScriptedCompiler::default());
        let vert = library
            .add("mesh.vert", ShaderOrigin::Memory(b"v1".to_vec()), vk::ShaderStageFlags::VERTEX)
            .unwrap();
        let frag = library
            .add("mesh.frag", ShaderOrigin::Memory(b"v1".to_vec()), vk::ShaderStageFlags::FRAGMENT)
            .unwrap();

        assert!(check_recreatable(false, &library, &[vert, frag]).is_ok());
        assert_eq!(
            check_recreatable(true, &library, &[vert, frag]),
            Err(CoreError::OutdatedPipeline)
        );

        library.set_source(frag, "error").unwrap();
        library.recompile_stale_shaders();
        assert_eq!(
            check_recreatable(false, &library, &[vert, frag]),
            Err(CoreError::ShaderCompileErrors { count: 1 })
        );
        assert!(check_recreatable(false, &library, &[vert]).is_ok());
    }
}
