use ash::vk;
use crate::renderer::contexts::resource_ctx::descriptor_device::{
    BufferDescriptorInfo,
    DescriptorPoolDevice,
    DescriptorResource,
    DescriptorWrite,
    ImageDescriptorInfo,
};
use crate::renderer::contexts::resource_ctx::descriptor_set_layout_builder::DescriptorSetLayout;
use crate::renderer::error::CoreError;

/// Fills a descriptor set binding by binding, in the layout's declaration order.
///
/// Every declared binding must be bound exactly once before [`DescriptorAssignment::finish`]
/// submits the writes in a single device call.
#[must_use = "descriptor writes are only submitted by finish()"]
pub struct DescriptorAssignment<'l> {
    layout: &'l DescriptorSetLayout,
    set: vk::DescriptorSet,
    writes: Vec<DescriptorWrite>,
    finished: bool,
}

impl<'l> DescriptorAssignment<'l> {
    pub fn new(layout: &'l DescriptorSetLayout, set: vk::DescriptorSet) -> Self {
        Self {
            layout,
            set,
            writes: Vec::with_capacity(layout.bindings().len()),
            finished: false,
        }
    }

    pub fn bind_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<&mut Self, CoreError> {
        self.push(DescriptorResource::Buffer(BufferDescriptorInfo {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            offset,
            range,
        }))
    }

    pub fn bind_uniform_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<&mut Self, CoreError> {
        self.push(DescriptorResource::Buffer(BufferDescriptorInfo {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            buffer,
            offset,
            range,
        }))
    }

    pub fn bind_image(
        &mut self,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Result<&mut Self, CoreError> {
        self.push(DescriptorResource::Image(ImageDescriptorInfo {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view,
            sampler,
            layout,
        }))
    }

    pub fn bind_storage_image(&mut self, view: vk::ImageView) -> Result<&mut Self, CoreError> {
        self.push(DescriptorResource::Image(ImageDescriptorInfo {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            view,
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::GENERAL,
        }))
    }

    pub fn bind_input_attachment(&mut self, view: vk::ImageView) -> Result<&mut Self, CoreError> {
        self.push(DescriptorResource::Image(ImageDescriptorInfo {
            ty: vk::DescriptorType::INPUT_ATTACHMENT,
            view,
            sampler: vk::Sampler::null(),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }))
    }

    pub fn bind_acceleration_structure(
        &mut self,
        tlas: vk::AccelerationStructureKHR,
    ) -> Result<&mut Self, CoreError> {
        self.push(DescriptorResource::AccelerationStructure(tlas))
    }

    pub fn writes(&self) -> &[DescriptorWrite] {
        &self.writes
    }

    /// Submits all writes at once. Fails if any declared binding is still unbound.
    pub fn finish(mut self, device: &impl DescriptorPoolDevice) -> Result<usize, CoreError> {
        let declared = self.layout.bindings().len();
        if self.writes.len() != declared {
            return Err(CoreError::MissingBindings {
                bound: self.writes.len(),
                declared,
            });
        }

        device.write_descriptors(&self.writes);
        self.finished = true;
        Ok(self.writes.len())
    }

    fn push(&mut self, resource: DescriptorResource) -> Result<&mut Self, CoreError> {
        let layout = self.layout;
        let bindings = layout.bindings();
        let binding = *bindings
            .get(self.writes.len())
            .ok_or(CoreError::TooManyBindings { declared: bindings.len() })?;

        if binding.descriptor_type != resource.descriptor_type() {
            return Err(CoreError::BindingTypeMismatch {
                binding: binding.binding,
                expected: binding.descriptor_type,
                actual: resource.descriptor_type(),
            });
        }

        self.writes.push(DescriptorWrite {
            set: self.set,
            binding: binding.binding,
            array_element: 0,
            resource,
        });
        Ok(self)
    }
}

impl Drop for DescriptorAssignment<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            log::warn!(
                "DescriptorAssignment for set {:?} dropped with {} unsubmitted write(s)",
                self.set,
                self.writes.len(),
            );
        }
    }
}
