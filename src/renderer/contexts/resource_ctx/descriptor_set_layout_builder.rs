use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::resource_ctx::resource_type::BindlessTableType;

/// One entry of a descriptor set layout, in declaration order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// A native descriptor set layout together with the ordered binding list it was built from.
pub struct DescriptorSetLayout {
    raw: vk::DescriptorSetLayout,
    bindings: Vec<LayoutBinding>,
    device: Option<Arc<ash::Device>>,
}

impl DescriptorSetLayout {
    /// Wraps a layout whose native handle is owned elsewhere.
    pub fn from_bindings(raw: vk::DescriptorSetLayout, bindings: Vec<LayoutBinding>) -> Self {
        Self {
            raw,
            bindings,
            device: None,
        }
    }

    pub fn raw(&self) -> vk::DescriptorSetLayout {
        self.raw
    }

    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            unsafe {
                device.destroy_descriptor_set_layout(self.raw, None);
            }
        }
    }
}

pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<LayoutBinding>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
}

impl DescriptorSetLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            binding_flags: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(LayoutBinding {
            binding,
            descriptor_type,
            descriptor_count,
            stages,
        });
        self.binding_flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    pub fn add_binding_for_table(
        mut self,
        table: BindlessTableType,
        capacity: u32,
    ) -> Self {
        self.bindings.push(LayoutBinding {
            binding: table.binding(),
            descriptor_type: table.descriptor_type(),
            descriptor_count: capacity,
            stages: vk::ShaderStageFlags::ALL,
        });
        self.binding_flags.push(table.descriptor_binding_flags());
        self
    }

    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    pub fn build(
        self,
        flags: vk::DescriptorSetLayoutCreateFlags,
        device: Arc<ash::Device>,
    ) -> Result<Arc<DescriptorSetLayout>> {
        let vk_bindings = self.bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.descriptor_count)
                    .stage_flags(binding.stages)
            })
            .collect::<Vec<_>>();

        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&self.binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&vk_bindings)
            .flags(flags)
            .push_next(&mut binding_flags_info);

        let raw = unsafe {
            device.create_descriptor_set_layout(&layout_info, None)?
        };

        Ok(Arc::new(DescriptorSetLayout {
            raw,
            bindings: self.bindings,
            device: Some(device),
        }))
    }
}

impl Default for DescriptorSetLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_declaration_order() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_binding(3, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX)
            .add_binding_for_table(BindlessTableType::Texture, 64);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].binding, 3);
        assert_eq!(bindings[1].binding, BindlessTableType::Texture.binding());
        assert_eq!(bindings[1].descriptor_count, 64);
        assert_eq!(bindings[1].stages, vk::ShaderStageFlags::ALL);
    }
}
