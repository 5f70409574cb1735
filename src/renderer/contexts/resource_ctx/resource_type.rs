use ash::vk;
use crate::renderer::config::RenderConfig;

/// One fixed-capacity slot array of the bindless heap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BindlessTableType {
    StorageBuffer,
    UniformBuffer,
    Texture,
    StorageImage,
    Tlas, // Top-level acceleration structure
}

impl BindlessTableType {
    pub const ALL: &'static [Self] = &[
        Self::StorageBuffer,
        Self::UniformBuffer,
        Self::Texture,
        Self::StorageImage,
        Self::Tlas,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::StorageBuffer => "storage buffer",
            Self::UniformBuffer => "uniform buffer",
            Self::Texture => "texture",
            Self::StorageImage => "storage image",
            Self::Tlas => "acceleration structure",
        }
    }

    /// Binding index inside the global heap set. Shaders hardcode these.
    pub fn binding(&self) -> u32 {
        match self {
            Self::StorageBuffer => 0,
            Self::UniformBuffer => 1,
            Self::Texture => 2,
            Self::StorageImage => 3,
            Self::Tlas => 4,
        }
    }

    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            Self::Tlas => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }

    pub fn capacity(&self, config: &RenderConfig) -> u32 {
        match self {
            Self::StorageBuffer => config.max_storage_buffers,
            Self::UniformBuffer => config.max_uniform_buffers,
            Self::Texture => config.max_textures,
            Self::StorageImage => config.max_storage_images,
            Self::Tlas if config.ray_tracing => config.max_acceleration_structures,
            Self::Tlas => 0,
        }
    }

    pub fn descriptor_binding_flags(&self) -> vk::DescriptorBindingFlags {
        vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tables_use_distinct_bindings() {
        let bindings: HashSet<u32> = BindlessTableType::ALL
            .iter()
            .map(|table| table.binding())
            .collect();
        assert_eq!(bindings.len(), BindlessTableType::ALL.len());
    }

    #[test]
    fn tlas_table_is_empty_without_ray_tracing() {
        let mut config = RenderConfig::default();
        assert_eq!(BindlessTableType::Tlas.capacity(&config), 0);

        config.ray_tracing = true;
        assert_eq!(
            BindlessTableType::Tlas.capacity(&config),
            config.max_acceleration_structures
        );
    }
}
