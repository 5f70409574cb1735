use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Vertex buffer bindings and attributes a graphics pipeline reads.
#[derive(Debug, Clone, Default)]
pub struct VertexInputDescription {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub flags: vk::PipelineVertexInputStateCreateFlags,
}

impl VertexInputDescription {
    /// No vertex buffers; vertices are pulled from the bindless heap.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_binding(
        mut self,
        binding: u32,
        stride: u32,
        input_rate: vk::VertexInputRate,
    ) -> Self {
        self.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate,
        });
        self
    }

    pub fn with_attribute(
        mut self,
        location: u32,
        binding: u32,
        format: vk::Format,
        offset: u32,
    ) -> Self {
        self.attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        });
        self
    }
}

/// Interleaved vertex layout used by the built-in mesh passes.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub texcoord: Vec2,
}

impl Vertex {
    pub fn description() -> VertexInputDescription {
        VertexInputDescription::empty()
            .with_binding(0, size_of::<Self>() as u32, vk::VertexInputRate::VERTEX)
            .with_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
            .with_attribute(1, 0, vk::Format::R32G32B32_SFLOAT, 12)
            .with_attribute(2, 0, vk::Format::R32G32_SFLOAT, 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_description_matches_struct_layout() {
        let description = Vertex::description();
        assert_eq!(description.bindings.len(), 1);
        assert_eq!(description.bindings[0].stride, 32);

        let last = description.attributes.last().unwrap();
        assert_eq!(last.offset as usize, std::mem::offset_of!(Vertex, texcoord));
    }
}
