use ash::vk;
use bytemuck::Pod;
use smallvec::SmallVec;
use crate::renderer::contexts::resource_ctx::bindless::GlobalHeap;
use crate::renderer::error::CoreError;
use crate::renderer::resources::graphics_pipeline::GraphicsPipeline;

/// Descriptor set indices shared by every graphics pipeline, from least to most frequently changed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorSlot {
    Global,
    RenderPass,
    Subpass,
    Material,
}

impl DescriptorSlot {
    pub const ALL: [Self; 4] = [Self::Global, Self::RenderPass, Self::Subpass, Self::Material];

    pub fn index(self) -> usize {
        match self {
            Self::Global => 0,
            Self::RenderPass => 1,
            Self::Subpass => 2,
            Self::Material => 3,
        }
    }
}

/// Descriptor sets staged for the next draw.
#[derive(Debug, Copy, Clone, Default)]
pub struct DrawSlots {
    sets: [Option<vk::DescriptorSet>; 4],
}

impl DrawSlots {
    pub fn bind(&mut self, slot: DescriptorSlot, set: vk::DescriptorSet) {
        self.sets[slot.index()] = Some(set);
    }

    pub fn clear(&mut self, slot: DescriptorSlot) {
        self.sets[slot.index()] = None;
    }

    pub fn get(&self, slot: DescriptorSlot) -> Option<vk::DescriptorSet> {
        self.sets[slot.index()]
    }

    /// The staged sets as one range starting at set 0. An empty slot followed by a bound one
    /// is an error.
    pub fn contiguous(&self) -> Result<SmallVec<[vk::DescriptorSet; 4]>, CoreError> {
        let bound: SmallVec<[vk::DescriptorSet; 4]> = self.sets
            .iter()
            .map_while(|set| *set)
            .collect();

        if self.sets[bound.len()..].iter().any(Option::is_some) {
            return Err(CoreError::DescriptorSlotGap { slot: bound.len() });
        }

        Ok(bound)
    }
}

/// Records draws for the current subpass with its pipeline already bound.
pub struct DrawContext<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
    pipeline: &'a GraphicsPipeline,
    extent: vk::Extent2D,
    slots: DrawSlots,
}

impl<'a> DrawContext<'a> {
    pub(crate) fn new(
        device: &'a ash::Device,
        command_buffer: vk::CommandBuffer,
        pipeline: &'a GraphicsPipeline,
        extent: vk::Extent2D,
    ) -> Self {
        pipeline.bind(command_buffer);

        Self {
            device,
            command_buffer,
            pipeline,
            extent,
            slots: DrawSlots::default(),
        }
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn pipeline(&self) -> &GraphicsPipeline {
        self.pipeline
    }

    pub fn bind_slot(&mut self, slot: DescriptorSlot, set: vk::DescriptorSet) -> &mut Self {
        self.slots.bind(slot, set);
        self
    }

    pub fn bind_global_heap(&mut self, heap: &GlobalHeap) -> &mut Self {
        self.bind_slot(DescriptorSlot::Global, heap.descriptor_set())
    }

    pub fn clear_slot(&mut self, slot: DescriptorSlot) -> &mut Self {
        self.slots.clear(slot);
        self
    }

    pub fn push_constants<T: Pod>(&self, data: &T) {
        self.pipeline
            .pipeline()
            .push_constants(self.command_buffer, 0, data);
    }

    pub fn bind_vertex_buffer(&self, binding: u32, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device.cmd_bind_vertex_buffers(self.command_buffer, binding, &[buffer], &[offset]);
        }
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device.cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
        }
    }

    /// Covers the whole render area.
    pub fn set_viewport_scissor(&self) {
        self.set_viewport_scissor_rect(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        });
    }

    pub fn set_viewport_scissor_rect(&self, rect: vk::Rect2D) {
        let viewport = vk::Viewport::default()
            .x(rect.offset.x as f32)
            .y(rect.offset.y as f32)
            .width(rect.extent.width as f32)
            .height(rect.extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        unsafe {
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(self.command_buffer, 0, &[rect]);
        }
    }

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), CoreError> {
        self.flush_slots()?;
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), CoreError> {
        self.flush_slots()?;
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    fn flush_slots(&self) -> Result<(), CoreError> {
        let sets = self.slots.contiguous()?;
        if !sets.is_empty() {
            self.pipeline
                .pipeline()
                .bind_descriptor_sets(self.command_buffer, 0, &sets);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;
    use super::*;

    fn set(raw: u64) -> vk::DescriptorSet {
        vk::DescriptorSet::from_raw(raw)
    }

    #[test]
    fn slots_bind_as_contiguous_prefix() {
        let mut slots = DrawSlots::default();
        assert!(slots.contiguous().unwrap().is_empty());

        slots.bind(DescriptorSlot::Global, set(1));
        slots.bind(DescriptorSlot::RenderPass, set(2));
        assert_eq!(slots.contiguous().unwrap().as_slice(), &[set(1), set(2)]);

        slots.bind(DescriptorSlot::Subpass, set(3));
        slots.bind(DescriptorSlot::Material, set(4));
        assert_eq!(slots.contiguous().unwrap().len(), 4);
    }

    #[test]
    fn gap_between_slots_is_rejected() {
        let mut slots = DrawSlots::default();
        slots.bind(DescriptorSlot::Global, set(1));
        slots.bind(DescriptorSlot::Material, set(4));
        assert_eq!(slots.contiguous(), Err(CoreError::DescriptorSlotGap { slot: 1 }));

        slots.bind(DescriptorSlot::RenderPass, set(2));
        assert_eq!(slots.contiguous(), Err(CoreError::DescriptorSlotGap { slot: 2 }));

        slots.clear(DescriptorSlot::Material);
        assert!(slots.contiguous().is_ok());
    }

    #[test]
    fn missing_global_slot_is_a_gap() {
        let mut slots = DrawSlots::default();
        slots.bind(DescriptorSlot::Material, set(4));
        assert_eq!(slots.contiguous(), Err(CoreError::DescriptorSlotGap { slot: 0 }));
    }
}
