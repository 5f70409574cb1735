/// Number of replicas kept for every frame-indexed resource.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Contains configuration options for the renderer core like heap capacities and pool sizes
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub max_storage_buffers: u32,
    pub max_uniform_buffers: u32,
    pub max_textures: u32,
    pub max_storage_images: u32,
    pub max_acceleration_structures: u32,

    /// Number of descriptor sets carved out of each pool the per-layout allocators create.
    pub descriptor_sets_per_pool: u32,

    /// Adds the acceleration structure table to the bindless heap.
    pub ray_tracing: bool,

    /// Forwards allocation/free logging to gpu-allocator.
    pub allocator_debug: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_storage_buffers: 1024,
            max_uniform_buffers: 1024,
            max_textures: 1024,
            max_storage_images: 1024,
            max_acceleration_structures: 16,
            descriptor_sets_per_pool: 1000,
            ray_tracing: false,
            allocator_debug: cfg!(debug_assertions),
        }
    }
}
