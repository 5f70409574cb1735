/// "Resources" are the GPU objects created through the contexts: allocations, shaders and
/// pipelines. They own their native handles and release them on drop.

pub mod buffer;
pub mod compute_pipeline;
pub mod graphics_pipeline;
pub mod image;
pub mod pipeline;
pub mod ray_tracing_pipeline;
pub mod shader;
pub mod uniform;
pub mod vertex;
