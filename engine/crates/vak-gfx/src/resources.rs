pub mod buffer;
pub mod format;
pub mod pipeline;
pub mod resource_manager;
pub mod sampler;
pub mod texture;
