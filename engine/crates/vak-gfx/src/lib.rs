//! Vak GFX 层
//!
//! 位于 Vulkan 之上、渲染器之下，负责 GPU 资源的生命周期以及命令提交：
//! 带 generation 的资源句柄池、按 timeline 延迟释放的资源管理器、command list 环形缓冲、
//! bindless descriptor table、staging 上传以及 CPU/GPU 帧节奏控制。
//!
//! 所有驱动调用都经过 [`backend::GfxBackend`]，生产环境使用 [`foundation::ash_backend::AshBackend`]。

/// tracy 的 CPU span，tracy client 没有运行时为 None
macro_rules! profile_span {
    ($name:expr) => {
        tracy_client::Client::running().map(|c| c.span_alloc(Some($name), "", file!(), line!(), 0))
    };
}

pub mod backend;
pub mod commands;
pub mod config;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod frame;
pub mod gfx;
pub mod jobs;
pub mod pool;
pub mod resources;
pub mod stats;
pub mod upload;
