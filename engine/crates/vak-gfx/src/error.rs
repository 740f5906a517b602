use ash::vk;
use thiserror::Error;

/// GFX 层对外暴露的所有错误
///
/// 这些错误在渲染器里都属于不可恢复的错误，但会以值的形式返回到组件边界，
/// 由上层决定是直接终止进程还是在测试中断言
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    /// 资源池已满，或者 staging region 已经用尽
    #[error("{pool} pool exhausted: all {capacity} slots are live")]
    ResourceExhausted { pool: &'static str, capacity: u32 },

    /// handle 的 generation 和 slot 当前的 generation 不一致
    #[error("stale {pool} handle: index {index}, generation {generation}")]
    StaleHandle {
        pool: &'static str,
        index: u32,
        generation: u32,
    },

    #[error("queue submission failed: {0}")]
    SubmitFailed(vk::Result),

    #[error("device lost")]
    DeviceLost,

    /// 单次上传的数据超过了 staging region 的总容量
    #[error("upload of {requested} bytes overflows the {capacity}-byte staging region")]
    UploadOverflow { requested: u64, capacity: u64 },

    #[error("timed out after {timeout_ns}ns waiting for {what}")]
    Timeout { what: &'static str, timeout_ns: u64 },

    #[error("invalid description: {0}")]
    InvalidDesc(String),

    #[error("{call} failed: {result}")]
    Vulkan { call: &'static str, result: vk::Result },

    #[error("failed to load vulkan: {0}")]
    Loading(String),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    /// 将 vk::Result 转换为 GfxError，`ERROR_DEVICE_LOST` 总是被识别为 [`GfxError::DeviceLost`]
    pub fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            result => GfxError::Vulkan { call, result },
        }
    }

    /// 队列提交专用的转换
    pub fn from_submit(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            result => GfxError::SubmitFailed(result),
        }
    }
}

/// 为 `VkResult` 提供到 [`GfxResult`] 的便捷转换
pub trait VkResultExt<T> {
    fn gfx_call(self, call: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[inline]
    fn gfx_call(self, call: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::from_vk(call, result))
    }
}
