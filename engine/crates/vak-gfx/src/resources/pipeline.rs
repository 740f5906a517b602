use ash::vk;

use crate::pool::handle::Handle;

pub type PipelineHandle = Handle<GfxPipeline>;

/// push constant 的上限，所有设备都保证至少 128 字节
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// 外部创建好的 graphics / compute pipeline
///
/// shader 的编译和 pipeline 的创建不在 GFX 层，这里只负责生命周期和绑定
#[derive(Default, Debug)]
pub struct GfxPipeline {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) bind_point: vk::PipelineBindPoint,
    pub(crate) push_constant_stages: vk::ShaderStageFlags,
}

impl GfxPipeline {
    pub fn new(
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
        push_constant_stages: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            pipeline,
            layout,
            bind_point,
            push_constant_stages,
        }
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

#[derive(Default, Debug, Clone)]
pub struct GfxPipelineMeta {
    pub debug_name: String,
    /// layout 由 GFX 层创建时，删除 pipeline 时一起销毁
    pub owns_layout: bool,
}
