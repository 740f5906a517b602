use std::{ops::AddAssign, time::Duration};

use ash::vk;

/// 一个 command list 中记录的绘制统计
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxCommandStats {
    pub draw_calls: u32,
    pub indirect_draw_calls: u32,
    /// indirect 调用展开后的 draw 数量上限
    pub indirect_draws: u32,
    pub vertices: u64,
    pub indices: u64,
}

impl AddAssign for GfxCommandStats {
    fn add_assign(&mut self, rhs: Self) {
        self.draw_calls += rhs.draw_calls;
        self.indirect_draw_calls += rhs.indirect_draw_calls;
        self.indirect_draws += rhs.indirect_draws;
        self.vertices += rhs.vertices;
        self.indices += rhs.indices;
    }
}

/// 资源池的占用情况
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxResourceStats {
    pub live_buffers: u32,
    pub live_textures: u32,
    pub live_samplers: u32,
    pub live_pipelines: u32,
    /// 由 GFX 层分配的 buffer 和 texture 的字节数（texture 按紧密排列估算）
    pub allocated_bytes: u64,
}

/// 上一帧的渲染统计
#[derive(Default, Clone, Copy, Debug)]
pub struct GfxRenderStats {
    pub frame_id: u64,
    /// 两次 end_frame 之间的 CPU 时间
    pub cpu_frame_time: Duration,
    pub commands: GfxCommandStats,
    pub resources: GfxResourceStats,
    pub render_extent: vk::Extent2D,
}

impl GfxRenderStats {
    pub fn fps(&self) -> f32 {
        let secs = self.cpu_frame_time.as_secs_f32();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}
