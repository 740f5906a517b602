use ash::vk;
use itertools::Itertools;

/// 一次 semaphore 的 wait 或 signal 操作
///
/// binary semaphore 的 value 会被驱动忽略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxSemaphoreSubmit {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags2,
    pub value: u64,
}

impl GfxSemaphoreSubmit {
    #[inline]
    pub fn binary(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2) -> Self {
        Self {
            semaphore,
            stage,
            value: 0,
        }
    }

    #[inline]
    pub fn timeline(semaphore: vk::Semaphore, stage: vk::PipelineStageFlags2, value: u64) -> Self {
        Self {
            semaphore,
            stage,
            value,
        }
    }
}

/// Gfx 关于 submitInfo 的封装，更易用
///
/// 只保存 handle，真正的 `vk::SubmitInfo2` 在提交时由 [`Self::with_vk_submit_info`] 临时组装
#[derive(Default, Clone, Debug)]
pub struct GfxSubmitInfo {
    command_buffers: Vec<vk::CommandBuffer>,
    wait_infos: Vec<GfxSemaphoreSubmit>,
    signal_infos: Vec<GfxSemaphoreSubmit>,
}

impl GfxSubmitInfo {
    pub fn new(command_buffers: &[vk::CommandBuffer]) -> Self {
        Self {
            command_buffers: command_buffers.to_vec(),
            wait_infos: vec![],
            signal_infos: vec![],
        }
    }

    /// builder
    #[inline]
    pub fn wait(mut self, wait: GfxSemaphoreSubmit) -> Self {
        self.wait_infos.push(wait);
        self
    }

    /// builder
    #[inline]
    pub fn signal(mut self, signal: GfxSemaphoreSubmit) -> Self {
        self.signal_infos.push(signal);
        self
    }

    #[inline]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    #[inline]
    pub fn wait_infos(&self) -> &[GfxSemaphoreSubmit] {
        &self.wait_infos
    }

    #[inline]
    pub fn signal_infos(&self) -> &[GfxSemaphoreSubmit] {
        &self.signal_infos
    }

    /// 组装 `vk::SubmitInfo2`，其中的指针只在回调内有效
    pub fn with_vk_submit_info<R>(&self, f: impl FnOnce(&vk::SubmitInfo2<'_>) -> R) -> R {
        let command_buffer_infos = self
            .command_buffers
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
            .collect_vec();
        let to_vk = |info: &GfxSemaphoreSubmit| {
            vk::SemaphoreSubmitInfo::default().semaphore(info.semaphore).stage_mask(info.stage).value(info.value)
        };
        let wait_infos = self.wait_infos.iter().map(to_vk).collect_vec();
        let signal_infos = self.signal_infos.iter().map(to_vk).collect_vec();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        f(&submit_info)
    }
}
