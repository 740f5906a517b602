use std::sync::Arc;

use ash::vk;

use crate::{
    backend::{GfxBackend, set_debug_name},
    commands::submit_info::GfxSemaphoreSubmit,
    error::{GfxError, GfxResult},
};

/// 一帧在 timeline 上的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxFrameTicket {
    /// 节奏控制的 slot：presenting 时是 swapchain image 的下标，headless 时是 `frame_id % slot_count`
    pub slot: usize,
    /// 这一帧完成时 timeline 到达的值
    pub signal_value: u64,
    /// 提交之前 GPU 需要等待的值，即上一次使用同一个 slot 的帧；None 表示不需要等待
    pub wait_value: Option<u64>,
}

/// 帧的 timeline semaphore
///
/// 第 k 帧（从 1 开始）完成时 timeline 到达 k。每个 slot 记录最后一次使用它的帧的值，
/// 下一次使用同一个 slot 的帧在 GPU 上等待这个值，于是 CPU 最多领先 GPU slot_count 帧，
/// 而 CPU 本身不会因此阻塞。
pub struct FrameTimeline {
    backend: Arc<dyn GfxBackend>,
    semaphore: vk::Semaphore,

    /// 已经提交的帧数，也是最后一次提交 signal 的值
    submitted_value: u64,
    slot_values: Vec<u64>,

    valid: bool,
}

// new & init
impl FrameTimeline {
    pub fn new(backend: Arc<dyn GfxBackend>, slot_count: usize) -> GfxResult<Self> {
        if slot_count == 0 {
            return Err(GfxError::InvalidDesc("frame timeline needs at least one slot".to_string()));
        }
        let semaphore = backend.create_semaphore(Some(0))?;
        set_debug_name(backend.as_ref(), semaphore, "Semaphore", "frame-timeline");

        Ok(Self {
            backend,
            semaphore,
            submitted_value: 0,
            slot_values: vec![0; slot_count],
            valid: true,
        })
    }

    /// slot 的数量变化时（swapchain 重建）调用，调用方需要保证 GPU 已经空闲
    pub fn reset_slots(&mut self, slot_count: usize) {
        debug_assert!(slot_count > 0);
        self.slot_values = vec![0; slot_count];
    }
}

// destroy
impl FrameTimeline {
    pub fn destroy(&mut self) {
        if !self.valid {
            return;
        }
        self.backend.destroy_semaphore(self.semaphore);
        self.valid = false;
    }
}

impl Drop for FrameTimeline {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "frame timeline must be destroyed manually");
    }
}

// getters
impl FrameTimeline {
    #[inline]
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_values.len()
    }

    #[inline]
    pub fn submitted_value(&self) -> u64 {
        self.submitted_value
    }

    /// GPU 已经完成的值
    pub fn completed_value(&self) -> GfxResult<u64> {
        self.backend.semaphore_counter_value(self.semaphore)
    }
}

// update
impl FrameTimeline {
    /// 计算下一帧的 wait / signal 值，不修改状态
    pub fn ticket(&self, slot: usize) -> GfxFrameTicket {
        debug_assert!(slot < self.slot_values.len());
        let last = self.slot_values[slot % self.slot_values.len()];
        GfxFrameTicket {
            slot,
            signal_value: self.submitted_value + 1,
            wait_value: (last > 0).then_some(last),
        }
    }

    /// ticket 对应的提交成功之后调用
    pub fn commit(&mut self, ticket: &GfxFrameTicket) {
        debug_assert_eq!(ticket.signal_value, self.submitted_value + 1);
        let slot_count = self.slot_values.len();
        self.slot_values[ticket.slot % slot_count] = ticket.signal_value;
        self.submitted_value = ticket.signal_value;
    }

    /// 提交需要附加的 wait 操作
    #[inline]
    pub fn wait_submit(&self, ticket: &GfxFrameTicket) -> Option<GfxSemaphoreSubmit> {
        ticket
            .wait_value
            .map(|value| GfxSemaphoreSubmit::timeline(self.semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, value))
    }

    /// 提交需要附加的 signal 操作
    #[inline]
    pub fn signal_submit(&self, ticket: &GfxFrameTicket) -> GfxSemaphoreSubmit {
        GfxSemaphoreSubmit::timeline(self.semaphore, vk::PipelineStageFlags2::ALL_COMMANDS, ticket.signal_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[test]
    fn test_first_frames_do_not_wait() {
        let mock = Arc::new(MockBackend::new());
        let mut timeline = FrameTimeline::new(mock.clone(), 3).unwrap();

        for slot in 0..3 {
            let ticket = timeline.ticket(slot);
            assert_eq!(ticket.wait_value, None);
            assert!(timeline.wait_submit(&ticket).is_none());
            timeline.commit(&ticket);
        }
        assert_eq!(timeline.submitted_value(), 3);
        timeline.destroy();
    }

    #[test]
    fn test_slot_reuse_waits_for_previous_user() {
        let mock = Arc::new(MockBackend::new());
        let mut timeline = FrameTimeline::new(mock.clone(), 2).unwrap();

        let first = timeline.ticket(0);
        timeline.commit(&first);
        let second = timeline.ticket(1);
        timeline.commit(&second);

        let third = timeline.ticket(0);
        assert_eq!(third.signal_value, 3);
        assert_eq!(third.wait_value, Some(first.signal_value));
        let wait = timeline.wait_submit(&third).unwrap();
        assert_eq!(wait.semaphore, timeline.semaphore());
        assert_eq!(wait.value, 1);

        // 不按顺序拿到 slot 时，等待的是最后一次使用该 slot 的帧
        timeline.commit(&third);
        let fourth = timeline.ticket(0);
        assert_eq!(fourth.wait_value, Some(3));
        timeline.destroy();
    }

    #[test]
    fn test_uncommitted_ticket_changes_nothing() {
        let mock = Arc::new(MockBackend::new());
        let mut timeline = FrameTimeline::new(mock.clone(), 2).unwrap();

        let ticket = timeline.ticket(1);
        assert_eq!(timeline.ticket(1), ticket);
        assert_eq!(timeline.submitted_value(), 0);
        assert_eq!(timeline.completed_value().unwrap(), 0);
        timeline.destroy();
    }
}
