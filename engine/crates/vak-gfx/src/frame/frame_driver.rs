use std::{sync::Arc, time::Instant};

use ash::vk;

use crate::{
    backend::{GfxBackend, set_debug_name},
    commands::{
        command_list::GfxCommandList,
        command_ring::{GfxCommandRing, GfxCommandRingDesc},
        submit_info::GfxSemaphoreSubmit,
    },
    error::{GfxError, GfxResult},
    frame::{
        frame_timeline::{FrameTimeline, GfxFrameTicket},
        swapchain::GfxSwapchain,
    },
    gfx::Gfx,
    resources::texture::TextureHandle,
    stats::GfxRenderStats,
};

/// 不 present 时，CPU 最多领先 GPU 的帧数
pub const HEADLESS_FRAMES_IN_FLIGHT: usize = 3;

/// 帧最终输出到哪里
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxFrameTarget {
    /// 输出到 swapchain，参数是窗口的尺寸
    Swapchain(vk::Extent2D),
    /// 不 present，例如离线渲染和测试
    Headless(vk::Extent2D),
}

/// 正在录制的一帧
///
/// 由 [`GfxFrameDriver::begin_frame`] 创建，必须交还给同一个 driver 的 [`GfxFrameDriver::end_frame`]
/// 或者 [`GfxFrameDriver::cancel_frame`]，否则 command list 所在的 slot 不会回到 ring 中
#[must_use = "a frame must be passed to end_frame or cancel_frame"]
pub struct GfxFrame {
    frame_id: u64,
    cmd: GfxCommandList,

    image_index: Option<u32>,
    swapchain_texture: Option<TextureHandle>,
    /// headless 时为 null
    acquire_semaphore: vk::Semaphore,

    ticket: GfxFrameTicket,
    extent: vk::Extent2D,
}

// getters
impl GfxFrame {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn cmd(&self) -> &GfxCommandList {
        &self.cmd
    }

    #[inline]
    pub fn cmd_mut(&mut self) -> &mut GfxCommandList {
        &mut self.cmd
    }

    /// 本帧 acquire 到的 swapchain image，headless 时为 None
    #[inline]
    pub fn swapchain_texture(&self) -> Option<TextureHandle> {
        self.swapchain_texture
    }

    #[inline]
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// 本帧完成时 frame timeline 到达的值，用于 `retire_*` 延迟删除
    #[inline]
    pub fn timeline_value(&self) -> u64 {
        self.ticket.signal_value
    }
}

/// 驱动每一帧的 begin / submit / present
///
/// 只在渲染线程上使用。每一帧使用一个 command list，提交时 signal frame timeline；
/// 使用同一个节奏 slot 的下一帧在 GPU 上等待上一次的值，CPU 不会因为节奏控制而阻塞。
///
/// acquire semaphore 按 command ring 的 slot 分配：slot 能被再次取出时，上一次使用它的提交已经完成，
/// 所以 semaphore 上不会有未完成的 wait。
pub struct GfxFrameDriver {
    backend: Arc<dyn GfxBackend>,

    ring: GfxCommandRing,
    timeline: FrameTimeline,
    swapchain: Option<GfxSwapchain>,
    acquire_semaphores: Vec<vk::Semaphore>,

    headless_extent: vk::Extent2D,
    acquire_timeout_ns: u64,

    frame_id: u64,
    last_end_time: Option<Instant>,
    valid: bool,
}

// new & init
impl GfxFrameDriver {
    pub fn new(gfx: &Gfx, target: GfxFrameTarget) -> GfxResult<Self> {
        let backend = gfx.backend().clone();
        let config = gfx.config();

        let bindless_set = gfx.bindless().descriptor_set();
        let mut ring = GfxCommandRing::new(
            backend.clone(),
            &GfxCommandRingDesc {
                name: "frame",
                slot_count: config.frame_command_lists,
                chain_submissions: true,
                acquire_timeout_ns: config.acquire_timeout_ns(),
                bindless_set,
            },
        )?;
        // presenting 时在 swapchain 创建之后按 image 数量重置
        let timeline = match FrameTimeline::new(backend.clone(), HEADLESS_FRAMES_IN_FLIGHT) {
            Ok(timeline) => timeline,
            Err(err) => {
                if let Err(destroy_err) = ring.destroy() {
                    log::error!("failed to destroy frame ring after init failure: {}", destroy_err);
                }
                return Err(err);
            }
        };

        let mut driver = Self {
            backend,
            ring,
            timeline,
            swapchain: None,
            acquire_semaphores: Vec::new(),
            headless_extent: vk::Extent2D::default(),
            acquire_timeout_ns: config.acquire_timeout_ns(),
            frame_id: 0,
            last_end_time: None,
            valid: true,
        };
        match target {
            GfxFrameTarget::Swapchain(window_extent) => {
                if let Err(err) = driver.init_presentation(gfx, window_extent) {
                    log::error!("frame driver presentation init failed: {}", err);
                    if let Err(destroy_err) = driver.destroy(gfx) {
                        log::error!("failed to destroy frame driver after init failure: {}", destroy_err);
                    }
                    return Err(err);
                }
            }
            GfxFrameTarget::Headless(extent) => driver.headless_extent = extent,
        }

        log::info!(
            "frame driver created: {} command lists, {} pacing slots, presenting: {}",
            driver.ring.slot_count(),
            driver.timeline.slot_count(),
            driver.swapchain.is_some()
        );
        Ok(driver)
    }

    /// 失败时已经创建的对象都挂在 self 上，由 [`Self::destroy`] 释放
    fn init_presentation(&mut self, gfx: &Gfx, window_extent: vk::Extent2D) -> GfxResult<()> {
        let swapchain = GfxSwapchain::new(
            self.backend.clone(),
            &mut gfx.resources(),
            window_extent,
            gfx.config().prefer_mailbox,
        )?;
        self.timeline.reset_slots(swapchain.image_count());
        self.swapchain = Some(swapchain);

        for idx in 0..self.ring.slot_count() {
            let semaphore = self.backend.create_semaphore(None)?;
            set_debug_name(self.backend.as_ref(), semaphore, "Semaphore", &format!("image-available-{}", idx));
            self.acquire_semaphores.push(semaphore);
        }
        Ok(())
    }
}

// destroy
impl GfxFrameDriver {
    /// 等待所有帧完成，注销 swapchain texture，释放 timeline、swapchain 和 command ring
    ///
    /// 等待失败时仍然会释放所有对象，返回第一个错误
    pub fn destroy(&mut self, gfx: &Gfx) -> GfxResult<()> {
        if !self.valid {
            return Ok(());
        }
        let mut result = self.ring.wait_all();

        if let Some(mut swapchain) = self.swapchain.take() {
            result = result.and(swapchain.destroy(&mut gfx.resources()));
        }
        for semaphore in self.acquire_semaphores.drain(..) {
            self.backend.destroy_semaphore(semaphore);
        }
        self.timeline.destroy();
        result = result.and(self.ring.destroy());
        self.valid = false;

        log::info!("frame driver destroyed after {} frames", self.frame_id);
        result
    }
}

impl Drop for GfxFrameDriver {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "frame driver must be destroyed manually");
    }
}

// getters
impl GfxFrameDriver {
    /// 已经提交的帧数
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn timeline(&self) -> &FrameTimeline {
        &self.timeline
    }

    #[inline]
    pub fn swapchain(&self) -> Option<&GfxSwapchain> {
        self.swapchain.as_ref()
    }

    #[inline]
    pub fn ring(&self) -> &GfxCommandRing {
        &self.ring
    }

    /// swapchain 报告了 out-of-date / suboptimal，需要调用 [`Self::resize`]
    #[inline]
    pub fn needs_recreate(&self) -> bool {
        self.swapchain.as_ref().is_some_and(|swapchain| swapchain.needs_recreate())
    }

    #[inline]
    pub fn render_extent(&self) -> vk::Extent2D {
        self.swapchain.as_ref().map_or(self.headless_extent, |swapchain| swapchain.extent())
    }
}

// update
impl GfxFrameDriver {
    /// 开始新的一帧
    ///
    /// 1. 删除 timeline 已经越过的延迟删除资源
    /// 2. 如果 texture / sampler 有变化，重写 bindless 数组
    /// 3. 取出一个 command list（没有空闲的 slot 时阻塞）
    /// 4. presenting 时 acquire 下一个 swapchain image
    ///
    /// 返回 None 表示 swapchain 已经 out of date，需要先 [`Self::resize`]
    pub fn begin_frame(&mut self, gfx: &Gfx) -> GfxResult<Option<GfxFrame>> {
        let _span = profile_span!("GfxFrameDriver::begin_frame");

        let completed = self.timeline.completed_value()?;
        let released = gfx.resources().release_retired(completed)?;
        if released > 0 {
            log::debug!("released {} retired resources at timeline value {}", released, completed);
        }
        gfx.update_descriptor_sets()?;

        let cmd = self.ring.acquire_command_list()?;

        let (slot, image_index, swapchain_texture, acquire_semaphore) = match self.swapchain.as_mut() {
            Some(swapchain) => {
                let acquire_semaphore = self.acquire_semaphores[cmd.slot()];
                match swapchain.acquire_next_image(acquire_semaphore, self.acquire_timeout_ns) {
                    Ok(Some(image_index)) => {
                        (image_index as usize, Some(image_index), swapchain.texture(image_index), acquire_semaphore)
                    }
                    Ok(None) => {
                        self.ring.abandon(cmd)?;
                        return Ok(None);
                    }
                    Err(err) => {
                        log::error!("failed to acquire swapchain image: {}", err);
                        self.ring.abandon(cmd)?;
                        return Err(err);
                    }
                }
            }
            None => (
                (self.frame_id % HEADLESS_FRAMES_IN_FLIGHT as u64) as usize,
                None,
                None,
                vk::Semaphore::null(),
            ),
        };

        Ok(Some(GfxFrame {
            frame_id: self.frame_id,
            cmd,
            image_index,
            swapchain_texture,
            acquire_semaphore,
            ticket: self.timeline.ticket(slot),
            extent: self.render_extent(),
        }))
    }

    /// 提交这一帧，presenting 时把 swapchain image 转换到 PRESENT_SRC 并 present
    pub fn end_frame(&mut self, gfx: &Gfx, frame: GfxFrame) -> GfxResult<()> {
        let _span = profile_span!("GfxFrameDriver::end_frame");

        let GfxFrame {
            frame_id,
            cmd,
            image_index,
            swapchain_texture,
            acquire_semaphore,
            ticket,
            extent,
        } = frame;
        debug_assert_eq!(frame_id, self.frame_id);

        let ring_slot = cmd.slot();
        if let Some(texture) = swapchain_texture {
            if let Err(err) = cmd.image_transition(&mut gfx.resources(), texture, vk::ImageLayout::PRESENT_SRC_KHR) {
                self.ring.abandon(cmd)?;
                self.discard_acquired_image(ring_slot);
                return Err(err);
            }
        }
        let command_stats = cmd.stats();

        let mut waits = Vec::with_capacity(2);
        let mut signals = Vec::with_capacity(2);
        if acquire_semaphore != vk::Semaphore::null() {
            waits.push(GfxSemaphoreSubmit::binary(
                acquire_semaphore,
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ));
        }
        if let Some(wait) = self.timeline.wait_submit(&ticket) {
            waits.push(wait);
        }
        signals.push(self.timeline.signal_submit(&ticket));

        let presenting = match (self.swapchain.as_ref(), image_index) {
            (Some(swapchain), Some(image_index)) => {
                signals.push(GfxSemaphoreSubmit::binary(
                    swapchain.present_semaphore(image_index),
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                ));
                Some(image_index)
            }
            (None, None) => None,
            _ => {
                log::error!("frame {} does not match the presentation mode of the driver", frame_id);
                self.ring.abandon(cmd)?;
                return Err(GfxError::InvalidDesc(format!("frame {} was begun on another driver", frame_id)));
            }
        };

        if let Err(err) = self.ring.submit(cmd, &waits, &signals) {
            if presenting.is_some() {
                self.discard_acquired_image(ring_slot);
            }
            return Err(err);
        }
        self.timeline.commit(&ticket);

        if let Some(image_index) = presenting {
            if let Some(swapchain) = self.swapchain.as_mut() {
                swapchain.present(image_index)?;
            }
        }

        let now = Instant::now();
        let cpu_frame_time = self.last_end_time.map(|last| now - last).unwrap_or_default();
        self.last_end_time = Some(now);
        gfx.set_render_stats(GfxRenderStats {
            frame_id,
            cpu_frame_time,
            commands: command_stats,
            resources: gfx.resources().stats(),
            render_extent: extent,
        });

        self.frame_id += 1;
        Ok(())
    }

    /// 放弃这一帧：command list 中录制的命令被丢弃，slot 回到 ring 中，frame id 不变
    ///
    /// presenting 时已经 acquire 的 image 不会被 present，之后 [`Self::needs_recreate`] 为 true
    pub fn cancel_frame(&mut self, frame: GfxFrame) -> GfxResult<()> {
        debug_assert_eq!(frame.frame_id, self.frame_id);
        let ring_slot = frame.cmd.slot();
        let presenting = frame.image_index.is_some();
        self.ring.abandon(frame.cmd)?;
        if presenting {
            self.discard_acquired_image(ring_slot);
        }
        log::debug!("frame {} cancelled", frame.frame_id);
        Ok(())
    }

    /// 窗口尺寸变化之后重建 swapchain；headless 时只更新渲染尺寸
    ///
    /// 会阻塞直到所有已提交的帧完成
    pub fn resize(&mut self, gfx: &Gfx, extent: vk::Extent2D) -> GfxResult<()> {
        let _span = profile_span!("GfxFrameDriver::resize");

        let Some(swapchain) = self.swapchain.as_mut() else {
            self.headless_extent = extent;
            return Ok(());
        };
        self.ring.wait_all()?;
        swapchain.recreate(&mut gfx.resources(), extent)?;
        self.timeline.reset_slots(swapchain.image_count());
        Ok(())
    }
}

// tools
impl GfxFrameDriver {
    /// acquire 成功之后这一帧没有提交：slot 的 acquire semaphore 已经 signal 却不会再被等待，换成新的；
    /// image 不会被 present，标记 swapchain 需要重建
    ///
    /// 只在错误路径上调用，替换失败时只记录日志，调用方返回的是原来的错误
    fn discard_acquired_image(&mut self, ring_slot: usize) {
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.mark_needs_recreate();
        }
        // 还有一个来自 presentation engine 的 signal 没有被等待，销毁之前先让设备空闲
        if let Err(err) = self.backend.wait_idle() {
            log::error!("wait idle before replacing acquire semaphore failed: {}", err);
            return;
        }
        let fresh = match self.backend.create_semaphore(None) {
            Ok(semaphore) => semaphore,
            Err(err) => {
                log::error!("failed to replace acquire semaphore of slot {}: {}", ring_slot, err);
                return;
            }
        };
        set_debug_name(self.backend.as_ref(), fresh, "Semaphore", &format!("image-available-{}", ring_slot));
        let stale = std::mem::replace(&mut self.acquire_semaphores[ring_slot], fresh);
        self.backend.destroy_semaphore(stale);
        log::warn!("acquire semaphore of slot {} replaced after an unsubmitted frame", ring_slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::mock::{MockBackend, MockCommand},
        config::GfxConfig,
        resources::buffer::GfxBufferDesc,
    };

    fn new_gfx(mock: &Arc<MockBackend>) -> Gfx {
        let config = GfxConfig {
            max_buffers: 8,
            max_textures: 8,
            max_samplers: 4,
            max_pipelines: 4,
            frame_command_lists: 4,
            staging_capacity: 4096,
            acquire_timeout_ms: 50,
            ..Default::default()
        };
        Gfx::new(mock.clone(), config).unwrap()
    }

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 320, height: 240 };

    fn run_frame(driver: &mut GfxFrameDriver, gfx: &Gfx) -> u64 {
        let frame = driver.begin_frame(gfx).unwrap().unwrap();
        let value = frame.timeline_value();
        driver.end_frame(gfx, frame).unwrap();
        value
    }

    #[test]
    fn test_pacing_waits_on_gpu_without_cpu_block() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Headless(EXTENT)).unwrap();

        // GPU 不再推进；创建 placeholder 时的上传已经等待过 fence
        mock.set_auto_signal(false);
        let waits_before = mock.wait_for_fences_calls();
        let timeline = driver.timeline().semaphore();
        for expected in 1..=(HEADLESS_FRAMES_IN_FLIGHT as u64 + 1) {
            assert_eq!(run_frame(&mut driver, &gfx), expected);
        }

        let submissions = mock.submissions();
        let last = submissions.last().unwrap();
        let timeline_wait = last.waits.iter().find(|wait| wait.semaphore == timeline).unwrap();
        assert_eq!(timeline_wait.value, 1);
        assert!(last.signals.iter().any(|signal| signal.semaphore == timeline && signal.value == 4));
        // 前 3 帧不需要等待
        for submission in &submissions[submissions.len() - 4..submissions.len() - 1] {
            assert!(submission.waits.iter().all(|wait| wait.semaphore != timeline));
        }
        assert_eq!(mock.wait_for_fences_calls(), waits_before);

        mock.complete_all();
        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_headless_frames_advance_timeline() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Headless(EXTENT)).unwrap();

        for _ in 0..10 {
            run_frame(&mut driver, &gfx);
        }
        assert_eq!(driver.frame_id(), 10);
        assert_eq!(driver.timeline().completed_value().unwrap(), 10);
        assert_eq!(gfx.render_stats().frame_id, 9);
        assert_eq!(gfx.render_stats().render_extent, EXTENT);
        assert!(mock.presents().is_empty());

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
    }

    #[test]
    fn test_present_uses_per_image_semaphore() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Swapchain(EXTENT)).unwrap();

        for _ in 0..4 {
            let frame = driver.begin_frame(&gfx).unwrap().unwrap();
            assert!(frame.swapchain_texture().is_some());
            driver.end_frame(&gfx, frame).unwrap();
        }

        let swapchain = driver.swapchain().unwrap();
        let presents = mock.presents();
        let submissions = mock.submissions();
        assert_eq!(presents.len(), 4);
        for (present, submission) in presents.iter().zip(&submissions[submissions.len() - 4..]) {
            assert_eq!(present.wait_semaphore, swapchain.present_semaphore(present.image_index));
            assert!(submission.signals.iter().any(|signal| signal.semaphore == present.wait_semaphore));
            assert!(
                submission
                    .waits
                    .iter()
                    .any(|wait| wait.stage == vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            );
        }
        // 第 4 帧重新拿到 image 0，等待第 1 帧
        let timeline = driver.timeline().semaphore();
        let last = submissions.last().unwrap();
        assert!(last.waits.iter().any(|wait| wait.semaphore == timeline && wait.value == 1));

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_swapchain_image_ends_in_present_layout() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Swapchain(EXTENT)).unwrap();

        let mut frame = driver.begin_frame(&gfx).unwrap().unwrap();
        let texture = frame.swapchain_texture().unwrap();
        frame.cmd_mut().begin_rendering(&mut gfx.resources(), texture, None).unwrap();
        frame.cmd_mut().draw(3, 1);
        frame.cmd_mut().end_rendering();
        driver.end_frame(&gfx, frame).unwrap();

        assert_eq!(gfx.resources().texture(texture).unwrap().layout(), vk::ImageLayout::PRESENT_SRC_KHR);
        let last_barrier = mock
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                MockCommand::ImageBarrier { old, new, .. } => Some((old, new)),
                _ => None,
            })
            .last()
            .unwrap();
        assert_eq!(
            last_barrier,
            (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR)
        );
        assert_eq!(gfx.render_stats().commands.draw_calls, 1);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame_and_resize_recovers() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Swapchain(EXTENT)).unwrap();
        run_frame(&mut driver, &gfx);
        let old_texture = driver.swapchain().unwrap().texture(0).unwrap();

        let ready = driver.ring().ready_count();
        mock.inject_out_of_date_on_acquire();
        assert!(driver.begin_frame(&gfx).unwrap().is_none());
        assert!(driver.needs_recreate());
        // 放弃的 command list 回到 ring 中
        assert_eq!(driver.ring().ready_count(), ready);

        mock.set_swapchain_image_count(2);
        let new_extent = vk::Extent2D { width: 640, height: 480 };
        driver.resize(&gfx, new_extent).unwrap();
        assert!(!driver.needs_recreate());
        assert_eq!(driver.render_extent(), new_extent);
        assert_eq!(driver.timeline().slot_count(), 2);
        assert!(gfx.resources().texture(old_texture).is_err());

        run_frame(&mut driver, &gfx);
        assert_eq!(gfx.render_stats().render_extent, new_extent);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_retired_buffer_is_released_after_its_frame() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Headless(EXTENT)).unwrap();

        let buffer = gfx
            .create_buffer(&GfxBufferDesc {
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                size: 128,
                debug_name: "transient",
                ..Default::default()
            })
            .unwrap();

        mock.set_auto_signal(false);
        let frame = driver.begin_frame(&gfx).unwrap().unwrap();
        gfx.resources().retire_buffer(buffer, frame.timeline_value()).unwrap();
        driver.end_frame(&gfx, frame).unwrap();

        // GPU 还没有完成第 1 帧
        let frame = driver.begin_frame(&gfx).unwrap().unwrap();
        assert!(gfx.resources().buffer(buffer).is_ok());
        driver.end_frame(&gfx, frame).unwrap();

        mock.complete_all();
        let frame = driver.begin_frame(&gfx).unwrap().unwrap();
        assert!(gfx.resources().buffer(buffer).is_err());
        assert_eq!(gfx.resources().retired_count(), 0);
        driver.end_frame(&gfx, frame).unwrap();

        mock.complete_all();
        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
    }

    #[test]
    fn test_acquire_timeout_returns_command_list() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Swapchain(EXTENT)).unwrap();
        run_frame(&mut driver, &gfx);

        let ready = driver.ring().ready_count();
        mock.inject_timeout_on_acquire();
        let err = driver.begin_frame(&gfx).err().unwrap();
        assert!(matches!(err, GfxError::Timeout { .. }));
        assert_eq!(driver.ring().ready_count(), ready);
        assert_eq!(driver.frame_id(), 1);

        // 重复超时也不会耗尽 ring
        for _ in 0..driver.ring().slot_count() {
            mock.inject_timeout_on_acquire();
            assert!(driver.begin_frame(&gfx).is_err());
        }
        run_frame(&mut driver, &gfx);
        assert_eq!(driver.frame_id(), 2);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_failed_submit_replaces_acquire_semaphore() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Swapchain(EXTENT)).unwrap();

        let frame = driver.begin_frame(&gfx).unwrap().unwrap();
        let ring_slot = frame.cmd().slot();
        let signalled = driver.acquire_semaphores[ring_slot];
        let live_objects = mock.live_object_count();

        mock.fail_next_submit(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = driver.end_frame(&gfx, frame).unwrap_err();
        assert_eq!(err, GfxError::SubmitFailed(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));

        assert_ne!(driver.acquire_semaphores[ring_slot], signalled);
        assert_eq!(mock.live_object_count(), live_objects);
        assert!(mock.presents().is_empty());
        assert!(driver.needs_recreate());
        assert_eq!(driver.ring().ready_count(), driver.ring().slot_count());
        assert_eq!(driver.frame_id(), 0);

        driver.resize(&gfx, EXTENT).unwrap();
        run_frame(&mut driver, &gfx);
        assert_eq!(mock.presents().len(), 1);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_cancelled_frame_returns_its_slot() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Headless(EXTENT)).unwrap();

        let ready = driver.ring().ready_count();
        let mut frame = driver.begin_frame(&gfx).unwrap().unwrap();
        frame.cmd_mut().draw(3, 1);
        driver.cancel_frame(frame).unwrap();
        assert_eq!(driver.ring().ready_count(), ready);
        assert_eq!(driver.frame_id(), 0);

        // 放弃的帧没有提交，timeline 的值不会跳过
        assert_eq!(run_frame(&mut driver, &gfx), 1);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
    }

    #[test]
    fn test_cancelled_presenting_frame_requests_recreate() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Swapchain(EXTENT)).unwrap();

        let frame = driver.begin_frame(&gfx).unwrap().unwrap();
        let ring_slot = frame.cmd().slot();
        let signalled = driver.acquire_semaphores[ring_slot];
        driver.cancel_frame(frame).unwrap();

        assert!(driver.needs_recreate());
        assert_ne!(driver.acquire_semaphores[ring_slot], signalled);
        assert!(mock.presents().is_empty());

        driver.resize(&gfx, EXTENT).unwrap();
        run_frame(&mut driver, &gfx);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
        assert_eq!(mock.live_object_count(), 0);
    }

    #[test]
    fn test_failed_creation_releases_partial_driver() {
        for target in [GfxFrameTarget::Headless(EXTENT), GfxFrameTarget::Swapchain(EXTENT)] {
            for fail_at in 0.. {
                assert!(fail_at < 64, "frame driver init never succeeded");
                let mock = Arc::new(MockBackend::new());
                let mut gfx = new_gfx(&mock);
                let live_objects = mock.live_object_count();
                let live_views = mock.live_image_view_count();
                mock.fail_creation_after(fail_at);

                let created = match GfxFrameDriver::new(&gfx, target) {
                    Ok(mut driver) => {
                        assert!(mock.creation_failure_pending());
                        driver.destroy(&gfx).unwrap();
                        true
                    }
                    Err(err) => {
                        assert!(matches!(err, GfxError::Vulkan { .. }), "{:?}", err);
                        false
                    }
                };
                assert_eq!(mock.live_object_count(), live_objects, "{:?} leaks at #{}", target, fail_at);
                assert_eq!(mock.live_image_view_count(), live_views);
                assert_eq!(gfx.resources().stats().live_textures, 1);

                gfx.destroy().unwrap();
                if created {
                    break;
                }
            }
        }
    }

    #[test]
    fn test_ranged_draws_and_bind_offsets() {
        let mock = Arc::new(MockBackend::new());
        let mut gfx = new_gfx(&mock);
        let mut driver = GfxFrameDriver::new(&gfx, GfxFrameTarget::Headless(EXTENT)).unwrap();
        let new_buffer = |usage, debug_name| {
            gfx.create_buffer(&GfxBufferDesc {
                usage,
                size: 256,
                debug_name,
                ..Default::default()
            })
            .unwrap()
        };
        let vertices = new_buffer(vk::BufferUsageFlags::VERTEX_BUFFER, "vertices");
        let indices = new_buffer(vk::BufferUsageFlags::INDEX_BUFFER, "indices");
        let vertex_buffer = gfx.resources().buffer(vertices).unwrap().handle();
        let index_buffer = gfx.resources().buffer(indices).unwrap().handle();

        mock.clear_commands();
        let mut frame = driver.begin_frame(&gfx).unwrap().unwrap();
        {
            let resources = gfx.resources();
            frame.cmd().bind_vertex_buffer(&resources, vertices, 64).unwrap();
            frame.cmd().bind_index_buffer(&resources, indices, 32, vk::IndexType::UINT16).unwrap();
            assert!(matches!(
                frame.cmd().bind_vertex_buffer(&resources, vertices, 256),
                Err(GfxError::InvalidDesc(_))
            ));
        }
        frame.cmd_mut().draw_indexed_ranged((6, 3), (2, 1), -4);
        frame.cmd_mut().draw_ranged((3, 9), (1, 5));
        frame.cmd_mut().draw(4, 1);
        driver.end_frame(&gfx, frame).unwrap();

        let recorded = mock
            .commands()
            .into_iter()
            .filter(|command| {
                matches!(
                    command,
                    MockCommand::BindVertexBuffer { .. }
                        | MockCommand::BindIndexBuffer { .. }
                        | MockCommand::Draw { .. }
                        | MockCommand::DrawIndexed { .. }
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(recorded.len(), 5);
        assert!(matches!(
            recorded[0],
            MockCommand::BindVertexBuffer { buffer, offset: 64 } if buffer == vertex_buffer
        ));
        assert!(matches!(
            recorded[1],
            MockCommand::BindIndexBuffer { buffer, offset: 32, index_type }
                if buffer == index_buffer && index_type == vk::IndexType::UINT16
        ));
        assert!(matches!(
            recorded[2],
            MockCommand::DrawIndexed {
                index_count: 6,
                instance_count: 2,
                first_index: 3,
                vertex_offset: -4,
                first_instance: 1,
            }
        ));
        assert!(matches!(
            recorded[3],
            MockCommand::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 9,
                first_instance: 5,
            }
        ));
        assert!(matches!(
            recorded[4],
            MockCommand::Draw {
                first_vertex: 0,
                first_instance: 0,
                ..
            }
        ));

        let stats = gfx.render_stats().commands;
        assert_eq!(stats.draw_calls, 3);
        assert_eq!(stats.indices, 12);
        assert_eq!(stats.vertices, 7);

        driver.destroy(&gfx).unwrap();
        gfx.destroy().unwrap();
    }
}
