use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{GfxBackend, set_debug_name},
    commands::{
        command_list::GfxCommandList,
        submit_info::{GfxSemaphoreSubmit, GfxSubmitInfo},
    },
    error::{GfxError, GfxResult},
};

static NEXT_RING_ID: AtomicU64 = AtomicU64::new(1);

/// 每个 slot 的状态
///
/// `Ready -> Recording (acquire) -> Pending (submit) -> Ready (purge 时 fence 已经 signal)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxCommandSlotState {
    Ready,
    Recording,
    /// 已经提交，fence 还没有被回收
    Pending,
}

struct GfxCommandSlot {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    /// 不串联提交的 ring 没有 completion semaphore
    completion_semaphore: vk::Semaphore,
    state: GfxCommandSlotState,
}

#[derive(Clone, Debug)]
pub struct GfxCommandRingDesc<'a> {
    pub name: &'a str,
    pub slot_count: u32,
    /// 为 true 时，每次提交都会等待上一次提交的 completion semaphore
    pub chain_submissions: bool,
    pub acquire_timeout_ns: u64,
    /// 取出的 command list 在绑定 pipeline 时绑定的 bindless set
    pub bindless_set: vk::DescriptorSet,
}

impl Default for GfxCommandRingDesc<'_> {
    fn default() -> Self {
        Self {
            name: "frame",
            slot_count: 16,
            chain_submissions: true,
            acquire_timeout_ns: 5_000_000_000,
            bindless_set: vk::DescriptorSet::null(),
        }
    }
}

/// 固定数量、循环复用的 command list
///
/// slot 在创建时一次性分配，直到 [`Self::destroy`] 之前都不会单独释放。
/// 没有 ready 的 slot 时，acquire 会阻塞在 `vkWaitForFences` 上，直到任意一个 slot 的 fence signal 或者超时。
pub struct GfxCommandRing {
    backend: Arc<dyn GfxBackend>,
    name: String,
    ring_id: u64,

    command_pool: vk::CommandPool,
    slots: Vec<GfxCommandSlot>,

    chain_submissions: bool,
    /// 最近一次提交 signal 的 semaphore，下一次提交需要等待它
    last_completion: Option<vk::Semaphore>,

    acquire_timeout_ns: u64,
    bindless_set: vk::DescriptorSet,

    submit_count: u64,
    valid: bool,
}

// init & destroy
impl GfxCommandRing {
    pub fn new(backend: Arc<dyn GfxBackend>, desc: &GfxCommandRingDesc) -> GfxResult<Self> {
        if desc.slot_count == 0 {
            return Err(GfxError::InvalidDesc(format!("command ring {} has zero slots", desc.name)));
        }

        let command_pool = backend.create_command_pool(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
        set_debug_name(backend.as_ref(), command_pool, "CommandPool", desc.name);

        let mut ring = Self {
            backend,
            name: desc.name.to_string(),
            ring_id: NEXT_RING_ID.fetch_add(1, Ordering::Relaxed),
            command_pool,
            slots: Vec::with_capacity(desc.slot_count as usize),
            chain_submissions: desc.chain_submissions,
            last_completion: None,
            acquire_timeout_ns: desc.acquire_timeout_ns,
            bindless_set: desc.bindless_set,
            submit_count: 0,
            valid: true,
        };
        if let Err(err) = ring.create_slots(desc.slot_count) {
            log::error!("command ring {}: failed to create slots: {}", desc.name, err);
            ring.release();
            return Err(err);
        }

        log::info!("command ring {} created with {} slots", desc.name, desc.slot_count);
        Ok(ring)
    }

    /// 失败时已经创建好的 slot 留在 `self.slots` 中，由 [`Self::release`] 释放
    fn create_slots(&mut self, slot_count: u32) -> GfxResult<()> {
        let backend = self.backend.clone();
        let command_buffers = backend.allocate_command_buffers(self.command_pool, slot_count)?;

        for (idx, command_buffer) in command_buffers.into_iter().enumerate() {
            set_debug_name(backend.as_ref(), command_buffer, "CommandBuffer", &format!("{}-{}", self.name, idx));

            let fence = backend.create_fence(false)?;
            set_debug_name(backend.as_ref(), fence, "Fence", &format!("{}-{}", self.name, idx));

            let completion_semaphore = if self.chain_submissions {
                let semaphore = backend.create_semaphore(None).inspect_err(|_| backend.destroy_fence(fence))?;
                set_debug_name(backend.as_ref(), semaphore, "Semaphore", &format!("{}-{}-complete", self.name, idx));
                semaphore
            } else {
                vk::Semaphore::null()
            };

            self.slots.push(GfxCommandSlot {
                command_buffer,
                fence,
                completion_semaphore,
                state: GfxCommandSlotState::Ready,
            });
        }
        Ok(())
    }

    /// 等待所有提交完成，然后释放所有 slot
    pub fn destroy(&mut self) -> GfxResult<()> {
        if !self.valid {
            return Ok(());
        }
        let wait_result = self.wait_all();
        self.release();

        log::info!("command ring {} destroyed after {} submissions", self.name, self.submit_count);
        wait_result
    }

    /// 不等待 GPU，直接释放 slot 和 command pool
    fn release(&mut self) {
        for slot in self.slots.drain(..) {
            self.backend.destroy_fence(slot.fence);
            if slot.completion_semaphore != vk::Semaphore::null() {
                self.backend.destroy_semaphore(slot.completion_semaphore);
            }
        }
        // command buffer 随 pool 一起释放
        self.backend.destroy_command_pool(self.command_pool);
        self.last_completion = None;
        self.valid = false;
    }
}

impl Drop for GfxCommandRing {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "command ring {} must be destroyed manually", self.name);
    }
}

// getters
impl GfxCommandRing {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slot_state(&self, slot: usize) -> Option<GfxCommandSlotState> {
        self.slots.get(slot).map(|slot| slot.state)
    }

    #[inline]
    pub fn ready_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.state == GfxCommandSlotState::Ready).count()
    }

    #[inline]
    pub fn submit_count(&self) -> u64 {
        self.submit_count
    }

    #[inline]
    pub fn bindless_set(&self) -> vk::DescriptorSet {
        self.bindless_set
    }

    /// 更换之后 acquire 的 command list 所使用的 bindless set
    #[inline]
    pub fn set_bindless_set(&mut self, bindless_set: vk::DescriptorSet) {
        self.bindless_set = bindless_set;
    }
}

// acquire & submit
impl GfxCommandRing {
    /// 取出一个 ready 的 slot 并开始录制
    ///
    /// 没有 ready 的 slot 时阻塞等待任意一个 pending slot 的 fence，超时返回 [`GfxError::Timeout`]
    pub fn acquire_command_list(&mut self) -> GfxResult<GfxCommandList> {
        let slot_idx = match self.find_ready_slot() {
            Some(idx) => idx,
            None => {
                self.wait_any_pending()?;
                self.purge()?;
                self.find_ready_slot().ok_or_else(|| {
                    log::error!("command ring {}: no slot became ready after fence wait", self.name);
                    GfxError::ResourceExhausted {
                        pool: "command ring",
                        capacity: self.slots.len() as u32,
                    }
                })?
            }
        };

        let slot = &mut self.slots[slot_idx];
        self.backend.begin_command_buffer(slot.command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        slot.state = GfxCommandSlotState::Recording;

        Ok(GfxCommandList::new(
            self.backend.clone(),
            slot.command_buffer,
            self.ring_id,
            slot_idx,
            self.bindless_set,
        ))
    }

    /// 结束录制并提交到 graphics queue
    ///
    /// 串联的 ring 会等待上一次提交的 completion semaphore，并 signal 本 slot 的 completion semaphore；
    /// `waits` 和 `signals` 追加在这些 semaphore 之后。slot 的 fence 作为这次提交的完成 fence。
    pub fn submit(
        &mut self,
        mut list: GfxCommandList,
        waits: &[GfxSemaphoreSubmit],
        signals: &[GfxSemaphoreSubmit],
    ) -> GfxResult<()> {
        if list.ring_id() != self.ring_id {
            return Err(GfxError::InvalidDesc(format!("command list submitted to foreign ring {}", self.name)));
        }
        let slot_idx = list.slot();
        debug_assert_eq!(self.slots[slot_idx].state, GfxCommandSlotState::Recording);

        if let Err(err) = list.finish() {
            self.abandon(list)?;
            return Err(err);
        }
        let slot = &self.slots[slot_idx];
        if let Err(err) = self.backend.end_command_buffer(slot.command_buffer) {
            self.abandon(list)?;
            return Err(err);
        }
        let slot = &self.slots[slot_idx];

        let mut submit_info = GfxSubmitInfo::new(&[slot.command_buffer]);
        if self.chain_submissions {
            if let Some(last_completion) = self.last_completion {
                submit_info = submit_info
                    .wait(GfxSemaphoreSubmit::binary(last_completion, vk::PipelineStageFlags2::ALL_COMMANDS));
            }
            submit_info = submit_info
                .signal(GfxSemaphoreSubmit::binary(slot.completion_semaphore, vk::PipelineStageFlags2::ALL_COMMANDS));
        }
        for wait in waits {
            submit_info = submit_info.wait(*wait);
        }
        for signal in signals {
            submit_info = submit_info.signal(*signal);
        }

        if let Err(err) = self.backend.queue_submit(&submit_info, slot.fence) {
            log::error!("command ring {}: queue submit failed: {}", self.name, err);
            let command_buffer = slot.command_buffer;
            self.backend.reset_command_buffer(command_buffer)?;
            self.slots[slot_idx].state = GfxCommandSlotState::Ready;
            return Err(err);
        }

        if self.chain_submissions {
            self.last_completion = Some(self.slots[slot_idx].completion_semaphore);
        }
        self.slots[slot_idx].state = GfxCommandSlotState::Pending;
        self.submit_count += 1;
        Ok(())
    }

    /// 放弃一个正在录制的 command list，slot 直接回到 ready
    pub fn abandon(&mut self, list: GfxCommandList) -> GfxResult<()> {
        if list.ring_id() != self.ring_id {
            return Err(GfxError::InvalidDesc(format!("command list abandoned on foreign ring {}", self.name)));
        }
        let slot = &mut self.slots[list.slot()];
        self.backend.reset_command_buffer(slot.command_buffer)?;
        slot.state = GfxCommandSlotState::Ready;
        Ok(())
    }

    /// 阻塞直到所有已提交的 slot 完成，然后回收它们
    pub fn wait_all(&mut self) -> GfxResult<()> {
        let _span = profile_span!("GfxCommandRing::wait_all");

        let pending = self.pending_fences();
        if !pending.is_empty() && !self.backend.wait_for_fences(&pending, true, self.acquire_timeout_ns)? {
            log::error!("command ring {}: wait_all timed out on {} fences", self.name, pending.len());
            return Err(GfxError::Timeout {
                what: "command ring wait_all",
                timeout_ns: self.acquire_timeout_ns,
            });
        }
        self.purge()
    }

    /// 回收所有 fence 已经 signal 的 slot
    pub fn purge(&mut self) -> GfxResult<()> {
        for slot in self.slots.iter_mut().filter(|slot| slot.state == GfxCommandSlotState::Pending) {
            if self.backend.fence_signaled(slot.fence)? {
                self.backend.reset_fences(std::slice::from_ref(&slot.fence))?;
                self.backend.reset_command_buffer(slot.command_buffer)?;
                slot.state = GfxCommandSlotState::Ready;
            }
        }
        Ok(())
    }
}

// tools
impl GfxCommandRing {
    fn find_ready_slot(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.state == GfxCommandSlotState::Ready)
    }

    fn pending_fences(&self) -> Vec<vk::Fence> {
        self.slots
            .iter()
            .filter(|slot| slot.state == GfxCommandSlotState::Pending)
            .map(|slot| slot.fence)
            .collect_vec()
    }

    fn wait_any_pending(&self) -> GfxResult<()> {
        let pending = self.pending_fences();
        if pending.is_empty() {
            // 所有 slot 都在录制中，没有可以等待的对象
            log::error!("command ring {}: all {} slots are recording", self.name, self.slots.len());
            return Err(GfxError::ResourceExhausted {
                pool: "command ring",
                capacity: self.slots.len() as u32,
            });
        }
        if !self.backend.wait_for_fences(&pending, false, self.acquire_timeout_ns)? {
            log::error!("command ring {}: acquire timed out on {} pending slots", self.name, pending.len());
            return Err(GfxError::Timeout {
                what: "command list acquire",
                timeout_ns: self.acquire_timeout_ns,
            });
        }
        Ok(())
    }
}
