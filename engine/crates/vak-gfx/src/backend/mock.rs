//! 记录所有调用的后端，用于单元测试
//!
//! handle 由一个递增计数器通过 `vk::Handle::from_raw` 伪造；fence 用 Condvar 模拟，可以从其他线程 signal。
//! `auto_signal` 为 true（默认）时，每次提交立即完成：fence signal，timeline semaphore 推进到 signal 的值。

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use ash::vk::{self, Handle};
use parking_lot::{Condvar, Mutex};

use crate::{
    backend::{
        GfxBackend, GfxBufferAllocDesc, GfxBufferAllocation, GfxDescriptorBinding, GfxDescriptorWrite,
        GfxImageAllocDesc, GfxImageViewDesc, GfxMappedPtr, GfxRenderingInfo, GfxStorageClass, GfxSwapchainDesc,
        GfxSwapchainImages, GfxSwapchainStatus,
    },
    commands::submit_info::{GfxSemaphoreSubmit, GfxSubmitInfo},
    error::{GfxError, GfxResult},
};

/// 一次 `queue_submit`
#[derive(Clone, Debug)]
pub struct MockSubmission {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<GfxSemaphoreSubmit>,
    pub signals: Vec<GfxSemaphoreSubmit>,
    pub fence: vk::Fence,
}

/// 录制到 command buffer 中的命令，按录制顺序保存
#[derive(Clone, Debug)]
pub enum MockCommand {
    ImageBarrier {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags2,
        dst_stage: vk::PipelineStageFlags2,
    },
    BufferBarrier {
        buffer: vk::Buffer,
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    BeginRendering {
        color: vk::ImageView,
        depth: Option<vk::ImageView>,
        extent: vk::Extent2D,
    },
    EndRendering,
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        set_index: u32,
        set: vk::DescriptorSet,
    },
    BindVertexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndexedIndirect {
        buffer: vk::Buffer,
        draw_count: u32,
        stride: u32,
    },
    BeginLabel(String),
    EndLabel,
}

/// 一次 `queue_present`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockPresent {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

struct MockMemory {
    data: Box<[u8]>,
}

struct MockSwapchain {
    image_count: u32,
    next_image: u32,
}

#[derive(Default)]
struct MockState {
    auto_signal: bool,

    fences: HashMap<vk::Fence, bool>,
    fence_signal_count: u64,
    wait_for_fences_calls: u64,
    /// 手动模式下，fence signal 时需要一起推进的 timeline semaphore
    pending_signals: HashMap<vk::Fence, Vec<GfxSemaphoreSubmit>>,

    /// binary semaphore 的值为 None
    semaphores: HashMap<vk::Semaphore, Option<u64>>,

    buffers: HashMap<vk::Buffer, MockMemory>,
    images: HashSet<vk::Image>,
    destroyed_images: Vec<vk::Image>,
    image_views: HashSet<vk::ImageView>,
    samplers: HashSet<vk::Sampler>,
    other_objects: HashSet<u64>,
    object_names: HashMap<u64, String>,

    fail_next_submit: Option<vk::Result>,
    /// 再成功创建这么多个对象之后，下一次创建失败
    fail_creation_after: Option<u32>,
    submissions: Vec<MockSubmission>,
    commands: Vec<MockCommand>,

    descriptor_update_calls: u64,
    descriptor_writes: Vec<GfxDescriptorWrite>,

    swapchain_image_count: u32,
    swapchains: HashMap<vk::SwapchainKHR, MockSwapchain>,
    out_of_date_on_acquire: bool,
    timeout_on_acquire: bool,
    out_of_date_on_present: bool,
    presents: Vec<MockPresent>,
}

pub struct MockBackend {
    next_handle: AtomicU64,
    state: Mutex<MockState>,
    fence_cond: Condvar,
}

// new & init
impl MockBackend {
    pub fn new() -> Self {
        Self {
            // 避开测试中手写的小 handle
            next_handle: AtomicU64::new(0x10_0000),
            state: Mutex::new(MockState {
                auto_signal: true,
                swapchain_image_count: 3,
                ..Default::default()
            }),
            fence_cond: Condvar::new(),
        }
    }

    fn new_handle<T: Handle>(&self) -> T {
        T::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

// 测试控制
impl MockBackend {
    pub fn set_auto_signal(&self, auto_signal: bool) {
        self.state.lock().auto_signal = auto_signal;
    }

    pub fn set_swapchain_image_count(&self, count: u32) {
        self.state.lock().swapchain_image_count = count;
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.lock().fail_next_submit = Some(result);
    }

    /// 之后第 `count + 1` 次创建对象（buffer、image、fence、semaphore、pool 等）返回 OUT_OF_DEVICE_MEMORY，只生效一次
    pub fn fail_creation_after(&self, count: u32) {
        self.state.lock().fail_creation_after = Some(count);
    }

    /// 创建失败注入还没有触发
    pub fn creation_failure_pending(&self) -> bool {
        self.state.lock().fail_creation_after.is_some()
    }

    pub fn inject_timeout_on_acquire(&self) {
        self.state.lock().timeout_on_acquire = true;
    }

    pub fn inject_out_of_date_on_acquire(&self) {
        self.state.lock().out_of_date_on_acquire = true;
    }

    pub fn inject_out_of_date_on_present(&self) {
        self.state.lock().out_of_date_on_present = true;
    }

    /// 模拟 GPU 完成了某次提交
    pub fn signal_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        Self::signal_fence_locked(&mut state, fence);
        self.fence_cond.notify_all();
    }

    /// 模拟 GPU 完成了所有已经提交的工作
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        // fence 会被 ring slot 复用，按每个 fence 最后一次提交的顺序 signal，timeline 才是递增的
        let mut order = Vec::new();
        for submission in state.submissions.iter().rev() {
            if !order.contains(&submission.fence) {
                order.push(submission.fence);
            }
        }
        order.reverse();
        for fence in order {
            let unsignaled = state.fences.get(&fence).is_some_and(|signaled| !*signaled);
            if unsignaled && state.pending_signals.contains_key(&fence) {
                Self::signal_fence_locked(&mut state, fence);
            }
        }
        self.fence_cond.notify_all();
    }

    fn signal_fence_locked(state: &mut MockState, fence: vk::Fence) {
        if let Some(signaled) = state.fences.get_mut(&fence) {
            *signaled = true;
            state.fence_signal_count += 1;
        }
        for signal in state.pending_signals.remove(&fence).unwrap_or_default() {
            Self::signal_semaphore_locked(state, signal);
        }
    }

    fn signal_semaphore_locked(state: &mut MockState, signal: GfxSemaphoreSubmit) {
        if let Some(Some(value)) = state.semaphores.get_mut(&signal.semaphore) {
            assert!(signal.value > *value, "timeline semaphore must increase: {} -> {}", value, signal.value);
            *value = signal.value;
        }
    }
}

// 测试查询
impl MockBackend {
    pub fn fence_signal_count(&self) -> u64 {
        self.state.lock().fence_signal_count
    }

    pub fn wait_for_fences_calls(&self) -> u64 {
        self.state.lock().wait_for_fences_calls
    }

    pub fn submissions(&self) -> Vec<MockSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn commands(&self) -> Vec<MockCommand> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.state.lock().buffers.get(&buffer).map(|memory| memory.data.to_vec()).unwrap_or_default()
    }

    pub fn descriptor_update_calls(&self) -> u64 {
        self.state.lock().descriptor_update_calls
    }

    pub fn descriptor_writes(&self) -> Vec<GfxDescriptorWrite> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn presents(&self) -> Vec<MockPresent> {
        self.state.lock().presents.clone()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    pub fn live_image_view_count(&self) -> usize {
        self.state.lock().image_views.len()
    }

    pub fn live_sampler_count(&self) -> usize {
        self.state.lock().samplers.len()
    }

    pub fn destroyed_images(&self) -> Vec<vk::Image> {
        self.state.lock().destroyed_images.clone()
    }

    /// fence、semaphore、pool、layout 等其余对象
    pub fn live_object_count(&self) -> usize {
        let state = self.state.lock();
        state.other_objects.len() + state.fences.len() + state.semaphores.len() + state.swapchains.len()
    }

    pub fn object_name<T: Handle>(&self, handle: T) -> Option<String> {
        self.state.lock().object_names.get(&handle.as_raw()).cloned()
    }

    pub fn timeline_value(&self, semaphore: vk::Semaphore) -> Option<u64> {
        self.state.lock().semaphores.get(&semaphore).copied().flatten()
    }
}

impl GfxBackend for MockBackend {
    fn device_name(&self) -> String {
        "mock".to_string()
    }

    fn wait_idle(&self) -> GfxResult<()> {
        Ok(())
    }

    fn set_object_name(&self, _object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        self.state.lock().object_names.insert(raw_handle, name.to_string());
    }

    fn create_buffer(&self, desc: &GfxBufferAllocDesc<'_>) -> GfxResult<GfxBufferAllocation> {
        self.take_creation_failure("vmaCreateBuffer")?;
        let buffer: vk::Buffer = self.new_handle();
        let mut memory = MockMemory {
            data: vec![0u8; desc.size as usize].into_boxed_slice(),
        };
        let mapped = match desc.storage {
            GfxStorageClass::HostVisible => GfxMappedPtr::new(memory.data.as_mut_ptr()),
            GfxStorageClass::DeviceLocal => None,
        };
        let device_address = desc
            .usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| buffer.as_raw() << 16);
        self.state.lock().buffers.insert(buffer, memory);
        Ok(GfxBufferAllocation {
            buffer,
            mapped,
            device_address,
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let removed = self.state.lock().buffers.remove(&buffer);
        assert!(removed.is_some(), "double free of {:?}", buffer);
    }

    fn flush_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> GfxResult<()> {
        let state = self.state.lock();
        let memory = state.buffers.get(&buffer).ok_or(GfxError::from_vk("vmaFlushAllocation", vk::Result::ERROR_UNKNOWN))?;
        assert!(offset + size <= memory.data.len() as u64);
        Ok(())
    }

    fn create_image(&self, _desc: &GfxImageAllocDesc) -> GfxResult<vk::Image> {
        self.take_creation_failure("vmaCreateImage")?;
        let image = self.new_handle();
        self.state.lock().images.insert(image);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        assert!(state.images.remove(&image), "double free of {:?}", image);
        state.destroyed_images.push(image);
    }

    fn create_image_view(&self, _desc: &GfxImageViewDesc) -> GfxResult<vk::ImageView> {
        self.take_creation_failure("vkCreateImageView")?;
        let view = self.new_handle();
        self.state.lock().image_views.insert(view);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        assert!(self.state.lock().image_views.remove(&view), "double free of {:?}", view);
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> GfxResult<vk::Sampler> {
        self.take_creation_failure("vkCreateSampler")?;
        let sampler = self.new_handle();
        self.state.lock().samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        assert!(self.state.lock().samplers.remove(&sampler), "double free of {:?}", sampler);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[GfxDescriptorBinding],
        _update_after_bind: bool,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        self.take_creation_failure("vkCreateDescriptorSetLayout")?;
        Ok(self.new_other())
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy_other(layout);
    }

    fn create_descriptor_pool(
        &self,
        _pool_sizes: &[vk::DescriptorPoolSize],
        _max_sets: u32,
        _update_after_bind: bool,
    ) -> GfxResult<vk::DescriptorPool> {
        self.take_creation_failure("vkCreateDescriptorPool")?;
        Ok(self.new_other())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy_other(pool);
    }

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> GfxResult<vk::DescriptorSet> {
        self.take_creation_failure("vkAllocateDescriptorSets")?;
        // 随 pool 一起释放，不计入存活对象
        Ok(self.new_handle())
    }

    fn update_descriptor_sets(&self, writes: &[GfxDescriptorWrite]) {
        let mut state = self.state.lock();
        state.descriptor_update_calls += 1;
        state.descriptor_writes.extend_from_slice(writes);
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> GfxResult<vk::PipelineLayout> {
        self.take_creation_failure("vkCreatePipelineLayout")?;
        assert!(push_constant_ranges.iter().all(|range| range.size <= 128));
        Ok(self.new_other())
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy_other(layout);
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        // pipeline 由测试手动伪造，只检查不为空
        assert_ne!(pipeline, vk::Pipeline::null());
    }

    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence> {
        self.take_creation_failure("vkCreateFence")?;
        let fence = self.new_handle();
        self.state.lock().fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        assert!(self.state.lock().fences.remove(&fence).is_some(), "double free of {:?}", fence);
    }

    fn fence_signaled(&self, fence: vk::Fence) -> GfxResult<bool> {
        Ok(self.state.lock().fences.get(&fence).copied().unwrap_or(false))
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout_ns: u64) -> GfxResult<bool> {
        let deadline = Instant::now() + Duration::from_nanos(timeout_ns);
        let mut state = self.state.lock();
        state.wait_for_fences_calls += 1;

        loop {
            let is_signaled = |fence: &vk::Fence| state.fences.get(fence).copied().unwrap_or(false);
            let done = if wait_all {
                fences.iter().all(is_signaled)
            } else {
                fences.iter().any(is_signaled)
            };
            if done {
                return Ok(true);
            }
            if self.fence_cond.wait_until(&mut state, deadline).timed_out() {
                return Ok(false);
            }
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            if let Some(signaled) = state.fences.get_mut(fence) {
                *signaled = false;
            }
        }
        Ok(())
    }

    fn create_semaphore(&self, timeline_initial_value: Option<u64>) -> GfxResult<vk::Semaphore> {
        self.take_creation_failure("vkCreateSemaphore")?;
        let semaphore = self.new_handle();
        self.state.lock().semaphores.insert(semaphore, timeline_initial_value);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        assert!(self.state.lock().semaphores.remove(&semaphore).is_some(), "double free of {:?}", semaphore);
    }

    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> GfxResult<u64> {
        self.timeline_value(semaphore)
            .ok_or(GfxError::from_vk("vkGetSemaphoreCounterValue", vk::Result::ERROR_UNKNOWN))
    }

    fn create_command_pool(&self, _flags: vk::CommandPoolCreateFlags) -> GfxResult<vk::CommandPool> {
        self.take_creation_failure("vkCreateCommandPool")?;
        Ok(self.new_other())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy_other(pool);
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> GfxResult<Vec<vk::CommandBuffer>> {
        self.take_creation_failure("vkAllocateCommandBuffers")?;
        Ok((0..count).map(|_| self.new_handle()).collect())
    }

    fn begin_command_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> GfxResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        Ok(())
    }

    fn reset_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        Ok(())
    }

    fn queue_submit(&self, submit: &GfxSubmitInfo, fence: vk::Fence) -> GfxResult<()> {
        let mut state = self.state.lock();
        if let Some(result) = state.fail_next_submit.take() {
            return Err(GfxError::from_submit(result));
        }

        state.submissions.push(MockSubmission {
            command_buffers: submit.command_buffers().to_vec(),
            waits: submit.wait_infos().to_vec(),
            signals: submit.signal_infos().to_vec(),
            fence,
        });
        let timeline_signals = submit
            .signal_infos()
            .iter()
            .filter(|signal| matches!(state.semaphores.get(&signal.semaphore), Some(Some(_))))
            .copied()
            .collect::<Vec<_>>();
        state.pending_signals.insert(fence, timeline_signals);

        if state.auto_signal {
            Self::signal_fence_locked(&mut state, fence);
            self.fence_cond.notify_all();
        }
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        _command_buffer: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        let mut state = self.state.lock();
        for barrier in image_barriers {
            state.commands.push(MockCommand::ImageBarrier {
                image: barrier.image,
                old: barrier.old_layout,
                new: barrier.new_layout,
                src_stage: barrier.src_stage_mask,
                dst_stage: barrier.dst_stage_mask,
            });
        }
        for barrier in buffer_barriers {
            state.commands.push(MockCommand::BufferBarrier {
                buffer: barrier.buffer,
                src_stage: barrier.src_stage_mask,
                src_access: barrier.src_access_mask,
                dst_stage: barrier.dst_stage_mask,
                dst_access: barrier.dst_access_mask,
            });
        }
    }

    /// 录制时立即复制，相当于 GPU 在提交之前就执行完了
    fn cmd_copy_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let mut state = self.state.lock();
        for region in regions {
            let (src_offset, dst_offset, size) =
                (region.src_offset as usize, region.dst_offset as usize, region.size as usize);
            let bytes = state.buffers[&src].data[src_offset..src_offset + size].to_vec();
            if let Some(memory) = state.buffers.get_mut(&dst) {
                memory.data[dst_offset..dst_offset + size].copy_from_slice(&bytes);
            }
        }
        state.commands.push(MockCommand::CopyBuffer {
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().commands.push(MockCommand::CopyBufferToImage {
            src,
            dst,
            layout: dst_layout,
            regions: regions.to_vec(),
        });
    }

    fn cmd_begin_rendering(&self, _command_buffer: vk::CommandBuffer, info: &GfxRenderingInfo) {
        self.record(MockCommand::BeginRendering {
            color: info.color.view,
            depth: info.depth.map(|depth| depth.view),
            extent: info.extent,
        });
    }

    fn cmd_end_rendering(&self, _command_buffer: vk::CommandBuffer) {
        self.record(MockCommand::EndRendering);
    }

    fn cmd_set_viewport(&self, _command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(MockCommand::SetViewport(viewport));
    }

    fn cmd_set_scissor(&self, _command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(MockCommand::SetScissor(scissor));
    }

    fn cmd_bind_pipeline(
        &self,
        _command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(MockCommand::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_descriptor_set(
        &self,
        _command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        self.record(MockCommand::BindDescriptorSet { set_index, set });
    }

    fn cmd_bind_vertex_buffer(&self, _command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.record(MockCommand::BindVertexBuffer { buffer, offset });
    }

    fn cmd_bind_index_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.record(MockCommand::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn cmd_push_constants(
        &self,
        _command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.record(MockCommand::PushConstants {
            stages,
            data: data.to_vec(),
        });
    }

    fn cmd_draw(
        &self,
        _command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(MockCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn cmd_draw_indexed(
        &self,
        _command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(MockCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn cmd_draw_indexed_indirect(
        &self,
        _command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        self.record(MockCommand::DrawIndexedIndirect {
            buffer,
            draw_count,
            stride,
        });
    }

    fn cmd_begin_label(&self, _command_buffer: vk::CommandBuffer, name: &str, _color: [f32; 4]) {
        self.record(MockCommand::BeginLabel(name.to_string()));
    }

    fn cmd_end_label(&self, _command_buffer: vk::CommandBuffer) {
        self.record(MockCommand::EndLabel);
    }

    fn create_swapchain(&self, desc: &GfxSwapchainDesc) -> GfxResult<GfxSwapchainImages> {
        self.take_creation_failure("vkCreateSwapchainKHR")?;
        let swapchain = self.new_handle();
        let image_count = self.state.lock().swapchain_image_count;
        // swapchain image 不属于 image 池，不计入存活的 image
        let images = (0..image_count).map(|_| self.new_handle()).collect();

        let mut state = self.state.lock();
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            assert!(state.swapchains.contains_key(&desc.old_swapchain));
        }
        state.swapchains.insert(
            swapchain,
            MockSwapchain {
                image_count,
                next_image: 0,
            },
        );
        Ok(GfxSwapchainImages {
            swapchain,
            images,
            format: vk::Format::B8G8R8A8_SRGB,
            extent: desc.extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        assert!(self.state.lock().swapchains.remove(&swapchain).is_some(), "double free of {:?}", swapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal_semaphore: vk::Semaphore,
    ) -> GfxResult<(u32, GfxSwapchainStatus)> {
        let mut state = self.state.lock();
        assert!(state.semaphores.contains_key(&signal_semaphore));
        if std::mem::take(&mut state.timeout_on_acquire) {
            return Err(GfxError::Timeout {
                what: "swapchain image acquire",
                timeout_ns,
            });
        }
        if std::mem::take(&mut state.out_of_date_on_acquire) {
            return Ok((0, GfxSwapchainStatus::OutOfDate));
        }
        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or(GfxError::from_vk("vkAcquireNextImageKHR", vk::Result::ERROR_SURFACE_LOST_KHR))?;
        let image_index = chain.next_image;
        chain.next_image = (chain.next_image + 1) % chain.image_count;
        Ok((image_index, GfxSwapchainStatus::Optimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> GfxResult<GfxSwapchainStatus> {
        let mut state = self.state.lock();
        state.presents.push(MockPresent {
            swapchain,
            image_index,
            wait_semaphore,
        });
        if std::mem::take(&mut state.out_of_date_on_present) {
            return Ok(GfxSwapchainStatus::OutOfDate);
        }
        Ok(GfxSwapchainStatus::Optimal)
    }
}

// tools
impl MockBackend {
    fn record(&self, command: MockCommand) {
        self.state.lock().commands.push(command);
    }

    fn take_creation_failure(&self, call: &'static str) -> GfxResult<()> {
        let mut state = self.state.lock();
        match state.fail_creation_after {
            Some(0) => {
                state.fail_creation_after = None;
                Err(GfxError::from_vk(call, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
            }
            Some(count) => {
                state.fail_creation_after = Some(count - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn new_other<T: Handle + Copy>(&self) -> T {
        let handle: T = self.new_handle();
        self.state.lock().other_objects.insert(handle.as_raw());
        handle
    }

    fn destroy_other<T: Handle + Copy + std::fmt::Debug>(&self, handle: T) {
        let raw = handle.as_raw();
        assert!(self.state.lock().other_objects.remove(&raw), "double free of {:?}", handle);
    }
}
