//! 设备后端抽象
//!
//! GFX 层所有对驱动的调用都经过 [`GfxBackend`]。生产环境使用
//! [`AshBackend`](crate::foundation::ash_backend::AshBackend)，测试使用记录调用的 mock。
//! trait 只交换 `vk::*` handle 以及纯数据结构，内存分配等状态由后端自己持有。

#[cfg(test)]
pub(crate) mod mock;

use std::ptr::NonNull;

use ash::vk;

use crate::{commands::submit_info::GfxSubmitInfo, error::GfxResult};

/// host 可见内存的持久映射地址
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxMappedPtr(NonNull<u8>);

// 映射地址在 allocation 销毁之前一直有效，访问由资源池的锁串行化
unsafe impl Send for GfxMappedPtr {}
unsafe impl Sync for GfxMappedPtr {}

impl GfxMappedPtr {
    #[inline]
    pub fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }
}

/// 资源所在的内存类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GfxStorageClass {
    /// 只有 GPU 可以访问，数据只能通过 staging 上传
    #[default]
    DeviceLocal,
    /// CPU 可见并且持久映射
    HostVisible,
}

pub struct GfxBufferAllocDesc<'a> {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub storage: GfxStorageClass,
    pub debug_name: &'a str,
}

/// 后端创建 buffer 的结果
#[derive(Clone, Copy, Debug)]
pub struct GfxBufferAllocation {
    pub buffer: vk::Buffer,
    /// 只有 HostVisible 的 buffer 才有
    pub mapped: Option<GfxMappedPtr>,
    /// 只有 usage 包含 SHADER_DEVICE_ADDRESS 时才有
    pub device_address: Option<vk::DeviceAddress>,
}

#[derive(Clone, Copy, Debug)]
pub struct GfxImageAllocDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub storage: GfxStorageClass,
}

#[derive(Clone, Copy, Debug)]
pub struct GfxImageViewDesc {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct GfxDescriptorBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    pub flags: vk::DescriptorBindingFlags,
}

/// 一次 descriptor 写入，对应一个 `vk::WriteDescriptorSet`
#[derive(Clone, Debug)]
pub struct GfxDescriptorWrite {
    pub dst_set: vk::DescriptorSet,
    pub dst_binding: u32,
    pub dst_array_element: u32,
    pub descriptor_type: vk::DescriptorType,
    pub image_infos: Vec<vk::DescriptorImageInfo>,
}

#[derive(Clone, Copy, Debug)]
pub struct GfxColorAttachment {
    pub view: vk::ImageView,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug)]
pub struct GfxDepthAttachment {
    pub view: vk::ImageView,
    /// DEPTH_ATTACHMENT_OPTIMAL 或者 DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    pub layout: vk::ImageLayout,
    pub clear_depth: f32,
}

/// dynamic rendering 的参数，color attachment 的 layout 固定为 COLOR_ATTACHMENT_OPTIMAL
#[derive(Clone, Copy, Debug)]
pub struct GfxRenderingInfo {
    pub extent: vk::Extent2D,
    pub color: GfxColorAttachment,
    pub depth: Option<GfxDepthAttachment>,
}

#[derive(Clone, Copy, Debug)]
pub struct GfxSwapchainDesc {
    /// 窗口的物理尺寸，最终尺寸由 surface capabilities 决定
    pub extent: vk::Extent2D,
    pub prefer_mailbox: bool,
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Clone, Debug)]
pub struct GfxSwapchainImages {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// acquire / present 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxSwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// 设备后端
///
/// 所有方法都可以在多个线程调用；queue 相关的调用由实现者自己串行化
pub trait GfxBackend: Send + Sync {
    // device
    fn device_name(&self) -> String;
    fn wait_idle(&self) -> GfxResult<()>;
    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str);

    // buffer & image
    fn create_buffer(&self, desc: &GfxBufferAllocDesc<'_>) -> GfxResult<GfxBufferAllocation>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn flush_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> GfxResult<()>;
    fn create_image(&self, desc: &GfxImageAllocDesc) -> GfxResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, desc: &GfxImageViewDesc) -> GfxResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> GfxResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // descriptor & pipeline layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[GfxDescriptorBinding],
        update_after_bind: bool,
    ) -> GfxResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        update_after_bind: bool,
    ) -> GfxResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GfxResult<vk::DescriptorSet>;
    fn update_descriptor_sets(&self, writes: &[GfxDescriptorWrite]);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> GfxResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // sync
    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn fence_signaled(&self, fence: vk::Fence) -> GfxResult<bool>;
    /// 阻塞等待，超时返回 `Ok(false)`
    fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout_ns: u64) -> GfxResult<bool>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()>;
    /// `timeline_initial_value` 为 Some 时创建 timeline semaphore，否则创建 binary semaphore
    fn create_semaphore(&self, timeline_initial_value: Option<u64>) -> GfxResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> GfxResult<u64>;

    // command pool & buffer
    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags) -> GfxResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> GfxResult<Vec<vk::CommandBuffer>>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags)
    -> GfxResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()>;
    fn queue_submit(&self, submit: &GfxSubmitInfo, fence: vk::Fence) -> GfxResult<()>;

    // recording
    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    );
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, info: &GfxRenderingInfo);
    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer);
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize);
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );
    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_draw_indexed_indirect(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    );
    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]);
    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer);

    // presentation
    fn create_swapchain(&self, desc: &GfxSwapchainDesc) -> GfxResult<GfxSwapchainImages>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal_semaphore: vk::Semaphore,
    ) -> GfxResult<(u32, GfxSwapchainStatus)>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> GfxResult<GfxSwapchainStatus>;
}

/// 以 `{type}::{name}` 的格式为 vulkan 对象设置 debug name
pub fn set_debug_name<T: vk::Handle>(backend: &dyn GfxBackend, handle: T, type_name: &str, name: &str) {
    let object_type = T::TYPE;
    backend.set_object_name(object_type, handle.as_raw(), &format!("{}::{}", type_name, name));
}
