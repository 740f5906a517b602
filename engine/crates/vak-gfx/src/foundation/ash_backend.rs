use std::{
    collections::HashMap,
    ffi::CString,
    mem::ManuallyDrop,
};

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use vk_mem::Alloc;

use crate::{
    backend::{
        GfxBackend, GfxBufferAllocDesc, GfxBufferAllocation, GfxDescriptorBinding, GfxDescriptorWrite,
        GfxImageAllocDesc, GfxImageViewDesc, GfxMappedPtr, GfxRenderingInfo, GfxStorageClass, GfxSwapchainDesc,
        GfxSwapchainImages, GfxSwapchainStatus,
    },
    commands::submit_info::GfxSubmitInfo,
    error::{GfxError, GfxResult, VkResultExt},
    foundation::{
        debug_messenger::GfxDebugMessenger, device::GfxDevice, instance::GfxInstance, mem_allocator::GfxMemAllocator,
        physical_device::GfxPhysicalDevice, surface::GfxSurface,
    },
};

const ENGINE_NAME: &str = "Vak";

/// 创建 [`AshBackend`] 的参数
#[derive(Clone, Copy, Debug)]
pub struct AshBackendDesc<'a> {
    pub app_name: &'a str,
    pub enable_validation: bool,
    /// 为 None 时不创建 surface，也不能创建 swapchain
    pub window: Option<(RawDisplayHandle, RawWindowHandle)>,
}

/// vma 分配的内存，以及是否被持久映射
struct AshAllocation {
    allocation: vk_mem::Allocation,
    mapped: bool,
}

/// 基于 ash + vk-mem 的 [`GfxBackend`] 实现
///
/// 使用一个同时支持 graphics / compute / transfer / present 的 queue，所有 queue 操作由一把锁串行化。
/// buffer 和 image 的 vma allocation 保存在 backend 内部，调用方只看到 vulkan handle。
pub struct AshBackend {
    _vk_entry: ash::Entry,
    instance: GfxInstance,
    debug_messenger: Option<GfxDebugMessenger>,
    surface: Option<GfxSurface>,
    physical_device: GfxPhysicalDevice,
    device: GfxDevice,
    /// 必须在 device 之前销毁
    allocator: ManuallyDrop<GfxMemAllocator>,

    queue: Mutex<vk::Queue>,

    buffer_allocations: Mutex<HashMap<vk::Buffer, AshAllocation>>,
    image_allocations: Mutex<HashMap<vk::Image, AshAllocation>>,
}

// new & init
impl AshBackend {
    pub fn new(desc: &AshBackendDesc) -> GfxResult<Self> {
        let _span = profile_span!("AshBackend::new");

        let vk_entry = unsafe { ash::Entry::load() }.map_err(|e| {
            log::error!("failed to load vulkan entry: {}", e);
            GfxError::Loading(e.to_string())
        })?;

        let extra_instance_exts = match desc.window {
            Some((display, _)) => GfxSurface::required_instance_exts(display)?,
            None => vec![],
        };
        let instance = GfxInstance::new(
            &vk_entry,
            desc.app_name,
            ENGINE_NAME,
            &extra_instance_exts,
            desc.enable_validation,
        )?;
        let debug_messenger = if instance.validation_enabled() {
            Some(GfxDebugMessenger::new(&vk_entry, instance.ash_instance())?)
        } else {
            None
        };

        let surface = match desc.window {
            Some((display, window)) => Some(GfxSurface::new(&vk_entry, instance.ash_instance(), display, window)?),
            None => None,
        };
        let physical_device = GfxPhysicalDevice::pick(instance.ash_instance(), surface.as_ref())?;
        let device = GfxDevice::new(
            instance.ash_instance(),
            physical_device.handle,
            physical_device.graphics_queue_family,
            surface.is_some(),
        )?;
        let queue = unsafe { device.device.get_device_queue(physical_device.graphics_queue_family, 0) };
        let allocator = GfxMemAllocator::new(instance.ash_instance(), physical_device.handle, &device.device)?;

        log::info!(
            "vulkan backend ready on {} (queue family {})",
            physical_device.device_name(),
            physical_device.graphics_queue_family
        );
        Ok(Self {
            _vk_entry: vk_entry,
            instance,
            debug_messenger,
            surface,
            physical_device,
            device,
            allocator: ManuallyDrop::new(allocator),
            queue: Mutex::new(queue),
            buffer_allocations: Mutex::new(HashMap::new()),
            image_allocations: Mutex::new(HashMap::new()),
        })
    }
}

// destroy
impl Drop for AshBackend {
    fn drop(&mut self) {
        log::info!("destroying vulkan backend");
        unsafe {
            if let Err(e) = self.device.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during shutdown: {:?}", e);
            }
        }

        let leaked_buffers = self.buffer_allocations.get_mut().len();
        let leaked_images = self.image_allocations.get_mut().len();
        if leaked_buffers > 0 || leaked_images > 0 {
            log::warn!("{} buffers and {} images are still alive at shutdown", leaked_buffers, leaked_images);
        }
        for (buffer, mut allocation) in self.buffer_allocations.get_mut().drain() {
            unsafe {
                if allocation.mapped {
                    self.allocator.unmap_memory(&mut allocation.allocation);
                }
                self.allocator.destroy_buffer(buffer, &mut allocation.allocation);
            }
        }
        for (image, mut allocation) in self.image_allocations.get_mut().drain() {
            unsafe { self.allocator.destroy_image(image, &mut allocation.allocation) };
        }

        // vma 引用了 device，必须先于 device 销毁
        unsafe { ManuallyDrop::drop(&mut self.allocator) };
        self.device.destroy();
        if let Some(surface) = self.surface.as_mut() {
            surface.destroy();
        }
        if let Some(debug_messenger) = self.debug_messenger.as_mut() {
            debug_messenger.destroy();
        }
        self.instance.destroy();
    }
}

// getters
impl AshBackend {
    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn device(&self) -> &GfxDevice {
        &self.device
    }

    #[inline]
    fn vk_device(&self) -> &ash::Device {
        &self.device.device
    }

    fn swapchain_pf(&self) -> GfxResult<(&GfxSurface, &ash::khr::swapchain::Device)> {
        match (self.surface.as_ref(), self.device.swapchain.as_ref()) {
            (Some(surface), Some(swapchain)) => Ok((surface, swapchain)),
            _ => Err(GfxError::InvalidDesc("backend was created without a window surface".to_string())),
        }
    }
}

// tools
impl AshBackend {
    /// swapchain 相关调用的结果：ERROR_OUT_OF_DATE_KHR 不是错误
    fn swapchain_status(call: &'static str, result: Result<bool, vk::Result>) -> GfxResult<GfxSwapchainStatus> {
        match result {
            Ok(false) => Ok(GfxSwapchainStatus::Optimal),
            Ok(true) => Ok(GfxSwapchainStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(GfxSwapchainStatus::OutOfDate),
            Err(e) => Err(GfxError::from_vk(call, e)),
        }
    }
}

impl GfxBackend for AshBackend {
    fn device_name(&self) -> String {
        self.physical_device.device_name()
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let _queue = self.queue.lock();
        unsafe { self.vk_device().device_wait_idle() }.gfx_call("vkDeviceWaitIdle")
    }

    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str) {
        let Ok(name) = CString::new(name) else {
            log::warn!("debug name {:?} contains a nul byte", name);
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT {
            object_type,
            object_handle: raw_handle,
            p_object_name: name.as_ptr(),
            ..Default::default()
        };
        if let Err(e) = unsafe { self.device.debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    fn create_buffer(&self, desc: &GfxBufferAllocDesc<'_>) -> GfxResult<GfxBufferAllocation> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = match desc.storage {
            GfxStorageClass::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            GfxStorageClass::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                ..Default::default()
            },
        };

        let (buffer, mut allocation) =
            unsafe { self.allocator.create_buffer(&buffer_ci, &alloc_ci) }.gfx_call("vmaCreateBuffer")?;

        let mapped = match desc.storage {
            GfxStorageClass::DeviceLocal => None,
            GfxStorageClass::HostVisible => match unsafe { self.allocator.map_memory(&mut allocation) } {
                Ok(ptr) => GfxMappedPtr::new(ptr),
                Err(e) => {
                    unsafe { self.allocator.destroy_buffer(buffer, &mut allocation) };
                    log::error!("failed to map buffer {}: {:?}", desc.debug_name, e);
                    return Err(GfxError::from_vk("vmaMapMemory", e));
                }
            },
        };

        let device_address = desc.usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            self.vk_device().get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        });

        self.buffer_allocations.lock().insert(
            buffer,
            AshAllocation {
                allocation,
                mapped: mapped.is_some(),
            },
        );
        Ok(GfxBufferAllocation {
            buffer,
            mapped,
            device_address,
        })
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let Some(mut allocation) = self.buffer_allocations.lock().remove(&buffer) else {
            log::error!("destroy unknown buffer {:?}", buffer);
            return;
        };
        unsafe {
            if allocation.mapped {
                self.allocator.unmap_memory(&mut allocation.allocation);
            }
            self.allocator.destroy_buffer(buffer, &mut allocation.allocation);
        }
    }

    fn flush_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> GfxResult<()> {
        let allocations = self.buffer_allocations.lock();
        let allocation = allocations
            .get(&buffer)
            .ok_or_else(|| GfxError::InvalidDesc(format!("flush unknown buffer {:?}", buffer)))?;
        self.allocator.flush_allocation(&allocation.allocation, offset, size).gfx_call("vmaFlushAllocation")
    }

    fn create_image(&self, desc: &GfxImageAllocDesc) -> GfxResult<vk::Image> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: match desc.storage {
                GfxStorageClass::DeviceLocal => vk_mem::MemoryUsage::AutoPreferDevice,
                GfxStorageClass::HostVisible => vk_mem::MemoryUsage::Auto,
            },
            ..Default::default()
        };

        let (image, allocation) =
            unsafe { self.allocator.create_image(&image_ci, &alloc_ci) }.gfx_call("vmaCreateImage")?;
        self.image_allocations.lock().insert(
            image,
            AshAllocation {
                allocation,
                mapped: false,
            },
        );
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        let Some(mut allocation) = self.image_allocations.lock().remove(&image) else {
            log::error!("destroy unknown image {:?}", image);
            return;
        };
        unsafe { self.allocator.destroy_image(image, &mut allocation.allocation) };
    }

    fn create_image_view(&self, desc: &GfxImageViewDesc) -> GfxResult<vk::ImageView> {
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.vk_device().create_image_view(&view_ci, None) }.gfx_call("vkCreateImageView")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.vk_device().destroy_image_view(view, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> GfxResult<vk::Sampler> {
        unsafe { self.vk_device().create_sampler(info, None) }.gfx_call("vkCreateSampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.vk_device().destroy_sampler(sampler, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[GfxDescriptorBinding],
        update_after_bind: bool,
    ) -> GfxResult<vk::DescriptorSetLayout> {
        let vk_bindings = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect_vec();
        let binding_flags = bindings.iter().map(|binding| binding.flags).collect_vec();
        let mut binding_flags_ci =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

        let flags = if update_after_bind {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&vk_bindings)
            .flags(flags)
            .push_next(&mut binding_flags_ci);
        unsafe { self.vk_device().create_descriptor_set_layout(&layout_ci, None) }
            .gfx_call("vkCreateDescriptorSetLayout")
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.vk_device().destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(
        &self,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
        update_after_bind: bool,
    ) -> GfxResult<vk::DescriptorPool> {
        let flags = if update_after_bind {
            vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let pool_ci = vk::DescriptorPoolCreateInfo::default().pool_sizes(pool_sizes).max_sets(max_sets).flags(flags);
        unsafe { self.vk_device().create_descriptor_pool(&pool_ci, None) }.gfx_call("vkCreateDescriptorPool")
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.vk_device().destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> GfxResult<vk::DescriptorSet> {
        let alloc_info =
            vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(std::slice::from_ref(&layout));
        let sets = unsafe { self.vk_device().allocate_descriptor_sets(&alloc_info) }
            .gfx_call("vkAllocateDescriptorSets")?;
        sets.first()
            .copied()
            .ok_or(GfxError::from_vk("vkAllocateDescriptorSets", vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn update_descriptor_sets(&self, writes: &[GfxDescriptorWrite]) {
        let vk_writes = writes
            .iter()
            .map(|write| {
                vk::WriteDescriptorSet::default()
                    .dst_set(write.dst_set)
                    .dst_binding(write.dst_binding)
                    .dst_array_element(write.dst_array_element)
                    .descriptor_type(write.descriptor_type)
                    .image_info(&write.image_infos)
            })
            .collect_vec();
        unsafe { self.vk_device().update_descriptor_sets(&vk_writes, &[]) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> GfxResult<vk::PipelineLayout> {
        let layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe { self.vk_device().create_pipeline_layout(&layout_ci, None) }.gfx_call("vkCreatePipelineLayout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.vk_device().destroy_pipeline_layout(layout, None) }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.vk_device().destroy_pipeline(pipeline, None) }
    }

    fn create_fence(&self, signaled: bool) -> GfxResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe { self.vk_device().create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .gfx_call("vkCreateFence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.vk_device().destroy_fence(fence, None) }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> GfxResult<bool> {
        unsafe { self.vk_device().get_fence_status(fence) }.gfx_call("vkGetFenceStatus")
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout_ns: u64) -> GfxResult<bool> {
        let _span = profile_span!("AshBackend::wait_for_fences");
        match unsafe { self.vk_device().wait_for_fences(fences, wait_all, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(GfxError::from_vk("vkWaitForFences", e)),
        }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> GfxResult<()> {
        unsafe { self.vk_device().reset_fences(fences) }.gfx_call("vkResetFences")
    }

    fn create_semaphore(&self, timeline_initial_value: Option<u64>) -> GfxResult<vk::Semaphore> {
        let mut type_ci = vk::SemaphoreTypeCreateInfo::default();
        let mut semaphore_ci = vk::SemaphoreCreateInfo::default();
        if let Some(initial_value) = timeline_initial_value {
            type_ci = type_ci.semaphore_type(vk::SemaphoreType::TIMELINE).initial_value(initial_value);
            semaphore_ci = semaphore_ci.push_next(&mut type_ci);
        }
        unsafe { self.vk_device().create_semaphore(&semaphore_ci, None) }.gfx_call("vkCreateSemaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.vk_device().destroy_semaphore(semaphore, None) }
    }

    fn semaphore_counter_value(&self, semaphore: vk::Semaphore) -> GfxResult<u64> {
        unsafe { self.vk_device().get_semaphore_counter_value(semaphore) }.gfx_call("vkGetSemaphoreCounterValue")
    }

    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags) -> GfxResult<vk::CommandPool> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.physical_device.graphics_queue_family)
            .flags(flags);
        unsafe { self.vk_device().create_command_pool(&pool_ci, None) }.gfx_call("vkCreateCommandPool")
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.vk_device().destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> GfxResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.vk_device().allocate_command_buffers(&alloc_info) }.gfx_call("vkAllocateCommandBuffers")
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> GfxResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.vk_device().begin_command_buffer(command_buffer, &begin_info) }.gfx_call("vkBeginCommandBuffer")
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        unsafe { self.vk_device().end_command_buffer(command_buffer) }.gfx_call("vkEndCommandBuffer")
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> GfxResult<()> {
        unsafe { self.vk_device().reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }
            .gfx_call("vkResetCommandBuffer")
    }

    fn queue_submit(&self, submit: &GfxSubmitInfo, fence: vk::Fence) -> GfxResult<()> {
        let queue = self.queue.lock();
        submit
            .with_vk_submit_info(|submit_info| unsafe {
                self.vk_device().queue_submit2(*queue, std::slice::from_ref(submit_info), fence)
            })
            .map_err(GfxError::from_submit)
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier2<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier2<'_>],
    ) {
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe { self.vk_device().cmd_pipeline_barrier2(command_buffer, &dependency_info) }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.vk_device().cmd_copy_buffer(command_buffer, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe { self.vk_device().cmd_copy_buffer_to_image(command_buffer, src, dst, dst_layout, regions) }
    }

    fn cmd_begin_rendering(&self, command_buffer: vk::CommandBuffer, info: &GfxRenderingInfo) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(info.color.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: info.color.clear_color,
                },
            });
        let depth_attachment = info.depth.map(|depth| {
            vk::RenderingAttachmentInfo::default()
                .image_view(depth.view)
                .image_layout(depth.layout)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: depth.clear_depth,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: info.extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));
        if let Some(depth_attachment) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }
        unsafe { self.vk_device().cmd_begin_rendering(command_buffer, &rendering_info) }
    }

    fn cmd_end_rendering(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.vk_device().cmd_end_rendering(command_buffer) }
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.vk_device().cmd_set_viewport(command_buffer, 0, std::slice::from_ref(&viewport)) }
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.vk_device().cmd_set_scissor(command_buffer, 0, std::slice::from_ref(&scissor)) }
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.vk_device().cmd_bind_pipeline(command_buffer, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.vk_device().cmd_bind_descriptor_sets(
                command_buffer,
                bind_point,
                layout,
                set_index,
                std::slice::from_ref(&set),
                &[],
            )
        }
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe { self.vk_device().cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[offset]) }
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe { self.vk_device().cmd_bind_index_buffer(command_buffer, buffer, offset, index_type) }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        unsafe { self.vk_device().cmd_push_constants(command_buffer, layout, stages, 0, data) }
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.vk_device().cmd_draw(command_buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.vk_device().cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn cmd_draw_indexed_indirect(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe { self.vk_device().cmd_draw_indexed_indirect(command_buffer, buffer, offset, draw_count, stride) }
    }

    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]) {
        let name = CString::new(name).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(color);
        unsafe { self.device.debug_utils.cmd_begin_debug_utils_label(command_buffer, &label) }
    }

    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.debug_utils.cmd_end_debug_utils_label(command_buffer) }
    }

    fn create_swapchain(&self, desc: &GfxSwapchainDesc) -> GfxResult<GfxSwapchainImages> {
        let (surface, swapchain_pf) = self.swapchain_pf()?;
        let pdevice = self.physical_device.handle;

        let surface_capabilities = surface.capabilities(pdevice)?;
        let surface_format = surface.pick_format(pdevice)?;
        let present_mode = surface.pick_present_mode(pdevice, desc.prefer_mailbox)?;
        let extent = GfxSurface::calculate_swapchain_extent(&surface_capabilities, desc.extent);
        log::info!(
            "create swapchain: surface current extent: {}x{}, window extent: {}x{}, final extent: {}x{}, {:?}",
            surface_capabilities.current_extent.width,
            surface_capabilities.current_extent.height,
            desc.extent.width,
            desc.extent.height,
            extent.width,
            extent.height,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(GfxSurface::calculate_image_count(&surface_capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        let swapchain =
            unsafe { swapchain_pf.create_swapchain(&create_info, None) }.gfx_call("vkCreateSwapchainKHR")?;
        let images = match unsafe { swapchain_pf.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_pf.destroy_swapchain(swapchain, None) };
                return Err(GfxError::from_vk("vkGetSwapchainImagesKHR", e));
            }
        };

        Ok(GfxSwapchainImages {
            swapchain,
            images,
            format: surface_format.format,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(swapchain_pf) = self.device.swapchain.as_ref() {
            unsafe { swapchain_pf.destroy_swapchain(swapchain, None) }
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal_semaphore: vk::Semaphore,
    ) -> GfxResult<(u32, GfxSwapchainStatus)> {
        let (_, swapchain_pf) = self.swapchain_pf()?;
        let result =
            unsafe { swapchain_pf.acquire_next_image(swapchain, timeout_ns, signal_semaphore, vk::Fence::null()) };
        match result {
            Ok((image_index, suboptimal)) => {
                Ok((image_index, Self::swapchain_status("vkAcquireNextImageKHR", Ok(suboptimal))?))
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(GfxError::Timeout {
                what: "swapchain image acquire",
                timeout_ns,
            }),
            Err(e) => Ok((0, Self::swapchain_status("vkAcquireNextImageKHR", Err(e))?)),
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> GfxResult<GfxSwapchainStatus> {
        let (_, swapchain_pf) = self.swapchain_pf()?;
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.queue.lock();
        let result = unsafe { swapchain_pf.queue_present(*queue, &present_info) };
        Self::swapchain_status("vkQueuePresentKHR", result)
    }
}

