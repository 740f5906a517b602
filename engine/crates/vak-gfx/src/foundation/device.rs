use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::error::{GfxResult, VkResultExt};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及用到的扩展函数指针。vulkan 1.3 中 dynamic rendering、synchronization2、
/// timeline semaphore、descriptor indexing、buffer device address 都已经是核心功能，直接通过 `ash::Device` 调用。
pub struct GfxDevice {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 调试工具扩展 API
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
    /// 交换链扩展 API，没有 surface 时为 None
    pub(crate) swapchain: Option<ash::khr::swapchain::Device>,
}

// new & init
impl GfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_family_index: u32,
        enable_swapchain: bool,
    ) -> GfxResult<Self> {
        let _span = profile_span!("GfxDevice::new");

        // device 所需的所有 extension
        let device_exts = Self::basic_device_exts(enable_swapchain).iter().map(|e| e.as_ptr()).collect_vec();
        let mut exts_str = String::new();
        for ext in &device_exts {
            exts_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("device exts: {}", exts_str);

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);

        // device 所需的所有 features
        let mut features_12 = Self::vulkan_12_features();
        let mut features_13 = Self::vulkan_13_features();
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .features(Self::physical_device_basic_features())
            .push_next(&mut features_12)
            .push_next(&mut features_13);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None) }.gfx_call("vkCreateDevice")?;

        let debug_utils = ash::ext::debug_utils::Device::new(instance, &device);
        let swapchain = enable_swapchain.then(|| ash::khr::swapchain::Device::new(instance, &device));

        Ok(Self {
            device,
            debug_utils,
            swapchain,
        })
    }
}

// destroy
impl GfxDevice {
    pub fn destroy(&mut self) {
        log::info!("destroying device");
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn ash_handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }

    #[inline]
    pub fn debug_utils(&self) -> &ash::ext::debug_utils::Device {
        &self.debug_utils
    }
}

// tools
impl GfxDevice {
    /// 必要的 physical device core features
    fn physical_device_basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .multi_draw_indirect(true)
            .shader_int64(true) // 用于 buffer device address
    }

    fn vulkan_12_features() -> vk::PhysicalDeviceVulkan12Features<'static> {
        vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true)
            // bindless
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true) // 即使一些 descriptor 是 invalid
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
    }

    fn vulkan_13_features() -> vk::PhysicalDeviceVulkan13Features<'static> {
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true)
    }

    /// 必要的 device extensions
    fn basic_device_exts(enable_swapchain: bool) -> Vec<&'static CStr> {
        let mut exts = vec![];
        if enable_swapchain {
            exts.push(ash::khr::swapchain::NAME);
        }
        exts
    }
}
