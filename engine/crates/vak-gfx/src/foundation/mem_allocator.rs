use std::ops::Deref;

use ash::vk;

use crate::error::{GfxResult, VkResultExt};

pub struct GfxMemAllocator {
    inner: vk_mem::Allocator,
}

impl GfxMemAllocator {
    /// vma 需要引用 Instance 以及 Device，并确保在其生命周期之内这两个的引用是有效的。
    /// 因此需要在其他部分都初始化完成后再初始化 vma，并在 Device 销毁之前 drop
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> GfxResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;

        let inner = unsafe { vk_mem::Allocator::new(vma_ci) }.gfx_call("vmaCreateAllocator")?;
        Ok(Self { inner })
    }
}

impl Deref for GfxMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
