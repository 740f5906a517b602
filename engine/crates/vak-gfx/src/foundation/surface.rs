use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{GfxError, GfxResult, VkResultExt};

/// 窗口的 surface
pub struct GfxSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

// new & init
impl GfxSurface {
    pub fn new(
        vk_entry: &ash::Entry,
        instance: &ash::Instance,
        raw_display_handle: RawDisplayHandle,
        raw_window_handle: RawWindowHandle,
    ) -> GfxResult<Self> {
        let pf = ash::khr::surface::Instance::new(vk_entry, instance);
        let handle = unsafe {
            ash_window::create_surface(vk_entry, instance, raw_display_handle, raw_window_handle, None)
        }
        .gfx_call("vkCreateSurfaceKHR")?;

        Ok(Self { handle, pf })
    }

    /// 创建 surface 需要的 instance extensions
    pub fn required_instance_exts(raw_display_handle: RawDisplayHandle) -> GfxResult<Vec<&'static std::ffi::CStr>> {
        let exts =
            ash_window::enumerate_required_extensions(raw_display_handle).gfx_call("enumerate_required_extensions")?;
        // ash_window 返回的指针都指向 'static 的字符串常量
        Ok(exts.iter().map(|ext| unsafe { std::ffi::CStr::from_ptr(*ext) }).collect())
    }
}

// destroy
impl GfxSurface {
    pub fn destroy(&mut self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}

// getters
impl GfxSurface {
    pub fn supports_present(&self, pdevice: vk::PhysicalDevice, queue_family_index: u32) -> GfxResult<bool> {
        unsafe { self.pf.get_physical_device_surface_support(pdevice, queue_family_index, self.handle) }
            .gfx_call("vkGetPhysicalDeviceSurfaceSupportKHR")
    }

    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle) }
            .gfx_call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    /// 优先选择 B8G8R8A8_UNORM + SRGB_NONLINEAR，否则使用第一个
    pub fn pick_format(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceFormatKHR> {
        let formats = unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle) }
            .gfx_call("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let preferred = formats.iter().find(|format| {
            format.format == vk::Format::B8G8R8A8_UNORM && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        });
        preferred.or(formats.first()).copied().ok_or_else(|| {
            log::error!("surface reports no formats");
            GfxError::from_vk("vkGetPhysicalDeviceSurfaceFormatsKHR", vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
        })
    }

    /// FIFO 总是可用
    pub fn pick_present_mode(
        &self,
        pdevice: vk::PhysicalDevice,
        prefer_mailbox: bool,
    ) -> GfxResult<vk::PresentModeKHR> {
        let modes = unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle) }
            .gfx_call("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
            Ok(vk::PresentModeKHR::MAILBOX)
        } else {
            Ok(vk::PresentModeKHR::FIFO)
        }
    }
}

// tools
impl GfxSurface {
    /// 确定 swapchain 的 extent
    ///
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }

    /// max_image_count == 0，表示不限制 image 数量
    pub fn calculate_image_count(surface_capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
        if surface_capabilities.max_image_count == 0 {
            surface_capabilities.min_image_count + 1
        } else {
            u32::min(surface_capabilities.max_image_count, surface_capabilities.min_image_count + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_fixed_surface_extent_wins() {
        let caps = capabilities(vk::Extent2D {
            width: 800,
            height: 600,
        });
        let extent = GfxSurface::calculate_swapchain_extent(&caps, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_window_extent_is_clamped() {
        let caps = capabilities(vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        });
        let extent = GfxSurface::calculate_swapchain_extent(
            &caps,
            vk::Extent2D {
                width: 8000,
                height: 500,
            },
        );
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 500 });
    }

    #[test]
    fn test_image_count() {
        let mut caps = capabilities(vk::Extent2D::default());
        assert_eq!(GfxSurface::calculate_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(GfxSurface::calculate_image_count(&caps), 2);
        caps.max_image_count = 0;
        assert_eq!(GfxSurface::calculate_image_count(&caps), 3);
    }
}
