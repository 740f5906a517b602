use std::sync::Arc;

use ash::vk;

use crate::{
    backend::{GfxBackend, GfxSwapchainDesc, GfxSwapchainStatus, set_debug_name},
    error::{GfxError, GfxResult},
    resources::{resource_manager::GfxResourceManager, texture::TextureHandle},
};

/// swapchain image 的 usage，TRANSFER_DST 用于 Nsight 分析
const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// swapchain 以及注册到 texture 池中的 image
///
/// 每个 image 有一个自己的 render-complete semaphore：present 之前 image 不会被再次 acquire，
/// 所以按 image 复用 binary semaphore 是安全的。
pub struct GfxSwapchain {
    backend: Arc<dyn GfxBackend>,
    swapchain: vk::SwapchainKHR,

    images: Vec<vk::Image>,
    /// image 在 texture 池中的 handle，layout 由 texture 池跟踪
    textures: Vec<TextureHandle>,
    present_semaphores: Vec<vk::Semaphore>,

    format: vk::Format,
    extent: vk::Extent2D,
    prefer_mailbox: bool,

    needs_recreate: bool,
}

// new & init
impl GfxSwapchain {
    pub fn new(
        backend: Arc<dyn GfxBackend>,
        resources: &mut GfxResourceManager,
        window_extent: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> GfxResult<Self> {
        let mut swapchain = Self {
            backend,
            swapchain: vk::SwapchainKHR::null(),
            images: vec![],
            textures: vec![],
            present_semaphores: vec![],
            format: vk::Format::UNDEFINED,
            extent: window_extent,
            prefer_mailbox,
            needs_recreate: false,
        };
        if let Err(err) = swapchain.create(resources, window_extent) {
            log::error!("swapchain creation failed: {}", err);
            if let Err(destroy_err) = swapchain.destroy(resources) {
                log::error!("failed to release partially created swapchain: {}", destroy_err);
            }
            return Err(err);
        }
        Ok(swapchain)
    }

    /// 用新的尺寸重建 swapchain，旧的 texture handle 全部失效
    ///
    /// 调用方需要保证 GPU 已经不再使用旧的 image
    pub fn recreate(&mut self, resources: &mut GfxResourceManager, window_extent: vk::Extent2D) -> GfxResult<()> {
        log::info!(
            "recreate swapchain: {}x{} -> {}x{}",
            self.extent.width,
            self.extent.height,
            window_extent.width,
            window_extent.height
        );
        self.release_images(resources)?;
        self.create(resources, window_extent)?;
        self.needs_recreate = false;
        Ok(())
    }

    fn create(&mut self, resources: &mut GfxResourceManager, window_extent: vk::Extent2D) -> GfxResult<()> {
        if window_extent.width == 0 || window_extent.height == 0 {
            return Err(GfxError::InvalidDesc(format!("swapchain extent {:?} is empty", window_extent)));
        }

        let old_swapchain = self.swapchain;
        let created = self.backend.create_swapchain(&GfxSwapchainDesc {
            extent: window_extent,
            prefer_mailbox: self.prefer_mailbox,
            old_swapchain,
        })?;
        if old_swapchain != vk::SwapchainKHR::null() {
            self.backend.destroy_swapchain(old_swapchain);
        }
        self.swapchain = created.swapchain;
        set_debug_name(self.backend.as_ref(), self.swapchain, "Swapchain", "main");

        self.format = created.format;
        self.extent = created.extent;
        self.images = created.images;
        // 失败时已经注册的 texture 留在 self.textures 中，由 destroy 释放
        for (idx, image) in self.images.iter().enumerate() {
            let texture = resources.register_external_texture(
                *image,
                self.format,
                self.extent,
                SWAPCHAIN_IMAGE_USAGE,
                &format!("swapchain-{}", idx),
            )?;
            self.textures.push(texture);
        }

        // image 数量可能变化
        while self.present_semaphores.len() < self.images.len() {
            let semaphore = self.backend.create_semaphore(None)?;
            set_debug_name(
                self.backend.as_ref(),
                semaphore,
                "Semaphore",
                &format!("render-complete-{}", self.present_semaphores.len()),
            );
            self.present_semaphores.push(semaphore);
        }
        for semaphore in self.present_semaphores.drain(self.images.len()..) {
            self.backend.destroy_semaphore(semaphore);
        }

        log::info!(
            "swapchain created: {} images, {:?}, {}x{}",
            self.images.len(),
            self.format,
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }
}

// destroy
impl GfxSwapchain {
    /// 调用方需要保证 GPU 已经空闲
    pub fn destroy(&mut self, resources: &mut GfxResourceManager) -> GfxResult<()> {
        if self.swapchain == vk::SwapchainKHR::null() {
            return Ok(());
        }
        let result = self.release_images(resources);
        for semaphore in self.present_semaphores.drain(..) {
            self.backend.destroy_semaphore(semaphore);
        }
        self.backend.destroy_swapchain(self.swapchain);
        self.swapchain = vk::SwapchainKHR::null();
        result
    }

    /// 出错时仍然注销剩下的 texture，返回第一个错误
    fn release_images(&mut self, resources: &mut GfxResourceManager) -> GfxResult<()> {
        let mut result = Ok(());
        for texture in self.textures.drain(..) {
            result = result.and(resources.delete_texture(texture));
        }
        self.images.clear();
        result
    }
}

impl Drop for GfxSwapchain {
    fn drop(&mut self) {
        debug_assert!(self.swapchain == vk::SwapchainKHR::null(), "swapchain must be destroyed manually");
    }
}

// getters
impl GfxSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn texture(&self, image_index: u32) -> Option<TextureHandle> {
        self.textures.get(image_index as usize).copied()
    }

    #[inline]
    pub fn present_semaphore(&self, image_index: u32) -> vk::Semaphore {
        self.present_semaphores[image_index as usize]
    }

    /// acquire 或 present 报告了 out-of-date / suboptimal
    #[inline]
    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }
}

// update
impl GfxSwapchain {
    /// 有 image 被 acquire 之后没有 present，只有重建才能把它还给 swapchain
    #[inline]
    pub(crate) fn mark_needs_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// 返回 None 表示 swapchain 已经 out of date，需要先重建；此时 semaphore 不会被 signal
    pub fn acquire_next_image(&mut self, signal_semaphore: vk::Semaphore, timeout_ns: u64) -> GfxResult<Option<u32>> {
        let (image_index, status) = self.backend.acquire_next_image(self.swapchain, timeout_ns, signal_semaphore)?;
        match status {
            GfxSwapchainStatus::Optimal => Ok(Some(image_index)),
            GfxSwapchainStatus::Suboptimal => {
                log::warn!("swapchain acquire image index {} is not optimal", image_index);
                self.needs_recreate = true;
                Ok(Some(image_index))
            }
            GfxSwapchainStatus::OutOfDate => {
                log::warn!("swapchain is out of date when acquire next image");
                self.needs_recreate = true;
                Ok(None)
            }
        }
    }

    /// 等待 image 的 render-complete semaphore 之后 present
    pub fn present(&mut self, image_index: u32) -> GfxResult<()> {
        let wait_semaphore = self.present_semaphore(image_index);
        let status = self.backend.queue_present(self.swapchain, image_index, wait_semaphore)?;
        match status {
            GfxSwapchainStatus::Optimal => {}
            GfxSwapchainStatus::Suboptimal => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                self.needs_recreate = true;
            }
            GfxSwapchainStatus::OutOfDate => {
                log::warn!("swapchain is out of date when present image");
                self.needs_recreate = true;
            }
        }
        Ok(())
    }
}
