use ash::vk;

use crate::{
    backend::GfxStorageClass,
    commands::{
        barrier::{GfxBarrierMask, GfxImageBarrier, GfxStageAccess},
        command_list::GfxCommandList,
    },
    error::{GfxError, GfxResult},
    pool::handle::Handle,
    resources::format::GfxFormatUtils,
};

pub type TextureHandle = Handle<GfxTexture>;

/// texture 的初始数据
#[derive(Clone, Copy, Debug)]
pub enum GfxTextureData<'a> {
    /// 只有 mip 0
    Level0(&'a [u8]),
    /// 从 mip 0 开始的完整（或部分）mip 链，通常是预先压缩好的 BC 数据
    MipChain(&'a [&'a [u8]]),
}

impl<'a> GfxTextureData<'a> {
    pub fn levels(&self) -> Vec<&'a [u8]> {
        match *self {
            GfxTextureData::Level0(data) => vec![data],
            GfxTextureData::MipChain(levels) => levels.to_vec(),
        }
    }
}

/// 创建 texture 的参数
#[derive(Clone, Copy, Debug)]
pub struct GfxTextureDesc<'a> {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub storage: GfxStorageClass,
    pub mip_levels: u32,
    pub initial_data: Option<GfxTextureData<'a>>,
    pub debug_name: &'a str,
}

impl Default for GfxTextureDesc<'_> {
    fn default() -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: vk::Extent3D {
                width: 1,
                height: 1,
                depth: 1,
            },
            usage: vk::ImageUsageFlags::SAMPLED,
            storage: GfxStorageClass::DeviceLocal,
            mip_levels: 1,
            initial_data: None,
            debug_name: "unnamed",
        }
    }
}

impl<'a> GfxTextureDesc<'a> {
    /// 2D 纹理的便捷构造
    pub fn new_2d(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags, debug_name: &'a str) -> Self {
        Self {
            format,
            extent: extent.into(),
            usage,
            debug_name,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> GfxResult<()> {
        let invalid = |msg: String| Err(GfxError::InvalidDesc(format!("texture {}: {}", self.debug_name, msg)));

        if self.extent.width == 0 || self.extent.height == 0 || self.extent.depth == 0 {
            return invalid(format!("zero extent {:?}", self.extent));
        }
        if self.format == vk::Format::UNDEFINED {
            return invalid("undefined format".to_string());
        }
        let max_levels = GfxFormatUtils::max_mip_levels(self.extent);
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return invalid(format!("mip levels {} out of range 1..={}", self.mip_levels, max_levels));
        }
        if let Some(data) = self.initial_data {
            let levels = data.levels();
            if levels.is_empty() || levels.len() as u32 > self.mip_levels {
                return invalid(format!("{} data levels for {} mip levels", levels.len(), self.mip_levels));
            }
        }
        Ok(())
    }

    /// device local 的纹理只能通过 copy 写入
    pub(crate) fn effective_usage(&self) -> vk::ImageUsageFlags {
        let mut usage = self.usage;
        if self.storage == GfxStorageClass::DeviceLocal || self.initial_data.is_some() {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        usage
    }

    pub(crate) fn view_type(&self) -> vk::ImageViewType {
        match self.image_type {
            vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
            vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
            _ => vk::ImageViewType::TYPE_2D,
        }
    }
}

/// texture 池中的热数据
///
/// `layout` 是 image 最后一次被 GPU 访问时的 layout，只能通过 [`GfxTexture::transition`] 修改
#[derive(Default, Debug)]
pub struct GfxTexture {
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) image_type: vk::ImageType,
    pub(crate) extent: vk::Extent3D,
    pub(crate) format: vk::Format,
    pub(crate) usage: vk::ImageUsageFlags,
    pub(crate) mip_levels: u32,
    pub(crate) aspect: vk::ImageAspectFlags,

    layout: vk::ImageLayout,
}

/// texture 池中的冷数据
#[derive(Default, Debug, Clone)]
pub struct GfxTextureMeta {
    pub debug_name: String,
    pub storage: GfxStorageClass,
    /// 外部的 image（例如 swapchain image），只拥有 view，不拥有 image 和内存
    pub external: bool,
}

// new & init
impl GfxTexture {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        image: vk::Image,
        view: vk::ImageView,
        image_type: vk::ImageType,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mip_levels: u32,
    ) -> Self {
        Self {
            image,
            view,
            image_type,
            extent,
            format,
            usage,
            mip_levels,
            aspect: GfxFormatUtils::aspect_flags(format),
            layout: vk::ImageLayout::UNDEFINED,
        }
    }
}

// getters
impl GfxTexture {
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// 可以出现在 bindless 纹理数组中
    #[inline]
    pub fn is_sampled(&self) -> bool {
        self.usage.contains(vk::ImageUsageFlags::SAMPLED) && self.aspect == vk::ImageAspectFlags::COLOR
    }
}

// layout
impl GfxTexture {
    /// 记录一个 layout 转换的 barrier，并在同一步更新 `layout`
    ///
    /// 这是整个 crate 中唯一修改 texture layout 的地方
    pub(crate) fn transition(
        &mut self,
        cmd: &GfxCommandList,
        new_layout: vk::ImageLayout,
        src: GfxStageAccess,
        dst: GfxStageAccess,
    ) {
        let barrier = GfxImageBarrier::new()
            .image(self.image)
            .layout_transfer(self.layout, new_layout)
            .mask(GfxBarrierMask::new(src, dst))
            .image_aspect_flag(self.aspect);
        cmd.record_image_barrier(&barrier);
        self.layout = new_layout;
    }

    /// stage 和 access 由前后两个 layout 推导
    pub(crate) fn transition_to(&mut self, cmd: &GfxCommandList, new_layout: vk::ImageLayout) {
        let src = GfxStageAccess::for_layout(self.layout);
        let dst = GfxStageAccess::for_layout(new_layout);
        self.transition(cmd, new_layout, src, dst);
    }
}
