use ash::vk;

use crate::pool::handle::Handle;

pub type SamplerHandle = Handle<GfxSampler>;

// Sampler descriptor
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy: u32,
    pub compare_op: Option<vk::CompareOp>,
    pub mipmap_mode: vk::SamplerMipmapMode,
}
impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_BORDER,
            max_anisotropy: 0,
            compare_op: None,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl GfxSamplerDesc {
    /// 只关心过滤方式和 uv 两个方向的 wrap 模式时使用
    pub fn new(
        min_filter: vk::Filter,
        mag_filter: vk::Filter,
        wrap_u: vk::SamplerAddressMode,
        wrap_v: vk::SamplerAddressMode,
    ) -> Self {
        Self {
            min_filter,
            mag_filter,
            address_mode_u: wrap_u,
            address_mode_v: wrap_v,
            ..Default::default()
        }
    }

    pub(crate) fn to_vk(&self) -> vk::SamplerCreateInfo<'static> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .mipmap_mode(self.mipmap_mode)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        if self.max_anisotropy > 0 {
            create_info = create_info.anisotropy_enable(true).max_anisotropy(self.max_anisotropy as f32);
        } else {
            create_info = create_info.anisotropy_enable(false);
        }

        if let Some(compare_op) = self.compare_op {
            create_info = create_info.compare_enable(true).compare_op(compare_op);
        } else {
            create_info = create_info.compare_enable(false);
        }
        create_info
    }
}

/// sampler 池中的热数据
#[derive(Default, Debug)]
pub struct GfxSampler {
    pub(crate) handle: vk::Sampler,
}

impl GfxSampler {
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

/// sampler 池中的冷数据：保留创建参数用于诊断和重建
#[derive(Default, Debug, Clone)]
pub struct GfxSamplerMeta {
    pub debug_name: String,
    pub desc: Option<GfxSamplerDesc>,
}
