use ash::vk;

use crate::error::{GfxError, GfxResult};

/// 一个 texel block 的尺寸：非压缩格式是 1x1，BC 压缩格式是 4x4
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxTexelBlock {
    pub width: u32,
    pub height: u32,
    pub bytes: u32,
}

/// Vulkan 格式相关的工具类
pub struct GfxFormatUtils;
impl GfxFormatUtils {
    /// 每个 texel block 的尺寸和字节数
    ///
    /// 只覆盖渲染器实际用到的格式，其余返回 None
    pub fn texel_block(format: vk::Format) -> Option<GfxTexelBlock> {
        let texel = |bytes| GfxTexelBlock {
            width: 1,
            height: 1,
            bytes,
        };
        let block = |bytes| GfxTexelBlock {
            width: 4,
            height: 4,
            bytes,
        };

        let result = match format {
            vk::Format::R8_UNORM | vk::Format::R8_SRGB | vk::Format::R8_UINT | vk::Format::S8_UINT => texel(1),
            vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::R16_UNORM | vk::Format::D16_UNORM => {
                texel(2)
            }
            vk::Format::R8G8B8_UNORM | vk::Format::R8G8B8_SRGB | vk::Format::B8G8R8_UNORM | vk::Format::B8G8R8_SRGB => {
                texel(3)
            }
            vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::A2B10G10R10_UNORM_PACK32
            | vk::Format::R16G16_SFLOAT
            | vk::Format::R32_SFLOAT
            | vk::Format::R32_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::X8_D24_UNORM_PACK32 => texel(4),
            vk::Format::D32_SFLOAT_S8_UINT => texel(5),
            vk::Format::R16G16B16A16_SFLOAT | vk::Format::R16G16B16A16_UNORM | vk::Format::R32G32_SFLOAT => texel(8),
            vk::Format::R32G32B32_SFLOAT => texel(12),
            vk::Format::R32G32B32A32_SFLOAT => texel(16),

            vk::Format::BC1_RGB_UNORM_BLOCK
            | vk::Format::BC1_RGB_SRGB_BLOCK
            | vk::Format::BC1_RGBA_UNORM_BLOCK
            | vk::Format::BC1_RGBA_SRGB_BLOCK
            | vk::Format::BC4_UNORM_BLOCK
            | vk::Format::BC4_SNORM_BLOCK => block(8),
            vk::Format::BC2_UNORM_BLOCK
            | vk::Format::BC2_SRGB_BLOCK
            | vk::Format::BC3_UNORM_BLOCK
            | vk::Format::BC3_SRGB_BLOCK
            | vk::Format::BC5_UNORM_BLOCK
            | vk::Format::BC5_SNORM_BLOCK
            | vk::Format::BC6H_UFLOAT_BLOCK
            | vk::Format::BC6H_SFLOAT_BLOCK
            | vk::Format::BC7_UNORM_BLOCK
            | vk::Format::BC7_SRGB_BLOCK => block(16),
            _ => return None,
        };
        Some(result)
    }

    /// 指定 mip level 的尺寸，每一维至少为 1
    #[inline]
    pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
        vk::Extent3D {
            width: (extent.width >> level).max(1),
            height: (extent.height >> level).max(1),
            depth: (extent.depth >> level).max(1),
        }
    }

    /// 完整 mip 链的层数
    #[inline]
    pub fn max_mip_levels(extent: vk::Extent3D) -> u32 {
        let largest = extent.width.max(extent.height).max(extent.depth).max(1);
        u32::BITS - largest.leading_zeros()
    }

    /// 指定 mip level 的紧密排列数据大小
    pub fn level_size_in_bytes(format: vk::Format, extent: vk::Extent3D, level: u32) -> GfxResult<u64> {
        let block = Self::texel_block(format)
            .ok_or_else(|| GfxError::InvalidDesc(format!("unsupported texture format: {:?}", format)))?;
        let level_extent = Self::mip_extent(extent, level);
        let blocks_x = level_extent.width.div_ceil(block.width) as u64;
        let blocks_y = level_extent.height.div_ceil(block.height) as u64;
        Ok(blocks_x * blocks_y * level_extent.depth as u64 * block.bytes as u64)
    }

    pub fn is_depth_format(format: vk::Format) -> bool {
        matches!(
            format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::X8_D24_UNORM_PACK32
        )
    }

    pub fn is_stencil_format(format: vk::Format) -> bool {
        matches!(
            format,
            vk::Format::S8_UINT
                | vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
        )
    }

    /// 由格式推导 image aspect
    pub fn aspect_flags(format: vk::Format) -> vk::ImageAspectFlags {
        let mut aspect = vk::ImageAspectFlags::empty();
        if Self::is_depth_format(format) {
            aspect |= vk::ImageAspectFlags::DEPTH;
        }
        if Self::is_stencil_format(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        if aspect.is_empty() { vk::ImageAspectFlags::COLOR } else { aspect }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent3D {
        vk::Extent3D { width, height, depth: 1 }
    }

    #[test]
    fn test_aspect_flags() {
        assert_eq!(GfxFormatUtils::aspect_flags(vk::Format::R8G8B8A8_SRGB), vk::ImageAspectFlags::COLOR);
        assert_eq!(GfxFormatUtils::aspect_flags(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            GfxFormatUtils::aspect_flags(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(GfxFormatUtils::aspect_flags(vk::Format::S8_UINT), vk::ImageAspectFlags::STENCIL);
    }

    #[test]
    fn test_level_size_uncompressed() {
        let size = GfxFormatUtils::level_size_in_bytes(vk::Format::R8G8B8A8_UNORM, extent(256, 128), 0).unwrap();
        assert_eq!(size, 256 * 128 * 4);
        let size = GfxFormatUtils::level_size_in_bytes(vk::Format::R8G8B8A8_UNORM, extent(256, 128), 8).unwrap();
        assert_eq!(size, 4);
    }

    #[test]
    fn test_level_size_block_compressed() {
        // 4x4 的 block，不足一个 block 的边也要占满一个 block
        let size = GfxFormatUtils::level_size_in_bytes(vk::Format::BC7_UNORM_BLOCK, extent(64, 64), 0).unwrap();
        assert_eq!(size, 16 * 16 * 16);
        let size = GfxFormatUtils::level_size_in_bytes(vk::Format::BC1_RGB_UNORM_BLOCK, extent(64, 64), 5).unwrap();
        assert_eq!(size, 8);
    }

    #[test]
    fn test_unsupported_format() {
        assert!(GfxFormatUtils::level_size_in_bytes(vk::Format::ASTC_4X4_UNORM_BLOCK, extent(4, 4), 0).is_err());
    }

    #[test]
    fn test_max_mip_levels() {
        assert_eq!(GfxFormatUtils::max_mip_levels(extent(1, 1)), 1);
        assert_eq!(GfxFormatUtils::max_mip_levels(extent(256, 128)), 9);
        assert_eq!(GfxFormatUtils::max_mip_levels(extent(300, 1)), 9);
    }
}
