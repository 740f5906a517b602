use ash::vk;

use crate::resources::pipeline::MAX_PUSH_CONSTANT_SIZE;

/// 绘制时使用的通用 push constant
///
/// 通过 buffer device address 传递每帧、每实例的数据，避免每次 draw 都重新绑定 descriptor。
/// 内存布局需要和 shader 中的声明保持一致。
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GfxDrawPushConstants {
    pub view_proj: glam::Mat4,

    pub frame_data: vk::DeviceAddress,
    pub instance_data: vk::DeviceAddress,
    pub material_data: vk::DeviceAddress,

    pub instance_idx: u32,
    /// bindless 纹理数组中的下标，等于 texture handle 的 index
    pub texture_idx: u32,
    pub sampler_idx: u32,

    pub _padding: [u32; 3],
}

const _: () = assert!(size_of::<GfxDrawPushConstants>() <= MAX_PUSH_CONSTANT_SIZE as usize);

impl GfxDrawPushConstants {
    pub fn new(view_proj: glam::Mat4) -> Self {
        Self {
            view_proj,
            ..Default::default()
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
