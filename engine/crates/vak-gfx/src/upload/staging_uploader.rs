use std::sync::Arc;

use ash::vk;

use crate::{
    backend::{GfxBackend, GfxBufferAllocDesc, GfxMappedPtr, GfxStorageClass, set_debug_name},
    commands::{
        barrier::{GfxBarrierMask, GfxBufferBarrier, GfxStageAccess},
        command_list::GfxCommandList,
        command_ring::{GfxCommandRing, GfxCommandRingDesc},
    },
    error::{GfxError, GfxResult},
    resources::{buffer::GfxBuffer, format::GfxFormatUtils, texture::GfxTexture},
};

/// staging region 中每次分配的起始地址对齐，覆盖了所有 texel block 的大小
pub const STAGING_ALIGNMENT: u64 = 16;

#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// CPU 到 GPU 的唯一数据通道
///
/// 持有一块持久映射的 host visible staging buffer，以及一个只有一个 slot、不串联提交的 command ring。
///
/// # 分配策略
/// - staging region 按 [`STAGING_ALIGNMENT`] 对齐做单调的 bump 分配
/// - 尾部放不下时回绕到 0：每次上传都会在返回之前等待自己的 fence，回绕时之前的数据一定已经被 GPU 消费
/// - 单次上传（包括整条 mip 链）超过整个 region 时返回 [`GfxError::UploadOverflow`]，此时不会写入任何字节
pub struct GfxStagingUploader {
    backend: Arc<dyn GfxBackend>,
    ring: GfxCommandRing,

    staging_buffer: vk::Buffer,
    mapped: GfxMappedPtr,
    capacity: u64,
    /// 下一次分配的起点
    cursor: u64,

    upload_count: u64,
    uploaded_bytes: u64,
    valid: bool,
}

// new & init
impl GfxStagingUploader {
    pub fn new(backend: Arc<dyn GfxBackend>, capacity: u64, upload_timeout_ns: u64) -> GfxResult<Self> {
        if capacity == 0 {
            return Err(GfxError::InvalidDesc("staging region has zero capacity".to_string()));
        }

        let allocation = backend.create_buffer(&GfxBufferAllocDesc {
            size: capacity,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            storage: GfxStorageClass::HostVisible,
            debug_name: "staging-region",
        })?;
        let Some(mapped) = allocation.mapped else {
            backend.destroy_buffer(allocation.buffer);
            return Err(GfxError::InvalidDesc("staging region is not host visible".to_string()));
        };
        set_debug_name(backend.as_ref(), allocation.buffer, "Buffer", "staging-region");

        let ring = GfxCommandRing::new(
            backend.clone(),
            &GfxCommandRingDesc {
                name: "staging",
                slot_count: 1,
                chain_submissions: false,
                acquire_timeout_ns: upload_timeout_ns,
                bindless_set: vk::DescriptorSet::null(),
            },
        )
        .inspect_err(|_| backend.destroy_buffer(allocation.buffer))?;

        log::info!("staging region created: {} MiB", capacity >> 20);
        Ok(Self {
            backend,
            ring,
            staging_buffer: allocation.buffer,
            mapped,
            capacity,
            cursor: 0,
            upload_count: 0,
            uploaded_bytes: 0,
            valid: true,
        })
    }

    pub fn destroy(&mut self) -> GfxResult<()> {
        if !self.valid {
            return Ok(());
        }
        let result = self.ring.destroy();
        self.backend.destroy_buffer(self.staging_buffer);
        self.valid = false;
        log::info!("staging region destroyed after {} uploads ({} bytes)", self.upload_count, self.uploaded_bytes);
        result
    }
}

impl Drop for GfxStagingUploader {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "staging uploader must be destroyed manually");
    }
}

// getters
impl GfxStagingUploader {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    #[inline]
    pub fn upload_count(&self) -> u64 {
        self.upload_count
    }

    #[inline]
    pub fn staging_buffer(&self) -> vk::Buffer {
        self.staging_buffer
    }
}

// upload
impl GfxStagingUploader {
    /// 将 data 复制到 `dst` 的 `dst_offset` 处，阻塞直到 GPU 完成复制
    ///
    /// 复制之后的 barrier 把可见性交给由 buffer usage 推导出的消费者 stage
    pub fn upload_buffer(&mut self, dst: &GfxBuffer, dst_offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let _span = profile_span!("GfxStagingUploader::upload_buffer");

        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as u64;
        if dst_offset.checked_add(size).is_none_or(|end| end > dst.size()) {
            return Err(GfxError::InvalidDesc(format!(
                "upload of {} bytes at offset {} exceeds buffer size {}",
                size,
                dst_offset,
                dst.size()
            )));
        }

        let staging_offset = self.reserve(size)?;
        self.write_staging(staging_offset, data)?;

        let staging_buffer = self.staging_buffer;
        let dst_buffer = dst.handle();
        let consumer = GfxStageAccess::buffer_consumer(dst.usage());
        self.one_time_exec("upload-buffer", |cmd| {
            cmd.record_copy_buffer(
                staging_buffer,
                dst_buffer,
                &[vk::BufferCopy {
                    src_offset: staging_offset,
                    dst_offset,
                    size,
                }],
            );
            let barrier = GfxBufferBarrier::new()
                .buffer(dst_buffer, dst_offset, size)
                .mask(GfxBarrierMask::new(GfxStageAccess::TRANSFER_WRITE, consumer));
            cmd.record_buffer_barrier(&barrier);
        })?;

        self.uploaded_bytes += size;
        Ok(())
    }

    /// 从 mip 0 开始上传若干层 mip 数据，每层在 staging region 中有自己的偏移
    ///
    /// image 先转换到 TRANSFER_DST，每层一个 copy region，最后转换到 SHADER_READ_ONLY
    pub fn upload_texture(&mut self, texture: &mut GfxTexture, levels: &[&[u8]]) -> GfxResult<()> {
        let _span = profile_span!("GfxStagingUploader::upload_texture");

        if levels.is_empty() {
            return Ok(());
        }
        if levels.len() as u32 > texture.mip_levels() {
            return Err(GfxError::InvalidDesc(format!(
                "{} mip levels of data for a texture with {} levels",
                levels.len(),
                texture.mip_levels()
            )));
        }

        // 先计算整条 mip 链的布局，超出容量时不写入任何数据
        let mut level_offsets = Vec::with_capacity(levels.len());
        let mut total = 0;
        for (level, data) in levels.iter().enumerate() {
            let expected = GfxFormatUtils::level_size_in_bytes(texture.format(), texture.extent(), level as u32)?;
            if data.len() as u64 != expected {
                return Err(GfxError::InvalidDesc(format!(
                    "mip {} has {} bytes, expected {}",
                    level,
                    data.len(),
                    expected
                )));
            }
            let offset = align_up(total, STAGING_ALIGNMENT);
            level_offsets.push(offset);
            total = offset + expected;
        }

        let base = self.reserve(total)?;
        for (data, offset) in levels.iter().zip(&level_offsets) {
            self.write_staging(base + offset, data)?;
        }

        let regions = level_offsets
            .iter()
            .enumerate()
            .map(|(level, offset)| vk::BufferImageCopy {
                buffer_offset: base + offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: texture.aspect(),
                    mip_level: level as u32,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: GfxFormatUtils::mip_extent(texture.extent(), level as u32),
            })
            .collect::<Vec<_>>();

        let staging_buffer = self.staging_buffer;
        self.one_time_exec("upload-texture", |cmd| {
            texture.transition_to(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            cmd.record_copy_buffer_to_image(
                staging_buffer,
                texture.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
            texture.transition_to(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        })?;

        self.uploaded_bytes += total;
        Ok(())
    }
}

// tools
impl GfxStagingUploader {
    /// 在 staging region 中分配 `size` 字节，返回起始偏移
    fn reserve(&mut self, size: u64) -> GfxResult<u64> {
        if size > self.capacity {
            log::error!("upload of {} bytes overflows the {}-byte staging region", size, self.capacity);
            return Err(GfxError::UploadOverflow {
                requested: size,
                capacity: self.capacity,
            });
        }

        let mut offset = align_up(self.cursor, STAGING_ALIGNMENT);
        if offset + size > self.capacity {
            log::debug!("staging region wraps at offset {}", offset);
            offset = 0;
        }
        self.cursor = offset + size;
        Ok(offset)
    }

    fn write_staging(&self, offset: u64, data: &[u8]) -> GfxResult<()> {
        debug_assert!(offset + data.len() as u64 <= self.capacity);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.as_ptr().add(offset as usize), data.len());
        }
        self.backend.flush_buffer(self.staging_buffer, offset, data.len() as u64)
    }

    /// 立即执行某个 command，并同步等待执行结果
    fn one_time_exec<R>(&mut self, name: &str, func: impl FnOnce(&GfxCommandList) -> R) -> GfxResult<R> {
        let mut cmd = self.ring.acquire_command_list()?;
        cmd.begin_label(name, glam::vec4(0.3, 0.6, 0.9, 1.0));
        let result = func(&cmd);
        cmd.end_label();

        self.ring.submit(cmd, &[], &[])?;
        self.ring.wait_all()?;
        self.upload_count += 1;
        Ok(result)
    }
}
