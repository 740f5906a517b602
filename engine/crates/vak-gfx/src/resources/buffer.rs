use ash::vk;

use crate::{
    backend::{GfxMappedPtr, GfxStorageClass},
    error::{GfxError, GfxResult},
    pool::handle::Handle,
};

pub type BufferHandle = Handle<GfxBuffer>;

/// 创建 buffer 的参数
#[derive(Clone, Copy, Debug)]
pub struct GfxBufferDesc<'a> {
    pub usage: vk::BufferUsageFlags,
    pub storage: GfxStorageClass,
    pub size: vk::DeviceSize,
    /// 不为空时，创建完成后通过 staging 上传
    pub initial_data: Option<&'a [u8]>,
    pub debug_name: &'a str,
}

impl Default for GfxBufferDesc<'_> {
    fn default() -> Self {
        Self {
            usage: vk::BufferUsageFlags::empty(),
            storage: GfxStorageClass::DeviceLocal,
            size: 0,
            initial_data: None,
            debug_name: "unnamed",
        }
    }
}

impl GfxBufferDesc<'_> {
    pub(crate) fn validate(&self) -> GfxResult<()> {
        if self.size == 0 {
            return Err(GfxError::InvalidDesc(format!("buffer {} has zero size", self.debug_name)));
        }
        // 不允许 UNIFORM + DBA 的组合，会有隐患
        if self.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            return Err(GfxError::InvalidDesc(format!(
                "buffer {}: UNIFORM_BUFFER + SHADER_DEVICE_ADDRESS is not allowed",
                self.debug_name
            )));
        }
        let data_len = self.initial_data.map_or(0, |data| data.len() as u64);
        if data_len > self.size {
            return Err(GfxError::InvalidDesc(format!(
                "buffer {}: initial data ({} bytes) larger than buffer ({} bytes)",
                self.debug_name, data_len, self.size
            )));
        }
        Ok(())
    }

    /// 实际使用的 usage：device local 的 buffer 总是可以作为 transfer 的两端
    pub(crate) fn effective_usage(&self) -> vk::BufferUsageFlags {
        let mut usage = self.usage;
        if self.storage == GfxStorageClass::DeviceLocal || self.initial_data.is_some() {
            usage |= vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        }
        usage
    }
}

/// buffer 池中的热数据
#[derive(Default, Debug)]
pub struct GfxBuffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) size: vk::DeviceSize,
    pub(crate) usage: vk::BufferUsageFlags,
    pub(crate) storage: GfxStorageClass,

    /// 在初始化阶段写死
    pub(crate) mapped: Option<GfxMappedPtr>,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    pub(crate) device_address: Option<vk::DeviceAddress>,
}

/// buffer 池中的冷数据
#[derive(Default, Debug, Clone)]
pub struct GfxBufferMeta {
    pub debug_name: String,
}

// getters
impl GfxBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    #[inline]
    pub fn storage(&self) -> GfxStorageClass {
        self.storage
    }

    #[inline]
    pub fn device_address(&self) -> Option<vk::DeviceAddress> {
        self.device_address
    }

    #[inline]
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped.map(GfxMappedPtr::as_ptr)
    }
}

// tools
impl GfxBuffer {
    /// 直接写入持久映射的内存，调用方负责 flush
    pub(crate) fn write_mapped(&mut self, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let Some(mapped) = self.mapped else {
            return Err(GfxError::InvalidDesc("buffer is not host visible".to_string()));
        };
        let end = offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > self.size) {
            return Err(GfxError::InvalidDesc(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(offset as usize), data.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_validation() {
        let desc = GfxBufferDesc {
            size: 0,
            ..Default::default()
        };
        assert!(matches!(desc.validate(), Err(GfxError::InvalidDesc(_))));

        let data = [0u8; 16];
        let desc = GfxBufferDesc {
            size: 8,
            initial_data: Some(&data),
            ..Default::default()
        };
        assert!(desc.validate().is_err());

        let desc = GfxBufferDesc {
            size: 8,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            ..Default::default()
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_effective_usage() {
        let desc = GfxBufferDesc {
            size: 8,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            ..Default::default()
        };
        assert!(desc.effective_usage().contains(vk::BufferUsageFlags::TRANSFER_DST));

        let desc = GfxBufferDesc {
            size: 8,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            storage: GfxStorageClass::HostVisible,
            ..Default::default()
        };
        assert_eq!(desc.effective_usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn test_write_mapped_bounds() {
        let mut memory = vec![0u8; 8];
        let mut buffer = GfxBuffer {
            size: 8,
            mapped: GfxMappedPtr::new(memory.as_mut_ptr()),
            ..Default::default()
        };
        buffer.write_mapped(4, &[1, 2, 3, 4]).unwrap();
        assert!(buffer.write_mapped(5, &[1, 2, 3, 4]).is_err());
        assert_eq!(memory, vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }
}
