use std::sync::Arc;

use ash::vk;

use crate::{
    backend::{GfxBackend, GfxBufferAllocDesc, GfxImageAllocDesc, GfxImageViewDesc, GfxStorageClass, set_debug_name},
    commands::{barrier::GfxStageAccess, command_list::GfxCommandList},
    config::GfxConfig,
    error::{GfxError, GfxResult},
    pool::handle_pool::HandlePool,
    resources::{
        buffer::{BufferHandle, GfxBuffer, GfxBufferDesc, GfxBufferMeta},
        format::GfxFormatUtils,
        pipeline::{GfxPipeline, GfxPipelineMeta, PipelineHandle},
        sampler::{GfxSampler, GfxSamplerDesc, GfxSamplerMeta, SamplerHandle},
        texture::{GfxTexture, GfxTextureDesc, GfxTextureMeta, TextureHandle},
    },
    stats::GfxResourceStats,
    upload::staging_uploader::GfxStagingUploader,
};

pub type GfxTexturePool = HandlePool<GfxTexture, GfxTextureMeta>;
pub type GfxSamplerPool = HandlePool<GfxSampler, GfxSamplerMeta>;

/// 描述符表重建时需要读取的内容
///
/// 只读，描述符表通过它枚举 texture 和 sampler，而不会反向修改资源管理器
#[derive(Clone, Copy)]
pub struct GfxBindlessView<'a> {
    pub textures: &'a GfxTexturePool,
    pub samplers: &'a GfxSamplerPool,
    /// 每次 texture / sampler 的创建或删除改变 bindless 数组的内容时加一
    pub revision: u64,
}

/// 等待 GPU 用完之后再删除的资源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GfxRetiredResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Sampler(SamplerHandle),
    Pipeline(PipelineHandle),
}

/// 资源管理器
///
/// 负责 buffer、texture、sampler、pipeline 的创建和销毁，对外只暴露带 generation 的 handle。
/// 资源池的下标同时是 bindless 数组的下标，因此池的容量就是存活资源数量的上限。
///
/// 所有修改都发生在 [`Gfx`](crate::gfx::Gfx) 持有的同一把锁之下，texture 的 layout 也不例外。
pub struct GfxResourceManager {
    backend: Arc<dyn GfxBackend>,

    buffers: HandlePool<GfxBuffer, GfxBufferMeta>,
    textures: GfxTexturePool,
    samplers: GfxSamplerPool,
    pipelines: HandlePool<GfxPipeline, GfxPipelineMeta>,

    uploader: GfxStagingUploader,

    bindless_revision: u64,

    /// (handle, 可以删除时 timeline 需要到达的值)
    retired: Vec<(GfxRetiredResource, u64)>,

    allocated_bytes: u64,
    destroyed: bool,
}

// new & init
impl GfxResourceManager {
    pub fn new(backend: Arc<dyn GfxBackend>, config: &GfxConfig) -> GfxResult<Self> {
        config.validate()?;
        let uploader = GfxStagingUploader::new(backend.clone(), config.staging_capacity, config.upload_timeout_ns())?;

        Ok(Self {
            backend,
            buffers: HandlePool::new("buffer", config.max_buffers),
            textures: HandlePool::new("texture", config.max_textures),
            samplers: HandlePool::new("sampler", config.max_samplers),
            pipelines: HandlePool::new("pipeline", config.max_pipelines),
            uploader,
            bindless_revision: 0,
            retired: Vec::new(),
            allocated_bytes: 0,
            destroyed: false,
        })
    }
}

// destroy
impl GfxResourceManager {
    /// 强制删除所有仍然存活的资源，并销毁 staging region
    ///
    /// 调用方需要保证 GPU 已经不再使用这些资源。中途出错也会继续释放剩下的资源，返回第一个错误
    pub fn destroy_all(&mut self) -> GfxResult<()> {
        let _span = profile_span!("GfxResourceManager::destroy_all");
        if self.destroyed {
            return Ok(());
        }
        self.retired.clear();

        let leaked = self.textures.len() + self.buffers.len() + self.samplers.len() + self.pipelines.len();
        log::info!(
            "destroying resource manager: {} textures, {} buffers, {} samplers, {} pipelines",
            self.textures.len(),
            self.buffers.len(),
            self.samplers.len(),
            self.pipelines.len()
        );

        let mut result = Ok(());
        let textures = self.textures.live_handles().collect::<Vec<_>>();
        for handle in textures {
            result = result.and(self.delete_texture(handle));
        }
        let buffers = self.buffers.live_handles().collect::<Vec<_>>();
        for handle in buffers {
            result = result.and(self.delete_buffer(handle));
        }
        let samplers = self.samplers.live_handles().collect::<Vec<_>>();
        for handle in samplers {
            result = result.and(self.delete_sampler(handle));
        }
        let pipelines = self.pipelines.live_handles().collect::<Vec<_>>();
        for handle in pipelines {
            result = result.and(self.delete_pipeline(handle));
        }
        debug_assert!(result.is_err() || self.allocated_bytes == 0);

        result = result.and(self.uploader.destroy());
        self.destroyed = true;
        log::debug!("resource manager destroyed {} live entries", leaked);
        result
    }
}

impl Drop for GfxResourceManager {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "resource manager must be destroyed manually");
    }
}

// Buffer API
impl GfxResourceManager {
    /// 创建 buffer
    ///
    /// host visible 的 buffer 会被持久映射，初始数据直接写入映射内存；
    /// device local 的 buffer 通过 staging region 上传，并在返回前等待上传完成
    pub fn create_buffer(&mut self, desc: &GfxBufferDesc) -> GfxResult<BufferHandle> {
        desc.validate()?;
        Self::check_capacity(&self.buffers)?;

        let usage = desc.effective_usage();
        let allocation = self.backend.create_buffer(&GfxBufferAllocDesc {
            size: desc.size,
            usage,
            storage: desc.storage,
            debug_name: desc.debug_name,
        })?;
        set_debug_name(self.backend.as_ref(), allocation.buffer, "Buffer", desc.debug_name);

        let mut buffer = GfxBuffer {
            handle: allocation.buffer,
            size: desc.size,
            usage,
            storage: desc.storage,
            mapped: allocation.mapped,
            device_address: allocation.device_address,
        };

        if let Some(data) = desc.initial_data {
            if let Err(err) = self.write_initial_data(&mut buffer, data) {
                self.backend.destroy_buffer(buffer.handle);
                return Err(err);
            }
        }

        let meta = GfxBufferMeta {
            debug_name: desc.debug_name.to_string(),
        };
        let vk_buffer = buffer.handle;
        let handle = self.buffers.create(buffer, meta).inspect_err(|_| self.backend.destroy_buffer(vk_buffer))?;
        self.allocated_bytes += desc.size;

        log::debug!("created buffer {} ({} bytes): {:?}", desc.debug_name, desc.size, handle);
        Ok(handle)
    }

    pub fn delete_buffer(&mut self, handle: BufferHandle) -> GfxResult<()> {
        let (buffer, meta) = self.buffers.delete(handle)?;
        self.backend.destroy_buffer(buffer.handle);
        self.allocated_bytes -= buffer.size;
        log::debug!("deleted buffer {}", meta.debug_name);
        Ok(())
    }

    #[inline]
    pub fn buffer(&self, handle: BufferHandle) -> GfxResult<&GfxBuffer> {
        self.buffers.get(handle)
    }

    #[inline]
    pub fn buffer_meta(&self, handle: BufferHandle) -> GfxResult<&GfxBufferMeta> {
        self.buffers.get_metadata(handle)
    }

    /// 用于 push constant 的 GPU 地址
    pub fn buffer_device_address(&self, handle: BufferHandle) -> GfxResult<vk::DeviceAddress> {
        let buffer = self.buffers.get(handle)?;
        buffer.device_address().ok_or_else(|| {
            GfxError::InvalidDesc(format!(
                "buffer {} was created without SHADER_DEVICE_ADDRESS",
                self.buffers.get_metadata(handle).map(|meta| meta.debug_name.as_str()).unwrap_or("?")
            ))
        })
    }

    /// 更新 buffer 的内容：host visible 直接写入映射内存，否则走 staging region
    pub fn update_buffer(&mut self, handle: BufferHandle, offset: vk::DeviceSize, data: &[u8]) -> GfxResult<()> {
        let buffer = self.buffers.get_mut(handle)?;
        if buffer.mapped.is_some() {
            buffer.write_mapped(offset, data)?;
            self.backend.flush_buffer(buffer.handle, offset, data.len() as u64)
        } else {
            self.uploader.upload_buffer(buffer, offset, data)
        }
    }

    fn write_initial_data(&mut self, buffer: &mut GfxBuffer, data: &[u8]) -> GfxResult<()> {
        if buffer.mapped.is_some() {
            buffer.write_mapped(0, data)?;
            self.backend.flush_buffer(buffer.handle, 0, data.len() as u64)
        } else {
            self.uploader.upload_buffer(buffer, 0, data)
        }
    }
}

// Texture API
impl GfxResourceManager {
    /// 创建 image 和 view，aspect 由格式推导；有初始数据时同步上传并转换到 SHADER_READ_ONLY
    pub fn create_texture(&mut self, desc: &GfxTextureDesc) -> GfxResult<TextureHandle> {
        desc.validate()?;
        Self::check_capacity(&self.textures)?;

        let usage = desc.effective_usage();
        let image = self.backend.create_image(&GfxImageAllocDesc {
            image_type: desc.image_type,
            format: desc.format,
            extent: desc.extent,
            usage,
            mip_levels: desc.mip_levels,
            storage: desc.storage,
        })?;
        let aspect = GfxFormatUtils::aspect_flags(desc.format);
        let view = self
            .backend
            .create_image_view(&GfxImageViewDesc {
                image,
                view_type: desc.view_type(),
                format: desc.format,
                aspect,
                mip_levels: desc.mip_levels,
            })
            .inspect_err(|_| self.backend.destroy_image(image))?;
        set_debug_name(self.backend.as_ref(), image, "Image", desc.debug_name);
        set_debug_name(self.backend.as_ref(), view, "ImageView", desc.debug_name);

        let mut texture = GfxTexture::new(image, view, desc.image_type, desc.extent, desc.format, usage, desc.mip_levels);
        if let Some(data) = desc.initial_data {
            if let Err(err) = self.uploader.upload_texture(&mut texture, &data.levels()) {
                self.backend.destroy_image_view(view);
                self.backend.destroy_image(image);
                return Err(err);
            }
        }

        let size = Self::texture_size_estimate(&texture);
        let sampled = texture.is_sampled();
        let meta = GfxTextureMeta {
            debug_name: desc.debug_name.to_string(),
            storage: desc.storage,
            external: false,
        };
        let handle = self.textures.create(texture, meta).inspect_err(|_| {
            self.backend.destroy_image_view(view);
            self.backend.destroy_image(image);
        })?;
        self.allocated_bytes += size;
        if sampled {
            self.bindless_revision += 1;
        }

        log::debug!("created texture {} {:?}: {:?}", desc.debug_name, desc.extent, handle);
        Ok(handle)
    }

    /// 为外部拥有的 image（例如 swapchain image）创建 view 并放入 texture 池
    ///
    /// 删除时只销毁 view
    pub fn register_external_texture(
        &mut self,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
        debug_name: &str,
    ) -> GfxResult<TextureHandle> {
        Self::check_capacity(&self.textures)?;

        let aspect = GfxFormatUtils::aspect_flags(format);
        let view = self.backend.create_image_view(&GfxImageViewDesc {
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            aspect,
            mip_levels: 1,
        })?;
        set_debug_name(self.backend.as_ref(), view, "ImageView", debug_name);

        let texture = GfxTexture::new(image, view, vk::ImageType::TYPE_2D, extent.into(), format, usage, 1);
        let sampled = texture.is_sampled();
        let meta = GfxTextureMeta {
            debug_name: debug_name.to_string(),
            storage: GfxStorageClass::DeviceLocal,
            external: true,
        };
        let handle = self.textures.create(texture, meta).inspect_err(|_| self.backend.destroy_image_view(view))?;
        if sampled {
            self.bindless_revision += 1;
        }
        Ok(handle)
    }

    pub fn delete_texture(&mut self, handle: TextureHandle) -> GfxResult<()> {
        let (texture, meta) = self.textures.delete(handle)?;
        self.backend.destroy_image_view(texture.view);
        if !meta.external {
            self.backend.destroy_image(texture.image);
            self.allocated_bytes -= Self::texture_size_estimate(&texture);
        }
        if texture.is_sampled() {
            self.bindless_revision += 1;
        }
        log::debug!("deleted texture {}", meta.debug_name);
        Ok(())
    }

    #[inline]
    pub fn texture(&self, handle: TextureHandle) -> GfxResult<&GfxTexture> {
        self.textures.get(handle)
    }

    #[inline]
    pub fn texture_meta(&self, handle: TextureHandle) -> GfxResult<&GfxTextureMeta> {
        self.textures.get_metadata(handle)
    }

    /// layout 只能在 crate 内部通过 [`GfxTexture::transition`] 修改
    #[inline]
    pub(crate) fn texture_mut(&mut self, handle: TextureHandle) -> GfxResult<&mut GfxTexture> {
        self.textures.get_mut(handle)
    }

    /// 记录 layout 转换的 barrier 并更新 texture 的 layout
    pub fn transition_texture(
        &mut self,
        cmd: &GfxCommandList,
        handle: TextureHandle,
        new_layout: vk::ImageLayout,
        src: GfxStageAccess,
        dst: GfxStageAccess,
    ) -> GfxResult<()> {
        self.textures.get_mut(handle)?.transition(cmd, new_layout, src, dst);
        Ok(())
    }

    /// 有初始数据时重新上传 mip 数据
    pub fn upload_texture(&mut self, handle: TextureHandle, levels: &[&[u8]]) -> GfxResult<()> {
        let texture = self.textures.get_mut(handle)?;
        self.uploader.upload_texture(texture, levels)
    }

    /// 按紧密排列估算的显存占用，无法识别的格式按 0 计算
    fn texture_size_estimate(texture: &GfxTexture) -> u64 {
        (0..texture.mip_levels())
            .map(|level| GfxFormatUtils::level_size_in_bytes(texture.format(), texture.extent(), level).unwrap_or(0))
            .sum()
    }
}

// Sampler API
impl GfxResourceManager {
    pub fn create_sampler(&mut self, desc: &GfxSamplerDesc, debug_name: &str) -> GfxResult<SamplerHandle> {
        Self::check_capacity(&self.samplers)?;

        let sampler = self.backend.create_sampler(&desc.to_vk())?;
        set_debug_name(self.backend.as_ref(), sampler, "Sampler", debug_name);

        let meta = GfxSamplerMeta {
            debug_name: debug_name.to_string(),
            desc: Some(*desc),
        };
        let handle = self
            .samplers
            .create(GfxSampler { handle: sampler }, meta)
            .inspect_err(|_| self.backend.destroy_sampler(sampler))?;
        self.bindless_revision += 1;
        Ok(handle)
    }

    pub fn delete_sampler(&mut self, handle: SamplerHandle) -> GfxResult<()> {
        let (sampler, meta) = self.samplers.delete(handle)?;
        self.backend.destroy_sampler(sampler.handle);
        self.bindless_revision += 1;
        log::debug!("deleted sampler {}", meta.debug_name);
        Ok(())
    }

    #[inline]
    pub fn sampler(&self, handle: SamplerHandle) -> GfxResult<&GfxSampler> {
        self.samplers.get(handle)
    }

    #[inline]
    pub fn sampler_meta(&self, handle: SamplerHandle) -> GfxResult<&GfxSamplerMeta> {
        self.samplers.get_metadata(handle)
    }
}

// Pipeline API
impl GfxResourceManager {
    /// 接管一个外部创建的 pipeline
    ///
    /// `owns_layout` 为 true 时，删除 pipeline 时一起销毁它的 layout
    pub fn register_pipeline(
        &mut self,
        pipeline: GfxPipeline,
        owns_layout: bool,
        debug_name: &str,
    ) -> GfxResult<PipelineHandle> {
        Self::check_capacity(&self.pipelines)?;
        set_debug_name(self.backend.as_ref(), pipeline.pipeline, "Pipeline", debug_name);

        let meta = GfxPipelineMeta {
            debug_name: debug_name.to_string(),
            owns_layout,
        };
        self.pipelines.create(pipeline, meta)
    }

    pub fn delete_pipeline(&mut self, handle: PipelineHandle) -> GfxResult<()> {
        let (pipeline, meta) = self.pipelines.delete(handle)?;
        self.backend.destroy_pipeline(pipeline.pipeline);
        if meta.owns_layout {
            self.backend.destroy_pipeline_layout(pipeline.layout);
        }
        log::debug!("deleted pipeline {}", meta.debug_name);
        Ok(())
    }

    #[inline]
    pub fn pipeline(&self, handle: PipelineHandle) -> GfxResult<&GfxPipeline> {
        self.pipelines.get(handle)
    }
}

// 延迟删除
impl GfxResourceManager {
    pub fn retire_buffer(&mut self, handle: BufferHandle, timeline_value: u64) -> GfxResult<()> {
        self.buffers.get(handle)?;
        self.retired.push((GfxRetiredResource::Buffer(handle), timeline_value));
        Ok(())
    }

    pub fn retire_texture(&mut self, handle: TextureHandle, timeline_value: u64) -> GfxResult<()> {
        self.textures.get(handle)?;
        self.retired.push((GfxRetiredResource::Texture(handle), timeline_value));
        Ok(())
    }

    pub fn retire_sampler(&mut self, handle: SamplerHandle, timeline_value: u64) -> GfxResult<()> {
        self.samplers.get(handle)?;
        self.retired.push((GfxRetiredResource::Sampler(handle), timeline_value));
        Ok(())
    }

    pub fn retire_pipeline(&mut self, handle: PipelineHandle, timeline_value: u64) -> GfxResult<()> {
        self.pipelines.get(handle)?;
        self.retired.push((GfxRetiredResource::Pipeline(handle), timeline_value));
        Ok(())
    }

    /// 删除所有 timeline 值已经到达 `completed_value` 的资源，返回删除的数量
    ///
    /// 在等待期间被直接删除的 handle 会被跳过
    pub fn release_retired(&mut self, completed_value: u64) -> GfxResult<usize> {
        let _span = profile_span!("GfxResourceManager::release_retired");

        let mut ready = Vec::new();
        self.retired.retain(|(resource, value)| {
            if *value <= completed_value {
                ready.push(*resource);
                false
            } else {
                true
            }
        });

        let mut released = 0;
        for resource in ready {
            let result = match resource {
                GfxRetiredResource::Buffer(handle) => self.delete_buffer(handle),
                GfxRetiredResource::Texture(handle) => self.delete_texture(handle),
                GfxRetiredResource::Sampler(handle) => self.delete_sampler(handle),
                GfxRetiredResource::Pipeline(handle) => self.delete_pipeline(handle),
            };
            match result {
                Ok(()) => released += 1,
                Err(GfxError::StaleHandle { .. }) => {
                    log::warn!("retired resource {:?} was already deleted", resource);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(released)
    }

    #[inline]
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }
}

// getters
impl GfxResourceManager {
    #[inline]
    pub fn backend(&self) -> &Arc<dyn GfxBackend> {
        &self.backend
    }

    #[inline]
    pub fn bindless_revision(&self) -> u64 {
        self.bindless_revision
    }

    #[inline]
    pub fn bindless_view(&self) -> GfxBindlessView<'_> {
        GfxBindlessView {
            textures: &self.textures,
            samplers: &self.samplers,
            revision: self.bindless_revision,
        }
    }

    #[inline]
    pub fn uploader(&self) -> &GfxStagingUploader {
        &self.uploader
    }

    pub fn stats(&self) -> GfxResourceStats {
        GfxResourceStats {
            live_buffers: self.buffers.len(),
            live_textures: self.textures.len(),
            live_samplers: self.samplers.len(),
            live_pipelines: self.pipelines.len(),
            allocated_bytes: self.allocated_bytes,
        }
    }
}

// tools
impl GfxResourceManager {
    /// 在分配 GPU 内存之前检查池的容量
    fn check_capacity<H: Default, M: Default>(pool: &HandlePool<H, M>) -> GfxResult<()> {
        if pool.is_full() {
            log::error!("{} pool is full ({} slots)", pool.name(), pool.capacity());
            return Err(GfxError::ResourceExhausted {
                pool: pool.name(),
                capacity: pool.capacity(),
            });
        }
        Ok(())
    }
}
