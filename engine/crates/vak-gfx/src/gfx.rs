use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};

use crate::{
    backend::GfxBackend,
    config::GfxConfig,
    descriptors::bindless_table::GfxBindlessTable,
    error::GfxResult,
    resources::{
        buffer::{BufferHandle, GfxBufferDesc},
        resource_manager::GfxResourceManager,
        sampler::{GfxSamplerDesc, SamplerHandle},
        texture::{GfxTextureData, GfxTextureDesc, TextureHandle},
    },
    stats::GfxRenderStats,
};

/// bindless 数组中缺失 texture 时使用的颜色：品红
const PLACEHOLDER_PIXEL: u32 = 0xFFFF00FF;

/// GFX 层的上下文
///
/// 只创建一次，以引用的形式传递给需要它的地方。所有对资源池的修改都发生在同一把锁之下；
/// 需要同时持有两把锁时，总是先锁 resources 再锁 bindless。
///
/// 创建时会在 texture slot 0 放一个 1x1 的品红 placeholder，在 sampler slot 0 放默认 sampler，
/// bindless 数组中所有空缺的位置都指向它们。
pub struct Gfx {
    backend: Arc<dyn GfxBackend>,
    config: GfxConfig,

    resources: Mutex<GfxResourceManager>,
    bindless: Mutex<GfxBindlessTable>,

    placeholder_texture: TextureHandle,
    default_sampler: SamplerHandle,

    render_stats: Mutex<GfxRenderStats>,
    destroyed: bool,
}

// new & init
impl Gfx {
    pub fn new(backend: Arc<dyn GfxBackend>, config: GfxConfig) -> GfxResult<Self> {
        log::info!("init gfx on device: {}", backend.device_name());

        let mut resources = GfxResourceManager::new(backend.clone(), &config)?;

        let created = Self::create_defaults(&mut resources).and_then(|(placeholder_texture, default_sampler)| {
            let bindless = GfxBindlessTable::new(backend.clone(), config.max_textures, config.max_samplers)?;
            Ok((placeholder_texture, default_sampler, bindless))
        });
        let (placeholder_texture, default_sampler, bindless) = match created {
            Ok(created) => created,
            Err(err) => {
                log::error!("gfx init failed: {}", err);
                if let Err(destroy_err) = resources.destroy_all() {
                    log::error!("failed to release resources after gfx init failure: {}", destroy_err);
                }
                return Err(err);
            }
        };

        Ok(Self {
            backend,
            config,
            resources: Mutex::new(resources),
            bindless: Mutex::new(bindless),
            placeholder_texture,
            default_sampler,
            render_stats: Mutex::new(GfxRenderStats::default()),
            destroyed: false,
        })
    }

    /// placeholder texture 和默认 sampler，必须是各自池中的第一个资源
    fn create_defaults(resources: &mut GfxResourceManager) -> GfxResult<(TextureHandle, SamplerHandle)> {
        let pixel = PLACEHOLDER_PIXEL.to_le_bytes();
        let placeholder_texture = resources.create_texture(&GfxTextureDesc {
            format: vk::Format::R8G8B8A8_UNORM,
            initial_data: Some(GfxTextureData::Level0(&pixel)),
            debug_name: "placeholder",
            ..Default::default()
        })?;
        let default_sampler = resources.create_sampler(&GfxSamplerDesc::default(), "default")?;
        debug_assert_eq!(placeholder_texture.index(), 0);
        debug_assert_eq!(default_sampler.index(), 0);
        Ok((placeholder_texture, default_sampler))
    }
}

// destroy
impl Gfx {
    /// 等待 GPU 空闲，销毁 bindless table，然后强制删除所有存活的资源以及 staging region
    ///
    /// 调用之前需要先销毁所有 [`GfxFrameDriver`](crate::frame::frame_driver::GfxFrameDriver)
    pub fn destroy(&mut self) -> GfxResult<()> {
        if self.destroyed {
            return Ok(());
        }
        let _span = profile_span!("Gfx::destroy");

        let idle_result = self.backend.wait_idle();
        self.bindless.get_mut().destroy();
        let destroy_result = self.resources.get_mut().destroy_all();
        self.destroyed = true;
        log::info!("gfx destroyed");
        idle_result.and(destroy_result)
    }
}

impl Drop for Gfx {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "Gfx::destroy must be called before drop");
    }
}

// getters
impl Gfx {
    #[inline]
    pub fn backend(&self) -> &Arc<dyn GfxBackend> {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &GfxConfig {
        &self.config
    }

    /// 资源池的锁，不要在持有它的时候再去调用 Gfx 上其他会加锁的方法
    #[inline]
    pub fn resources(&self) -> MutexGuard<'_, GfxResourceManager> {
        self.resources.lock()
    }

    #[inline]
    pub fn bindless(&self) -> MutexGuard<'_, GfxBindlessTable> {
        self.bindless.lock()
    }

    #[inline]
    pub fn placeholder_texture(&self) -> TextureHandle {
        self.placeholder_texture
    }

    #[inline]
    pub fn default_sampler(&self) -> SamplerHandle {
        self.default_sampler
    }

    /// 最近一次 end_frame 时的统计
    #[inline]
    pub fn render_stats(&self) -> GfxRenderStats {
        *self.render_stats.lock()
    }

    #[inline]
    pub(crate) fn set_render_stats(&self, stats: GfxRenderStats) {
        *self.render_stats.lock() = stats;
    }
}

// 资源创建的快捷入口，可以从多个线程同时调用
impl Gfx {
    #[inline]
    pub fn create_buffer(&self, desc: &GfxBufferDesc) -> GfxResult<BufferHandle> {
        self.resources.lock().create_buffer(desc)
    }

    #[inline]
    pub fn create_texture(&self, desc: &GfxTextureDesc) -> GfxResult<TextureHandle> {
        self.resources.lock().create_texture(desc)
    }

    #[inline]
    pub fn create_sampler(&self, desc: &GfxSamplerDesc, debug_name: &str) -> GfxResult<SamplerHandle> {
        self.resources.lock().create_sampler(desc, debug_name)
    }

    #[inline]
    pub fn delete_buffer(&self, handle: BufferHandle) -> GfxResult<()> {
        self.resources.lock().delete_buffer(handle)
    }

    #[inline]
    pub fn delete_texture(&self, handle: TextureHandle) -> GfxResult<()> {
        self.resources.lock().delete_texture(handle)
    }

    #[inline]
    pub fn delete_sampler(&self, handle: SamplerHandle) -> GfxResult<()> {
        self.resources.lock().delete_sampler(handle)
    }
}

// update
impl Gfx {
    /// 如果 texture / sampler 自上次写入之后有变化，就重写整个 bindless 数组，返回写入的 binding 数量
    ///
    /// 需要在录制任何引用 bindless set 的命令之前调用，每帧一次
    pub fn update_descriptor_sets(&self) -> GfxResult<usize> {
        let resources = self.resources.lock();
        let mut bindless = self.bindless.lock();
        bindless.update_descriptor_sets(&resources.bindless_view())
    }

    /// set 0 为 bindless set 的 pipeline layout
    pub fn create_pipeline_layout(
        &self,
        push_constant_size: u32,
        stages: vk::ShaderStageFlags,
    ) -> GfxResult<vk::PipelineLayout> {
        self.bindless.lock().create_pipeline_layout(push_constant_size, stages)
    }
}
