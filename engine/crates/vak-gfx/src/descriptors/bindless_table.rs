use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::{
    backend::{GfxBackend, GfxDescriptorBinding, GfxDescriptorWrite, set_debug_name},
    error::{GfxError, GfxResult},
    resources::{pipeline::MAX_PUSH_CONSTANT_SIZE, resource_manager::GfxBindlessView},
};

/// bindless set 中各个 binding 的位置
pub struct GfxBindlessBinding;

impl GfxBindlessBinding {
    /// `Texture2D textures[]`
    pub const TEXTURES: u32 = 0;
    /// `SamplerState samplers[]`
    pub const SAMPLERS: u32 = 1;
}

/// bindless 描述符表
///
/// 一个 descriptor set，两个 update-after-bind 数组：
/// - binding 0: SAMPLED_IMAGE，长度等于 texture 池的容量
/// - binding 1: SAMPLER，长度等于 sampler 池的容量
///
/// 数组下标就是资源池的 slot 下标。空闲的 slot 以及不能被采样的 texture（深度、swapchain）
/// 指向 slot 0 的 placeholder，数组中没有空洞。
///
/// 描述符表只通过 [`GfxBindlessView`] 读取资源池，不会反向修改资源管理器。
pub struct GfxBindlessTable {
    backend: Arc<dyn GfxBackend>,

    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,

    texture_count: u32,
    sampler_count: u32,

    /// 最近一次写入时资源管理器的 bindless revision
    written_revision: Option<u64>,
    update_count: u64,

    valid: bool,
}

// new & init
impl GfxBindlessTable {
    pub fn new(backend: Arc<dyn GfxBackend>, texture_count: u32, sampler_count: u32) -> GfxResult<Self> {
        if texture_count == 0 || sampler_count == 0 {
            return Err(GfxError::InvalidDesc("bindless arrays must not be empty".to_string()));
        }

        let binding_flags = vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING
            | vk::DescriptorBindingFlags::PARTIALLY_BOUND;
        let bindings = [
            GfxDescriptorBinding {
                binding: GfxBindlessBinding::TEXTURES,
                descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                count: texture_count,
                stages: vk::ShaderStageFlags::ALL,
                flags: binding_flags,
            },
            GfxDescriptorBinding {
                binding: GfxBindlessBinding::SAMPLERS,
                descriptor_type: vk::DescriptorType::SAMPLER,
                count: sampler_count,
                stages: vk::ShaderStageFlags::ALL,
                flags: binding_flags,
            },
        ];
        let layout = backend.create_descriptor_set_layout(&bindings, true)?;
        set_debug_name(backend.as_ref(), layout, "DescriptorSetLayout", "bindless");

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: texture_count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: sampler_count,
            },
        ];
        let pool = backend
            .create_descriptor_pool(&pool_sizes, 1, true)
            .inspect_err(|_| backend.destroy_descriptor_set_layout(layout))?;
        set_debug_name(backend.as_ref(), pool, "DescriptorPool", "bindless");

        let set = match backend.allocate_descriptor_set(pool, layout) {
            Ok(set) => set,
            Err(err) => {
                backend.destroy_descriptor_pool(pool);
                backend.destroy_descriptor_set_layout(layout);
                return Err(err);
            }
        };
        set_debug_name(backend.as_ref(), set, "DescriptorSet", "bindless");

        log::info!("bindless table created: {} textures, {} samplers", texture_count, sampler_count);
        Ok(Self {
            backend,
            layout,
            pool,
            set,
            texture_count,
            sampler_count,
            written_revision: None,
            update_count: 0,
            valid: true,
        })
    }
}

// destroy
impl GfxBindlessTable {
    /// 调用方需要保证 GPU 已经不再使用这个 set
    pub fn destroy(&mut self) {
        if !self.valid {
            return;
        }
        // set 随 pool 一起释放
        self.backend.destroy_descriptor_pool(self.pool);
        self.backend.destroy_descriptor_set_layout(self.layout);
        self.valid = false;
        log::info!("bindless table destroyed after {} rewrites", self.update_count);
    }
}

impl Drop for GfxBindlessTable {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "bindless table must be destroyed manually");
    }
}

// getters
impl GfxBindlessTable {
    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn written_revision(&self) -> Option<u64> {
        self.written_revision
    }

    /// 实际重写描述符的次数
    #[inline]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    #[inline]
    pub fn is_dirty(&self, revision: u64) -> bool {
        self.written_revision != Some(revision)
    }
}

// update
impl GfxBindlessTable {
    /// # Phase: Before Render
    ///
    /// 资源池的内容和上次写入时不同时，用一次批量写入重写两个数组；否则什么都不做。
    /// 返回写入的 `VkWriteDescriptorSet` 数量。
    pub fn update_descriptor_sets(&mut self, view: &GfxBindlessView<'_>) -> GfxResult<usize> {
        if !self.is_dirty(view.revision) {
            return Ok(0);
        }
        let _span = profile_span!("GfxBindlessTable::update_descriptor_sets");

        let texture_infos = self.texture_infos(view)?;
        let sampler_infos = self.sampler_infos(view)?;

        let writes = [
            GfxDescriptorWrite {
                dst_set: self.set,
                dst_binding: GfxBindlessBinding::TEXTURES,
                dst_array_element: 0,
                descriptor_type: vk::DescriptorType::SAMPLED_IMAGE,
                image_infos: texture_infos,
            },
            GfxDescriptorWrite {
                dst_set: self.set,
                dst_binding: GfxBindlessBinding::SAMPLERS,
                dst_array_element: 0,
                descriptor_type: vk::DescriptorType::SAMPLER,
                image_infos: sampler_infos,
            },
        ];
        self.backend.update_descriptor_sets(&writes);

        self.written_revision = Some(view.revision);
        self.update_count += 1;
        log::debug!("bindless table rewritten at revision {}", view.revision);
        Ok(writes.len())
    }

    /// 以 bindless set 作为 set 0 创建 pipeline layout，push constant 覆盖整个 `[0, push_constant_size)`
    pub fn create_pipeline_layout(
        &self,
        push_constant_size: u32,
        stages: vk::ShaderStageFlags,
    ) -> GfxResult<vk::PipelineLayout> {
        if push_constant_size > MAX_PUSH_CONSTANT_SIZE {
            return Err(GfxError::InvalidDesc(format!(
                "push constant size {} exceeds {} bytes",
                push_constant_size, MAX_PUSH_CONSTANT_SIZE
            )));
        }
        let ranges = if push_constant_size > 0 {
            vec![vk::PushConstantRange {
                stage_flags: stages,
                offset: 0,
                size: push_constant_size,
            }]
        } else {
            vec![]
        };
        self.backend.create_pipeline_layout(std::slice::from_ref(&self.layout), &ranges)
    }
}

// tools
impl GfxBindlessTable {
    fn texture_infos(&self, view: &GfxBindlessView<'_>) -> GfxResult<Vec<vk::DescriptorImageInfo>> {
        let textures = view.textures;
        if textures.capacity() > self.texture_count {
            return Err(GfxError::InvalidDesc(format!(
                "texture pool ({} slots) larger than the bindless array ({})",
                textures.capacity(),
                self.texture_count
            )));
        }

        let slots = textures.iter_slots().collect_vec();
        let placeholder = slots
            .first()
            .copied()
            .flatten()
            .filter(|texture| texture.is_sampled())
            .map(|texture| texture.view())
            .ok_or_else(|| {
                log::error!("bindless placeholder texture is missing at slot 0");
                GfxError::InvalidDesc("bindless placeholder texture is missing at slot 0".to_string())
            })?;

        let infos = slots
            .into_iter()
            .map(|slot| {
                let image_view = match slot {
                    Some(texture) if texture.is_sampled() => texture.view(),
                    _ => placeholder,
                };
                vk::DescriptorImageInfo::default()
                    .image_view(image_view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            })
            .collect_vec();
        Ok(infos)
    }

    fn sampler_infos(&self, view: &GfxBindlessView<'_>) -> GfxResult<Vec<vk::DescriptorImageInfo>> {
        let samplers = view.samplers;
        if samplers.capacity() > self.sampler_count {
            return Err(GfxError::InvalidDesc(format!(
                "sampler pool ({} slots) larger than the bindless array ({})",
                samplers.capacity(),
                self.sampler_count
            )));
        }

        let slots = samplers.iter_slots().collect_vec();
        let Some(Some(default_sampler)) = slots.first().copied() else {
            log::error!("bindless default sampler is missing at slot 0");
            return Err(GfxError::InvalidDesc("bindless default sampler is missing at slot 0".to_string()));
        };
        let default_sampler = default_sampler.handle();

        let infos = slots
            .into_iter()
            .map(|slot| vk::DescriptorImageInfo::default().sampler(slot.map_or(default_sampler, |s| s.handle())))
            .collect_vec();
        Ok(infos)
    }
}
