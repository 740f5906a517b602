use ash::vk;

/// barrier 一侧的 stage 和 access
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxStageAccess {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl GfxStageAccess {
    pub const NONE: Self = Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE);
    pub const TRANSFER_WRITE: Self = Self::new(vk::PipelineStageFlags2::COPY, vk::AccessFlags2::TRANSFER_WRITE);
    pub const ALL_COMMANDS: Self = Self::new(
        vk::PipelineStageFlags2::ALL_COMMANDS,
        vk::AccessFlags2::from_raw(vk::AccessFlags2::MEMORY_READ.as_raw() | vk::AccessFlags2::MEMORY_WRITE.as_raw()),
    );

    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    /// 某个 layout 下典型的访问方式，用于不显式指定 stage 的 layout 转换
    pub fn for_layout(layout: vk::ImageLayout) -> Self {
        match layout {
            vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => Self::NONE,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL => Self::TRANSFER_WRITE,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
                Self::new(vk::PipelineStageFlags2::COPY, vk::AccessFlags2::TRANSFER_READ)
            }
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => Self::new(
                vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
            ),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => Self::new(
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            | vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL => Self::new(
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            // present engine 的读取不需要 access mask
            vk::ImageLayout::PRESENT_SRC_KHR => Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE),
            _ => Self::ALL_COMMANDS,
        }
    }

    /// 上传完成后，buffer 的消费者所在的 stage 和 access
    ///
    /// 由 usage 推导，多种 usage 时取并集；无法识别的 usage 退化为 ALL_COMMANDS
    pub fn buffer_consumer(usage: vk::BufferUsageFlags) -> Self {
        let mut stage = vk::PipelineStageFlags2::NONE;
        let mut access = vk::AccessFlags2::NONE;

        if usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            stage |= vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT;
            access |= vk::AccessFlags2::VERTEX_ATTRIBUTE_READ;
        }
        if usage.contains(vk::BufferUsageFlags::INDEX_BUFFER) {
            stage |= vk::PipelineStageFlags2::INDEX_INPUT;
            access |= vk::AccessFlags2::INDEX_READ;
        }
        if usage.contains(vk::BufferUsageFlags::INDIRECT_BUFFER) {
            stage |= vk::PipelineStageFlags2::DRAW_INDIRECT;
            access |= vk::AccessFlags2::INDIRECT_COMMAND_READ;
        }
        if usage.intersects(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER)
            || usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
        {
            stage |= vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER;
            access |= vk::AccessFlags2::SHADER_READ;
        }

        if stage == vk::PipelineStageFlags2::NONE {
            Self::ALL_COMMANDS
        } else {
            Self::new(stage, access)
        }
    }
}

/// barrier 使用的 src 和 dst 访问 mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrierMask {
    pub src_stage: vk::PipelineStageFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl GfxBarrierMask {
    #[inline]
    pub fn new(src: GfxStageAccess, dst: GfxStageAccess) -> Self {
        Self {
            src_stage: src.stage,
            dst_stage: dst.stage,
            src_access: src.access,
            dst_access: dst.access,
        }
    }
}

/// 便捷创建 image memory barrier 的结构体
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'_> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    /// builder
    /// 默认覆盖所有 mip level
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'_> {
        &self.inner
    }

    #[inline]
    pub fn mask(mut self, mask: GfxBarrierMask) -> Self {
        self.inner.src_stage_mask = mask.src_stage;
        self.inner.dst_stage_mask = mask.dst_stage;
        self.inner.src_access_mask = mask.src_access;
        self.inner.dst_access_mask = mask.dst_access;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}
