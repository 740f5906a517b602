use std::sync::Arc;

use ash::vk;

use crate::{
    backend::{GfxBackend, GfxColorAttachment, GfxDepthAttachment, GfxRenderingInfo},
    commands::barrier::{GfxBarrierMask, GfxBufferBarrier, GfxImageBarrier, GfxStageAccess},
    error::{GfxError, GfxResult},
    resources::{
        buffer::BufferHandle,
        format::GfxFormatUtils,
        pipeline::{MAX_PUSH_CONSTANT_SIZE, PipelineHandle},
        resource_manager::GfxResourceManager,
        texture::TextureHandle,
    },
    stats::GfxCommandStats,
};

/// 绑定 pipeline 之后，push constant 需要用到的信息
#[derive(Clone, Copy, Debug)]
struct GfxBoundPipeline {
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    push_constant_stages: vk::ShaderStageFlags,
}

/// 从 [`GfxCommandRing`](crate::commands::command_ring::GfxCommandRing) 中取出的、正在录制的命令缓冲
///
/// 一个 command list 只能被提交回创建它的 ring。所有引用资源的录制命令都通过 handle 解析，
/// 失效的 handle 返回 [`GfxError::StaleHandle`]，而不是录制一个悬空的 vulkan 对象。
///
/// # 使用示例
/// ```ignore
/// let mut cmd = ring.acquire_command_list()?;
/// cmd.begin_rendering(&mut resources, color, Some(depth))?;
/// cmd.bind_pipeline(&resources, pipeline)?;
/// cmd.push_constants_pod(&push_constants);
/// cmd.draw(3, 1);
/// cmd.end_rendering();
/// ring.submit(cmd, &[], &[])?;
/// ```
pub struct GfxCommandList {
    backend: Arc<dyn GfxBackend>,
    command_buffer: vk::CommandBuffer,

    ring_id: u64,
    slot: usize,

    /// 为 null 时表示这个 ring 不绑定 bindless set（例如 staging ring）
    bindless_set: vk::DescriptorSet,
    bound_pipeline: Option<GfxBoundPipeline>,
    rendering: bool,
    open_labels: u32,

    stats: GfxCommandStats,
}

// new & init
impl GfxCommandList {
    pub(crate) fn new(
        backend: Arc<dyn GfxBackend>,
        command_buffer: vk::CommandBuffer,
        ring_id: u64,
        slot: usize,
        bindless_set: vk::DescriptorSet,
    ) -> Self {
        Self {
            backend,
            command_buffer,
            ring_id,
            slot,
            bindless_set,
            bound_pipeline: None,
            rendering: false,
            open_labels: 0,
            stats: GfxCommandStats::default(),
        }
    }

    /// 提交之前的检查：rendering 必须已经结束，未关闭的 label 会被自动关闭
    pub(crate) fn finish(&mut self) -> GfxResult<()> {
        if self.rendering {
            return Err(GfxError::InvalidDesc("command list submitted inside begin_rendering/end_rendering".to_string()));
        }
        if self.open_labels > 0 {
            log::warn!("command list submitted with {} open debug labels", self.open_labels);
            while self.open_labels > 0 {
                self.end_label();
            }
        }
        Ok(())
    }
}

// getters
impl GfxCommandList {
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn stats(&self) -> GfxCommandStats {
        self.stats
    }

    #[inline]
    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    #[inline]
    pub(crate) fn ring_id(&self) -> u64 {
        self.ring_id
    }

    #[inline]
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    #[cfg(test)]
    pub(crate) fn rendering_for_test(&mut self) {
        self.rendering = true;
    }
}

// rendering
impl GfxCommandList {
    /// 将 attachment 转换到对应的 layout，开始 dynamic rendering，并设置覆盖整个 color target 的 viewport 和 scissor
    ///
    /// color 清空为黑色，depth 清空为 0（reversed-z）
    pub fn begin_rendering(
        &mut self,
        resources: &mut GfxResourceManager,
        color: TextureHandle,
        depth: Option<TextureHandle>,
    ) -> GfxResult<()> {
        if self.rendering {
            return Err(GfxError::InvalidDesc("begin_rendering called twice".to_string()));
        }

        let color_texture = resources.texture_mut(color)?;
        if color_texture.layout() != vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL {
            color_texture.transition_to(self, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }
        let extent = color_texture.extent_2d();
        let color_attachment = GfxColorAttachment {
            view: color_texture.view(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        };

        let depth_attachment = match depth {
            Some(depth) => {
                let depth_texture = resources.texture_mut(depth)?;
                let depth_layout = if GfxFormatUtils::is_stencil_format(depth_texture.format()) {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
                };
                if depth_texture.layout() != depth_layout {
                    depth_texture.transition_to(self, depth_layout);
                }
                Some(GfxDepthAttachment {
                    view: depth_texture.view(),
                    layout: depth_layout,
                    clear_depth: 0.0,
                })
            }
            None => None,
        };

        self.backend.cmd_begin_rendering(
            self.command_buffer,
            &GfxRenderingInfo {
                extent,
                color: color_attachment,
                depth: depth_attachment,
            },
        );
        // 翻转 viewport 的 y 轴，使 NDC 的 y 轴朝上
        self.backend.cmd_set_viewport(
            self.command_buffer,
            vk::Viewport {
                x: 0.0,
                y: extent.height as f32,
                width: extent.width as f32,
                height: -(extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.backend.cmd_set_scissor(
            self.command_buffer,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );
        self.rendering = true;
        Ok(())
    }

    #[inline]
    pub fn end_rendering(&mut self) {
        debug_assert!(self.rendering, "end_rendering without begin_rendering");
        self.backend.cmd_end_rendering(self.command_buffer);
        self.rendering = false;
    }

    #[inline]
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.draw_ranged((vertex_count, 0), (instance_count, 0));
    }

    /// - vertex_info: (vertex_count, first_vertex)
    /// - instance_info: (instance_count, first_instance)
    pub fn draw_ranged(&mut self, vertex_info: (u32, u32), instance_info: (u32, u32)) {
        self.backend.cmd_draw(self.command_buffer, vertex_info.0, instance_info.0, vertex_info.1, instance_info.1);
        self.stats.draw_calls += 1;
        self.stats.vertices += vertex_info.0 as u64 * instance_info.0 as u64;
    }

    #[inline]
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) {
        self.draw_indexed_ranged((index_count, 0), (instance_count, 0), 0);
    }

    /// - index_info: (index_count, first_index)
    /// - instance_info: (instance_count, first_instance)
    /// - vertex_offset: 加到每个 index 上
    pub fn draw_indexed_ranged(&mut self, index_info: (u32, u32), instance_info: (u32, u32), vertex_offset: i32) {
        self.backend.cmd_draw_indexed(
            self.command_buffer,
            index_info.0,
            instance_info.0,
            index_info.1,
            vertex_offset,
            instance_info.1,
        );
        self.stats.draw_calls += 1;
        self.stats.indices += index_info.0 as u64 * instance_info.0 as u64;
    }

    /// indirect buffer 中紧密排列着 `count` 个 `vk::DrawIndexedIndirectCommand`
    pub fn draw_indexed_indirect(
        &mut self,
        resources: &GfxResourceManager,
        indirect_buffer: BufferHandle,
        count: u32,
    ) -> GfxResult<()> {
        const STRIDE: u32 = size_of::<vk::DrawIndexedIndirectCommand>() as u32;

        let buffer = resources.buffer(indirect_buffer)?;
        if (count as u64) * (STRIDE as u64) > buffer.size() {
            return Err(GfxError::InvalidDesc(format!(
                "indirect buffer of {} bytes cannot hold {} draws",
                buffer.size(),
                count
            )));
        }
        self.backend.cmd_draw_indexed_indirect(self.command_buffer, buffer.handle(), 0, count, STRIDE);
        self.stats.indirect_draw_calls += 1;
        self.stats.indirect_draws += count;
        Ok(())
    }
}

// state binding
impl GfxCommandList {
    /// 绑定 pipeline，同时把 bindless set 绑定到 set 0
    pub fn bind_pipeline(&mut self, resources: &GfxResourceManager, pipeline: PipelineHandle) -> GfxResult<()> {
        let pipeline = resources.pipeline(pipeline)?;
        self.backend.cmd_bind_pipeline(self.command_buffer, pipeline.bind_point(), pipeline.pipeline());
        if self.bindless_set != vk::DescriptorSet::null() {
            self.backend.cmd_bind_descriptor_set(
                self.command_buffer,
                pipeline.bind_point(),
                pipeline.layout(),
                0,
                self.bindless_set,
            );
        }
        self.bound_pipeline = Some(GfxBoundPipeline {
            layout: pipeline.layout(),
            bind_point: pipeline.bind_point(),
            push_constant_stages: pipeline.push_constant_stages,
        });
        Ok(())
    }

    /// `offset` 是 buffer 内的字节偏移，必须落在 buffer 内
    pub fn bind_vertex_buffer(
        &self,
        resources: &GfxResourceManager,
        buffer: BufferHandle,
        offset: vk::DeviceSize,
    ) -> GfxResult<()> {
        let buffer = resources.buffer(buffer)?;
        Self::check_bind_offset(buffer.size(), offset)?;
        self.backend.cmd_bind_vertex_buffer(self.command_buffer, buffer.handle(), offset);
        Ok(())
    }

    pub fn bind_index_buffer(
        &self,
        resources: &GfxResourceManager,
        buffer: BufferHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) -> GfxResult<()> {
        let buffer = resources.buffer(buffer)?;
        Self::check_bind_offset(buffer.size(), offset)?;
        self.backend.cmd_bind_index_buffer(self.command_buffer, buffer.handle(), offset, index_type);
        Ok(())
    }

    fn check_bind_offset(buffer_size: vk::DeviceSize, offset: vk::DeviceSize) -> GfxResult<()> {
        if offset >= buffer_size {
            return Err(GfxError::InvalidDesc(format!(
                "bind offset {} is outside a buffer of {} bytes",
                offset, buffer_size
            )));
        }
        Ok(())
    }

    /// 写入当前 pipeline 的 push constant，从 offset 0 开始
    ///
    /// # Panics
    /// 数据超过 128 字节，或者还没有绑定 pipeline
    pub fn push_constants(&self, data: &[u8]) {
        assert!(
            data.len() <= MAX_PUSH_CONSTANT_SIZE as usize,
            "push constants of {} bytes exceed the {}-byte limit",
            data.len(),
            MAX_PUSH_CONSTANT_SIZE
        );
        let Some(bound) = self.bound_pipeline else {
            panic!("push_constants requires a bound pipeline");
        };
        self.backend.cmd_push_constants(self.command_buffer, bound.layout, bound.push_constant_stages, data);
    }

    #[inline]
    pub fn push_constants_pod<T: bytemuck::Pod>(&self, value: &T) {
        self.push_constants(bytemuck::bytes_of(value));
    }

    #[inline]
    pub fn bound_bind_point(&self) -> Option<vk::PipelineBindPoint> {
        self.bound_pipeline.map(|bound| bound.bind_point)
    }
}

// 同步相关命令
impl GfxCommandList {
    /// 显式的 layout 转换，记录 barrier 的同时更新 texture 的 layout
    pub fn image_barrier(
        &self,
        resources: &mut GfxResourceManager,
        texture: TextureHandle,
        new_layout: vk::ImageLayout,
        src: GfxStageAccess,
        dst: GfxStageAccess,
    ) -> GfxResult<()> {
        resources.transition_texture(self, texture, new_layout, src, dst)
    }

    /// stage 和 access 由前后两个 layout 推导
    pub fn image_transition(
        &self,
        resources: &mut GfxResourceManager,
        texture: TextureHandle,
        new_layout: vk::ImageLayout,
    ) -> GfxResult<()> {
        resources.texture_mut(texture)?.transition_to(self, new_layout);
        Ok(())
    }

    pub fn buffer_barrier(
        &self,
        resources: &GfxResourceManager,
        buffer: BufferHandle,
        src: GfxStageAccess,
        dst: GfxStageAccess,
    ) -> GfxResult<()> {
        let buffer = resources.buffer(buffer)?;
        let barrier = GfxBufferBarrier::new()
            .buffer(buffer.handle(), 0, vk::WHOLE_SIZE)
            .mask(GfxBarrierMask::new(src, dst));
        self.record_buffer_barrier(&barrier);
        Ok(())
    }
}

// debug 相关命令
impl GfxCommandList {
    pub fn begin_label(&mut self, label_name: &str, label_color: glam::Vec4) {
        self.backend.cmd_begin_label(self.command_buffer, label_name, label_color.to_array());
        self.open_labels += 1;
    }

    pub fn end_label(&mut self) {
        if self.open_labels == 0 {
            log::warn!("end_label without a matching begin_label");
            return;
        }
        self.backend.cmd_end_label(self.command_buffer);
        self.open_labels -= 1;
    }
}

// crate 内部使用的原始命令
impl GfxCommandList {
    #[inline]
    pub(crate) fn record_image_barrier(&self, barrier: &GfxImageBarrier) {
        self.backend.cmd_pipeline_barrier(self.command_buffer, std::slice::from_ref(barrier.inner()), &[]);
    }

    #[inline]
    pub(crate) fn record_buffer_barrier(&self, barrier: &GfxBufferBarrier) {
        self.backend.cmd_pipeline_barrier(self.command_buffer, &[], std::slice::from_ref(barrier.inner()));
    }

    #[inline]
    pub(crate) fn record_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.backend.cmd_copy_buffer(self.command_buffer, src, dst, regions);
    }

    #[inline]
    pub(crate) fn record_copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.backend.cmd_copy_buffer_to_image(self.command_buffer, src, dst, dst_layout, regions);
    }
}
