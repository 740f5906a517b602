use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::{GfxError, GfxResult};

/// GFX 层的配置，所有字段都有默认值
///
/// 池的容量同时是 bindless 数组的长度，运行时不会增长
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    pub max_buffers: u32,
    pub max_textures: u32,
    pub max_samplers: u32,
    pub max_pipelines: u32,

    /// 帧 command ring 的 slot 数量
    pub frame_command_lists: u32,
    /// staging region 的字节数
    pub staging_capacity: u64,

    pub acquire_timeout_ms: u64,
    pub upload_timeout_ms: u64,

    pub prefer_mailbox: bool,
    pub enable_validation: bool,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            max_buffers: 4096,
            max_textures: 128,
            max_samplers: 32,
            max_pipelines: 64,
            frame_command_lists: 16,
            staging_capacity: 128 * 1024 * 1024,
            acquire_timeout_ms: 5000,
            upload_timeout_ms: 10000,
            prefer_mailbox: true,
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GfxConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = vak_crate_tools::toml_config::parse_toml(content)?;
        config.validate().context("invalid gfx config")?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config: Self = vak_crate_tools::toml_config::load_toml(path)?;
        config.validate().with_context(|| format!("invalid gfx config: {:?}", path))?;
        Ok(config)
    }

    /// texture 和 sampler 池至少需要放下 slot 0 的 placeholder
    pub fn validate(&self) -> GfxResult<()> {
        let invalid = |msg: &str| Err(GfxError::InvalidDesc(format!("gfx config: {}", msg)));
        if self.max_textures == 0 || self.max_samplers == 0 {
            return invalid("texture and sampler pools need at least one slot for the placeholders");
        }
        if self.max_buffers == 0 || self.max_pipelines == 0 {
            return invalid("buffer and pipeline pools must not be empty");
        }
        if self.frame_command_lists == 0 {
            return invalid("frame_command_lists must be at least 1");
        }
        if self.staging_capacity == 0 {
            return invalid("staging_capacity must not be zero");
        }
        Ok(())
    }

    #[inline]
    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms.saturating_mul(1_000_000)
    }

    #[inline]
    pub fn upload_timeout_ns(&self) -> u64 {
        self.upload_timeout_ms.saturating_mul(1_000_000)
    }
}
