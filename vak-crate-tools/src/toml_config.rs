use std::{fs, path::Path};

use anyhow::Context;
use serde::de::DeserializeOwned;

/// 从 TOML 文件加载配置
///
/// 文件中缺失的字段由目标类型的 `#[serde(default)]` 补齐
pub fn load_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> anyhow::Result<T> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).with_context(|| format!("failed to read config file: {:?}", path))?;
    parse_toml(&content).with_context(|| format!("failed to parse config file: {:?}", path))
}

/// 从内存中的 TOML 文本解析配置
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> anyhow::Result<T> {
    let config = toml::from_str(content).context("invalid TOML")?;
    Ok(config)
}
