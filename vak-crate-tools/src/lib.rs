//! Vak 工具集
//!
//! 提供日志初始化、TOML 配置加载等通用工具。
//!
//! # 日志
//! 统一使用 `log` 门面，由 [`init_log::init_log`] 安装带颜色和时间戳的 env_logger。
//!
//! # 配置
//! 所有配置文件都是 TOML，通过 [`toml_config::load_toml`] 读取，缺失字段由 serde default 补齐。

pub mod init_log;
pub mod toml_config;
