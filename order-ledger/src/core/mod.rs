//! 核心模块 - 引擎配置
//!
//! - [`Config`] - 税务调用超时/重试、重算冲突重试、事件通道、日志

pub mod config;

pub use config::Config;
