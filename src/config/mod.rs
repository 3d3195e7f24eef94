mod config_defaults;
mod config_types;

pub use config_types::*;

use std::path::{Path, PathBuf};

impl Config {
    /// 从工作目录下的 config.toml 加载；文件不存在时使用默认配置
    pub fn load() -> anyhow::Result<Self> {
        let config_path = PathBuf::from("config.toml");
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// 留空或 "auto" 时生成 hostname-pid-短uuid
pub fn normalize_instance_id(s: &str) -> String {
    if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("auto") {
        let hostname = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let pid = std::process::id();
        let short = uuid::Uuid::new_v4().to_string();
        let short = short.split('-').next().unwrap_or("x");
        format!("{}-{}-{}", hostname, pid, short)
    } else {
        s.trim().to_string()
    }
}
