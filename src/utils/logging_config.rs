//! 日志过滤配置
//! 读取 config/observability.json 中的默认级别和模块级别，RUST_LOG 存在时以环境变量为准

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default_level: String,

    /// key: 模块路径（如 "seckill_gate::order_worker"），value: 级别
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn load() -> Self {
        Self::load_from(&PathBuf::from("config/observability.json"))
    }

    /// 文件缺失或解析失败时回落到默认配置（此时日志系统尚未初始化，只能打到 stderr）
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<LoggingConfig>(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("解析日志配置文件失败: {:?}, 错误: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("读取日志配置文件失败: {:?}, 错误: {}", path, e);
                Self::default()
            }
        }
    }

    /// "info,seckill_gate::cache=debug" 形式的过滤串
    pub fn filter_directives(&self) -> String {
        std::iter::once(self.default_level.clone())
            .chain(self.modules.iter().map(|(m, l)| format!("{}={}", m, l)))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn build_env_filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            return EnvFilter::from_default_env();
        }
        EnvFilter::try_new(self.filter_directives()).unwrap_or_else(|_| EnvFilter::new(self.default_level.clone()))
    }
}
