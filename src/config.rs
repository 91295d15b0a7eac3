//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `HIVE__MESH__HOP_BUDGET=20`）。循环阈值与跳数预算是经验常数，
//! 刻意做成可配置项而不是硬编码不变量。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub mesh: MeshSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub data: DataSection,
}

/// [mesh] 段：调度预算与投机开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeshSection {
    /// 单回合调度迭代上限
    #[serde(default = "default_hop_budget")]
    pub hop_budget: u32,
    /// 同名 worker 重复出场多少次后强制转入综合
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,
    /// 并行扇出执行池大小（专科数量 + 余量）
    #[serde(default = "default_max_parallel_workers")]
    pub max_parallel_workers: usize,
    /// 回合级墙钟上限（秒）
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    /// 是否在路由确认前投机启动合格 worker
    #[serde(default = "default_speculation")]
    pub speculation: bool,
}

fn default_hop_budget() -> u32 {
    15
}

fn default_loop_threshold() -> usize {
    3
}

fn default_max_parallel_workers() -> usize {
    6
}

fn default_turn_timeout_secs() -> u64 {
    120
}

fn default_speculation() -> bool {
    true
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            hop_budget: default_hop_budget(),
            loop_threshold: default_loop_threshold(),
            max_parallel_workers: default_max_parallel_workers(),
            turn_timeout_secs: default_turn_timeout_secs(),
            speculation: default_speculation(),
        }
    }
}

/// [session] 段：闲置会话过期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_session_timeout_secs() -> u64 {
    3600
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
        }
    }
}

/// [cache] 段：响应缓存 TTL 与容量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    #[serde(default = "default_response_ttl_secs")]
    pub response_ttl_secs: u64,
    #[serde(default = "default_response_capacity")]
    pub response_capacity: usize,
}

fn default_response_ttl_secs() -> u64 {
    300
}

fn default_response_capacity() -> usize {
    128
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            response_ttl_secs: default_response_ttl_secs(),
            response_capacity: default_response_capacity(),
        }
    }
}

/// [data] 段：数据目录（文件数据源 + 修改指纹）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataSection {
    #[serde(default = "default_data_root")]
    pub root: PathBuf,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            root: default_data_root(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mesh: MeshSection::default(),
            session: SessionSection::default(),
            cache: CacheSection::default(),
            data: DataSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_budgets() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.mesh.hop_budget, 15);
        assert_eq!(cfg.mesh.loop_threshold, 3);
        assert_eq!(cfg.session.timeout_secs, 3600);
        assert_eq!(cfg.cache.response_ttl_secs, 300);
    }
}
