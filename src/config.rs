//! Engine configuration module / 引擎配置模块
//!
//! Manages configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<EngineConfig>>> = OnceCell::new();

/// Engine configuration / 引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Search configuration / 搜索配置
    pub search: SearchConfig,
    /// Result cache configuration / 结果缓存配置
    pub cache: CacheConfig,
    /// Rate limit configuration / 限流配置
    pub rate_limit: RateLimitConfig,
    /// Tag administration configuration / 标签管理配置
    pub tags: TagConfig,
    /// Local storage configuration / 本地存储配置
    pub storage: StorageConfig,
}

/// Search configuration / 搜索配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum trimmed query length / 最短查询长度
    pub min_query_length: usize,
    /// Per-collection result limit / 每个集合的结果上限
    pub result_limit: usize,
    /// Fallback query limit = result_limit * multiplier / 回退查询倍数
    pub fallback_multiplier: usize,
    /// Max operands of an "any of" store filter / any-of 过滤的最大值个数
    pub any_of_limit: usize,
    /// Title used when a memo's book can't be resolved / 无法解析书名时的占位
    pub unknown_book_title: String,
}

/// Result cache configuration / 结果缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in milliseconds / 缓存有效期（毫秒）
    pub expiry_ms: i64,
    /// Maximum number of cached queries / 最大缓存条目数
    pub max_items: usize,
    /// Key of the persisted blob / 持久化键名
    pub storage_key: String,
}

/// Rate limit configuration / 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Cooldown between identical queries (ms) / 相同查询的冷却时间
    pub cooldown_ms: i64,
}

/// Tag administration configuration / 标签管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Writes per atomic batch, kept below the store's hard limit / 每批写入数
    pub batch_size: usize,
}

/// Local storage configuration / 本地存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Cache directory (relative to data_dir) / 缓存目录
    pub cache_dir: String,
    /// Library snapshot used by the CLI (relative to data_dir) / 数据快照文件
    pub snapshot_file: String,
    /// Owner whose documents are searched / 文档所属用户
    pub owner_id: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_query_length: 2,
            result_limit: 50,
            fallback_multiplier: 2,
            any_of_limit: 10,
            unknown_book_title: "Unknown book".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_ms: 5 * 60 * 1000,
            max_items: 50,
            storage_key: "search_cache".to_string(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { cooldown_ms: 2000 }
    }
}

impl Default for TagConfig {
    fn default() -> Self {
        Self { batch_size: 450 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            cache_dir: "cache".to_string(),
            snapshot_file: "library.json".to_string(),
            owner_id: "local".to_string(),
        }
    }
}

impl SearchConfig {
    /// Limit of the minimal fallback query / 回退查询上限
    pub fn fallback_limit(&self) -> usize {
        self.result_limit.saturating_mul(self.fallback_multiplier.max(1))
    }
}

impl EngineConfig {
    /// Get the full data directory path / 获取数据目录
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }

    /// Get the cache directory / 获取缓存目录
    pub fn get_cache_dir(&self) -> PathBuf {
        let data_dir = self.get_data_dir();
        if self.storage.cache_dir.is_empty() {
            data_dir
        } else {
            data_dir.join(&self.storage.cache_dir)
        }
    }

    /// Get the snapshot file path / 获取快照文件路径
    pub fn get_snapshot_path(&self) -> PathBuf {
        self.get_data_dir().join(&self.storage.snapshot_file)
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from config.json in the working directory / 加载配置文件
pub fn load_config() -> Result<EngineConfig, String> {
    load_config_from(&get_config_path())
}

/// Load configuration from a path, or create default if not exists / 加载配置，不存在则创建默认配置
pub fn load_config_from(config_path: &Path) -> Result<EngineConfig, String> {
    if config_path.exists() {
        // Load existing config / 加载现有配置
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        // Create default config / 创建默认配置
        let config = EngineConfig::default();
        save_config_to(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config_to(config: &EngineConfig, config_path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config() -> Result<Arc<RwLock<EngineConfig>>, String> {
    let config = load_config()?;

    let config_arc = Arc::new(RwLock::new(config));

    CONFIG.set(config_arc.clone())
        .map_err(|_| "Config already initialized".to_string())?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<EngineConfig>> {
    CONFIG.get_or_init(|| {
        let config = load_config().unwrap_or_default();
        Arc::new(RwLock::new(config))
    }).clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> EngineConfig {
    get_config().read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tags.batch_size, 450);
        assert_eq!(config.search.fallback_limit(), 100);
        assert_eq!(config.cache.expiry_ms, 300_000);
    }

    #[test]
    fn test_load_creates_default_and_reads_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let created = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.search.min_query_length, 2);

        // 缺省字段使用默认值
        std::fs::write(&path, r#"{"rate_limit": {"cooldown_ms": 500}}"#).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.rate_limit.cooldown_ms, 500);
        assert_eq!(loaded.cache.max_items, 50);
    }

    #[test]
    fn test_corrupt_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
