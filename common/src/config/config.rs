use crate::errors::AppResult;
use config::Config;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub database: Option<DatabaseConfig>,
    pub sys: Option<SysConfig>,
    pub cache: Option<CacheConfig>,
    pub store: Option<StoreConfig>,
    pub feed: Option<FeedConfig>,
}

impl AppConfig {
    /// 从 toml 文件加载配置，APP__ 前缀的环境变量可覆盖文件中的值
    pub fn new(file: &str) -> AppResult<Self> {
        let config = Config::builder()
            .add_source(config::File::with_name(file).required(true))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let cfg = config.try_deserialize::<AppConfig>()?;
        Ok(cfg)
    }

    /// 仅使用环境变量（测试或内存模式）
    pub fn from_env() -> AppResult<Self> {
        let config = Config::builder()
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        Ok(config.try_deserialize::<AppConfig>()?)
    }

    pub fn get_database(&self) -> DatabaseConfig {
        self.database.clone().unwrap_or_default()
    }
    pub fn get_sys(&self) -> SysConfig {
        self.sys.clone().unwrap_or_default()
    }
    pub fn get_cache(&self) -> CacheConfig {
        self.cache.clone().unwrap_or_default()
    }
    pub fn get_store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }
    pub fn get_feed(&self) -> FeedConfig {
        self.feed.clone().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    pub url: String,
    pub db_name: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SysConfig {
    //全局日志级别
    pub log_level: String,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 1800, max_capacity: 10_000 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Mongo,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    // in 查询单批 id 上限
    pub id_batch_size: usize,
    // 动态流按好友 id 过滤的单批上限
    pub feed_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: StoreBackend::Memory, id_batch_size: 30, feed_batch_size: 10 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub page_size: usize,
    pub birthday_window_days: i64,
    pub min_search_len: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { page_size: 10, birthday_window_days: 30, min_search_len: 2 }
    }
}
