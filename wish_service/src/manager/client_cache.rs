use crate::entitys::user_entity::UserInfo;
use crate::manager::cache_key::CacheKey;
use common::config::CacheConfig;
use log::debug;
use moka::sync::Cache;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

type Snapshot = Arc<dyn Any + Send + Sync>;

/// 会话内共享的快照缓存，按 CacheKey 存放任意类型的快照
#[derive(Clone)]
pub struct ClientCache {
    cache: Cache<String, Snapshot>,
}

impl ClientCache {
    /// 创建带有 TTL 和最大容量的缓存
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder().time_to_live(Duration::from_secs(ttl_secs)).max_capacity(max_capacity).build();
        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl_secs, config.max_capacity)
    }

    /// 类型不符时视为未命中
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &CacheKey) -> Option<T> {
        let snapshot = self.cache.get(&key.to_string())?;
        snapshot.downcast_ref::<T>().cloned()
    }

    pub fn put<T: Send + Sync + 'static>(&self, key: &CacheKey, value: T) {
        debug!("cache put {}", key);
        self.cache.insert(key.to_string(), Arc::new(value));
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(&key.to_string())
    }

    /// 一批用户同时写入 users:{id}，让其他视图读到同一份资料
    pub fn put_users(&self, users: &[UserInfo]) {
        for user in users {
            self.put(&CacheKey::User(user.id.clone()), user.clone());
        }
    }

    pub fn get_user(&self, id: &str) -> Option<UserInfo> {
        self.get(&CacheKey::User(id.to_string()))
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(&key.to_string());
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}
