use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 对象存储：按 key 上传，返回可访问的 url；业务层只持有 url
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> AppResult<String>;
    /// url 不存在时视为成功
    async fn delete(&self, url: &str) -> AppResult<()>;
}

struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// 进程内实现，测试与本地运行使用
#[derive(Clone)]
pub struct MemoryObjectStorage {
    base_url: String,
    objects: Arc<DashMap<String, StoredObject>>,
    deleted: Arc<DashSet<String>>,
    failing: Arc<AtomicBool>,
}

impl Default for MemoryObjectStorage {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

impl MemoryObjectStorage {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            objects: Arc::new(DashMap::new()),
            deleted: Arc::new(DashSet::new()),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.contains_key(url)
    }

    pub fn content_type(&self, url: &str) -> Option<String> {
        self.objects.get(url).map(|o| o.content_type.clone())
    }

    pub fn size(&self, url: &str) -> Option<usize> {
        self.objects.get(url).map(|o| o.data.len())
    }

    pub fn was_deleted(&self, url: &str) -> bool {
        self.deleted.contains(url)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Store("object storage unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> AppResult<String> {
        self.check()?;
        let url = self.url_for(key);
        self.objects.insert(url.clone(), StoredObject { data, content_type: content_type.to_string() });
        Ok(url)
    }

    async fn delete(&self, url: &str) -> AppResult<()> {
        self.check()?;
        if self.objects.remove(url).is_some() {
            self.deleted.insert(url.to_string());
        }
        Ok(())
    }
}
