use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::manager::optimistic::OverlayMap;
use common::errors::AppResult;
use common::repository::{BaseRepository, Entity, Query, TypedSubscription};
use log::debug;

/// 实时视图：用缓存快照做首屏，之后每次推送整体替换本地状态并写回缓存。
/// 本地隐藏的 id 是可撤销的覆盖层，收到权威快照后已确认的部分即被清除
pub struct LiveView<T: Entity> {
    key: CacheKey,
    cache: ClientCache,
    subscription: TypedSubscription<T>,
    items: Vec<T>,
    loading: bool,
    hidden: OverlayMap<String, ()>,
}

impl<T: Entity> LiveView<T> {
    pub async fn open(
        repo: &BaseRepository<T>,
        query: impl Into<Query>,
        key: CacheKey,
        cache: ClientCache,
    ) -> AppResult<Self> {
        let seeded = cache.get::<Vec<T>>(&key);
        let subscription = repo.subscribe(query).await?;
        debug!("live view {} opened, seeded={}", key, seeded.is_some());
        Ok(Self {
            key,
            cache,
            subscription,
            loading: seeded.is_none(),
            items: seeded.unwrap_or_default(),
            hidden: OverlayMap::new(),
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// 最近一次权威快照
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// 去掉本地隐藏 id 之后的结果
    pub fn visible(&self) -> Vec<T> {
        self.items.iter().filter(|item| !self.hidden.contains(&item.id().to_string())).cloned().collect()
    }

    pub fn hidden(&self) -> &OverlayMap<String, ()> {
        &self.hidden
    }

    /// 等待下一次推送；订阅结束时返回 None
    pub async fn next(&mut self) -> Option<&[T]> {
        let snapshot = self.subscription.next().await?;
        self.apply(snapshot);
        Some(&self.items)
    }

    /// 非阻塞地吸收积压的推送，只保留最新一份
    pub fn poll(&mut self) -> bool {
        match self.subscription.latest() {
            Some(snapshot) => {
                self.apply(snapshot);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, snapshot: Vec<T>) {
        debug!("live view {} received {} docs", self.key, snapshot.len());
        self.cache.put(&self.key, snapshot.clone());
        self.items = snapshot;
        self.loading = false;
        self.hidden.reconcile();
    }
}
