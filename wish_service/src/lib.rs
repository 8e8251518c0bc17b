pub mod biz_service;
pub mod entitys;
pub mod manager;
pub mod session;

use crate::biz_service::activity_service::ActivityService;
use crate::biz_service::folder_service::FolderService;
use crate::biz_service::friend_service::FriendService;
use crate::biz_service::purchase_service::PurchaseService;
use crate::biz_service::user_service::UserService;
use crate::biz_service::wishlist_service::WishlistService;
use crate::manager::client_cache::ClientCache;
use common::config::{AppConfig, StoreBackend};
use common::errors::AppResult;
use common::logging::init_logger;
use common::repository::{DocumentStore, MemoryStore, MongoStore};
use common::storage::{MemoryObjectStorage, ObjectStorage};
use std::sync::Arc;

/// 组合根：一份存储、一份缓存，所有服务共享
#[derive(Clone)]
pub struct WishlistApp {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub cache: ClientCache,
    pub users: UserService,
    pub friends: FriendService,
    pub purchases: PurchaseService,
    pub wishlist: WishlistService,
    pub folders: FolderService,
    pub activity: ActivityService,
}

impl WishlistApp {
    pub fn new(store: Arc<dyn DocumentStore>, storage: Arc<dyn ObjectStorage>, config: AppConfig) -> Self {
        let store_cfg = config.get_store();
        let feed_cfg = config.get_feed();
        let cache = ClientCache::from_config(&config.get_cache());

        let users = UserService::new(store.clone(), storage.clone(), cache.clone(), store_cfg.id_batch_size);
        let friends = FriendService::new(store.clone(), users.clone(), cache.clone(), feed_cfg.min_search_len);
        let purchases = PurchaseService::new(store.clone(), cache.clone());
        let wishlist = WishlistService::new(store.clone(), storage.clone(), cache.clone(), store_cfg.id_batch_size);
        let folders = FolderService::new(store.clone(), cache.clone());
        let activity = ActivityService::new(
            store.clone(),
            friends.clone(),
            cache.clone(),
            feed_cfg.page_size,
            store_cfg.feed_batch_size,
            feed_cfg.birthday_window_days,
        );
        Self { config, store, storage, cache, users, friends, purchases, wishlist, folders, activity }
    }

    /// 内存存储 + 内存对象存储
    pub fn in_memory(config: AppConfig) -> Self {
        let store = MemoryStore::default();
        Self::new(Arc::new(store), Arc::new(MemoryObjectStorage::default()), config)
    }

    /// 按配置初始化日志并选择存储后端；对象存储由调用方替换
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        init_logger(&config.get_sys().log_level);
        let store: Arc<dyn DocumentStore> = match config.get_store().backend {
            StoreBackend::Memory => Arc::new(MemoryStore::default()),
            StoreBackend::Mongo => {
                let mongo = MongoStore::connect(&config.get_database(), config.get_store().id_batch_size).await?;
                Arc::new(mongo)
            }
        };
        let app = Self::new(store, Arc::new(MemoryObjectStorage::default()), config);
        app.ensure_indexes().await?;
        Ok(app)
    }

    pub async fn ensure_indexes(&self) -> AppResult<()> {
        self.users.dao.ensure_indexes().await?;
        self.friends.request_dao.ensure_indexes().await?;
        self.friends.friendship_dao.ensure_indexes().await?;
        self.purchases.dao.ensure_indexes().await?;
        self.wishlist.dao.ensure_indexes().await?;
        self.folders.dao.ensure_indexes().await?;
        self.activity.dao.ensure_indexes().await?;
        Ok(())
    }
}
