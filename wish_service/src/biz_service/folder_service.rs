use crate::entitys::folder::Folder;
use crate::entitys::wishlist_item::WishlistItem;
use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::manager::live_view::LiveView;
use crate::session::Session;
use common::errors::{AppError, AppResult};
use common::logging::short_id;
use common::repository::{BaseRepository, DocumentStore, OrderType, Patch, QueryBuilder};
use common::util::common_utils::dedup_ids;
use common::util::date_util::now;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate, Default)]
pub struct NewFolder {
    #[validate(length(min = 1, max = 50))]
    pub name: String,
}

fn owner_folders(owner_id: &str) -> QueryBuilder {
    QueryBuilder::new("folders").eq("ownerId", owner_id).order_by("createdAt", OrderType::Desc)
}

fn member_items(owner_id: &str, folder_id: &str) -> QueryBuilder {
    QueryBuilder::new("wishlistItems")
        .eq("ownerId", owner_id)
        .array_contains("folderIds", folder_id)
        .order_by("priority", OrderType::Asc)
}

/// 按文件夹的手动顺序排列；不在 itemOrder 里的排在最后，保持原有的 priority 顺序
pub fn sort_by_item_order(items: &mut [WishlistItem], item_order: &[String]) {
    let positions: HashMap<&str, usize> = item_order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
    items.sort_by_key(|item| positions.get(item.id.as_str()).copied().unwrap_or(usize::MAX));
}

#[derive(Clone)]
pub struct FolderService {
    pub dao: BaseRepository<Folder>,
    item_dao: BaseRepository<WishlistItem>,
    cache: ClientCache,
}

impl FolderService {
    pub fn new(store: Arc<dyn DocumentStore>, cache: ClientCache) -> Self {
        Self { dao: BaseRepository::new(store.clone()), item_dao: BaseRepository::new(store), cache }
    }

    async fn owned_folder(&self, session: &Session, folder_id: &str) -> AppResult<Folder> {
        let folder = self
            .dao
            .find_by_id(folder_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("folder {}", folder_id)))?;
        session.ensure_owner(&folder.owner_id, "this folder")?;
        Ok(folder)
    }

    fn touch(&self, folder: &Folder) {
        self.cache.invalidate(&CacheKey::Folders(folder.owner_id.clone()));
        self.cache.invalidate(&CacheKey::FolderDetail(folder.id.clone()));
    }

    pub async fn create_folder(&self, session: &Session, new_folder: NewFolder) -> AppResult<Folder> {
        let new_folder = NewFolder { name: new_folder.name.trim().to_string() };
        new_folder.validate()?;
        let ts = now();
        let mut folder = Folder {
            id: String::new(),
            owner_id: session.uid().to_string(),
            name: new_folder.name,
            item_order: Vec::new(),
            created_at: ts,
            updated_at: ts,
        };
        folder.id = self.dao.insert(&folder).await?;
        self.touch(&folder);
        info!("folder {} created by {}", short_id(&folder.id), short_id(session.uid()));
        Ok(folder)
    }

    pub async fn rename_folder(&self, session: &Session, folder_id: &str, name: &str) -> AppResult<Folder> {
        let renamed = NewFolder { name: name.trim().to_string() };
        renamed.validate()?;
        let mut folder = self.owned_folder(session, folder_id).await?;
        folder.name = renamed.name;
        folder.updated_at = now();
        let patch = Patch::new().set("name", folder.name.clone()).set("updatedAt", folder.updated_at);
        self.dao.update(folder_id, &patch).await?;
        self.touch(&folder);
        Ok(folder)
    }

    /// 新建的在前
    pub async fn list_folders(&self, owner_id: &str) -> AppResult<Vec<Folder>> {
        let folders = self.dao.query(owner_folders(owner_id)).await?;
        self.cache.put(&CacheKey::Folders(owner_id.to_string()), folders.clone());
        Ok(folders)
    }

    pub async fn watch_folders(&self, owner_id: &str) -> AppResult<LiveView<Folder>> {
        LiveView::open(&self.dao, owner_folders(owner_id), CacheKey::Folders(owner_id.to_string()), self.cache.clone())
            .await
    }

    /// 读库并刷新缓存，别的设备改过的顺序立即可见
    pub async fn get_folder(&self, folder_id: &str) -> AppResult<Option<Folder>> {
        let key = CacheKey::FolderDetail(folder_id.to_string());
        let folder = self.dao.find_by_id(folder_id).await?;
        if let Some(folder) = &folder {
            self.cache.put(&key, folder.clone());
        }
        Ok(folder)
    }

    /// 改写文件夹内的手动顺序
    pub async fn reorder_folder(&self, session: &Session, folder_id: &str, ordered_ids: Vec<String>) -> AppResult<()> {
        let folder = self.owned_folder(session, folder_id).await?;
        let ordered_ids = dedup_ids(ordered_ids);
        let patch = Patch::new().set("itemOrder", json!(ordered_ids)).set("updatedAt", now());
        self.dao.update(folder_id, &patch).await?;
        self.touch(&folder);
        Ok(())
    }

    /// 文件夹成员，按 itemOrder 排序
    pub async fn folder_items(&self, folder_id: &str) -> AppResult<Vec<WishlistItem>> {
        let Some(folder) = self.get_folder(folder_id).await? else {
            return Err(AppError::NotFound(format!("folder {}", folder_id)));
        };
        let mut items = self.item_dao.query(member_items(&folder.owner_id, folder_id)).await?;
        sort_by_item_order(&mut items, &folder.item_order);
        Ok(items)
    }

    /// 没有级联删除：先把文件夹 id 从每个成员条目上拉掉，全部成功后才删文件夹本身
    pub async fn delete_folder(&self, session: &Session, folder_id: &str) -> AppResult<()> {
        let Some(folder) = self.dao.find_by_id(folder_id).await? else {
            return Ok(());
        };
        session.ensure_owner(&folder.owner_id, "this folder")?;

        let members = self.item_dao.query(member_items(&folder.owner_id, folder_id)).await?;
        let pull = Patch::new().array_remove("folderIds", vec![Value::String(folder_id.to_string())]);
        let mut failed = 0;
        for item in &members {
            match self.item_dao.update(&item.id, &pull).await {
                Ok(()) | Err(AppError::NotFound(_)) => {
                    self.cache.invalidate(&CacheKey::WishlistItem(item.id.clone()));
                }
                Err(e) => {
                    warn!("could not pull folder {} from item {}: {}", short_id(folder_id), short_id(&item.id), e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(AppError::Store(format!("{} items still reference folder {}", failed, folder_id)));
        }

        self.dao.delete(folder_id).await?;
        self.touch(&folder);
        self.cache.invalidate(&CacheKey::Wishlist(folder.owner_id.clone()));
        info!("folder {} deleted, {} items released", short_id(folder_id), members.len());
        Ok(())
    }
}
