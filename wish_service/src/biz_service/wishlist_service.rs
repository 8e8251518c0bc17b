use crate::entitys::activity::ActivityItem;
use crate::entitys::folder::Folder;
use crate::entitys::non_blank;
use crate::entitys::purchase::Purchase;
use crate::entitys::wishlist_item::{Currency, WishlistItem};
use crate::manager::batch_loader::load_by_ids;
use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::manager::live_view::LiveView;
use crate::session::Session;
use bytes::Bytes;
use common::errors::{AppError, AppResult};
use common::logging::short_id;
use common::repository::{BaseRepository, DocumentStore, OrderType, Patch, QueryBuilder, WriteOp};
use common::storage::ObjectStorage;
use common::util::common_utils::dedup_ids;
use common::util::date_util::now;
use common::util::validate::{validate_links, validate_non_negative};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use validator::Validate;

/// 新建条目参数
#[derive(Debug, Clone, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 5))]
    #[serde(default)]
    pub images: Vec<String>,
    #[validate(custom(function = "validate_non_negative"))]
    pub price: Option<f64>,
    pub currency: Option<Currency>,
    pub description: Option<String>,
    #[validate(custom(function = "validate_links"))]
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub folder_ids: Vec<String>,
}

impl From<&WishlistItem> for NewItem {
    fn from(item: &WishlistItem) -> Self {
        Self {
            name: item.name.clone(),
            images: item.images.clone(),
            price: item.price,
            currency: item.currency,
            description: item.description.clone(),
            links: item.links.clone(),
            folder_ids: item.folder_ids.clone(),
        }
    }
}

/// 条目修改：None 不动；内层 None 清空
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub images: Option<Vec<String>>,
    pub price: Option<Option<f64>>,
    pub currency: Option<Option<Currency>>,
    pub description: Option<Option<String>>,
    pub links: Option<Vec<String>>,
}

impl ItemUpdate {
    fn apply_to(self, item: &mut WishlistItem) {
        if let Some(name) = self.name {
            item.name = name.trim().to_string();
        }
        if let Some(images) = self.images {
            item.images = images;
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(currency) = self.currency {
            item.currency = currency;
        }
        if let Some(description) = self.description {
            item.description = non_blank(description);
        }
        if let Some(links) = self.links {
            item.links = clean_links(links);
        }
    }
}

/// 删除条目后的清理结果；购买记录的清理不对主人透出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub activities_removed: usize,
    pub images_removed: usize,
    pub folders_updated: usize,
    pub failures: usize,
}

static LAST_PRIORITY: AtomicI64 = AtomicI64::new(0);

/// 以创建时间戳作为初始排序键；同一毫秒内连续创建时依次加一
fn next_priority(ts: i64) -> i64 {
    let previous = LAST_PRIORITY
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(ts.max(last + 1)))
        .unwrap_or(ts);
    ts.max(previous + 1)
}

fn clean_links(links: Vec<String>) -> Vec<String> {
    links.into_iter().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect()
}

fn owner_items(owner_id: &str) -> QueryBuilder {
    QueryBuilder::new("wishlistItems").eq("ownerId", owner_id).order_by("priority", OrderType::Asc)
}

#[derive(Clone)]
pub struct WishlistService {
    pub dao: BaseRepository<WishlistItem>,
    activity_dao: BaseRepository<ActivityItem>,
    purchase_dao: BaseRepository<Purchase>,
    folder_dao: BaseRepository<Folder>,
    storage: Arc<dyn ObjectStorage>,
    cache: ClientCache,
    id_batch_size: usize,
}

impl WishlistService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        cache: ClientCache,
        id_batch_size: usize,
    ) -> Self {
        Self {
            dao: BaseRepository::new(store.clone()),
            activity_dao: BaseRepository::new(store.clone()),
            purchase_dao: BaseRepository::new(store.clone()),
            folder_dao: BaseRepository::new(store),
            storage,
            cache,
            id_batch_size,
        }
    }

    /// 加载并校验一组文件夹都属于当前用户
    async fn owned_folders(&self, session: &Session, folder_ids: &[String]) -> AppResult<Vec<Folder>> {
        let folders = load_by_ids(&self.folder_dao, folder_ids, self.id_batch_size).await?;
        if let Some(missing) = folder_ids.iter().find(|id| !folders.iter().any(|f| &f.id == *id)) {
            return Err(AppError::NotFound(format!("folder {}", missing)));
        }
        for folder in &folders {
            session.ensure_owner(&folder.owner_id, "folder")?;
        }
        Ok(folders)
    }

    async fn owned_item(&self, session: &Session, item_id: &str) -> AppResult<WishlistItem> {
        let item = self
            .dao
            .find_by_id(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wishlist item {}", item_id)))?;
        session.ensure_owner(&item.owner_id, "this item")?;
        Ok(item)
    }

    fn touch(&self, item: &WishlistItem) {
        self.cache.invalidate(&CacheKey::Wishlist(item.owner_id.clone()));
        self.cache.invalidate(&CacheKey::WishlistItem(item.id.clone()));
    }

    /// 新条目排在最后（priority 取当前时间戳），同时写一条动态快照
    pub async fn create_item(&self, session: &Session, new_item: NewItem) -> AppResult<WishlistItem> {
        let new_item = NewItem {
            name: new_item.name.trim().to_string(),
            description: non_blank(new_item.description),
            links: clean_links(new_item.links),
            ..new_item
        };
        new_item.validate()?;
        let folder_ids = dedup_ids(new_item.folder_ids.clone());
        self.owned_folders(session, &folder_ids).await?;

        let ts = now();
        let mut item = WishlistItem {
            id: String::new(),
            owner_id: session.uid().to_string(),
            name: new_item.name,
            images: new_item.images,
            price: new_item.price,
            currency: new_item.currency,
            description: new_item.description,
            links: new_item.links,
            link: None,
            priority: next_priority(ts) as f64,
            folder_ids,
            created_at: ts,
            updated_at: ts,
        };
        item.id = self.dao.insert(&item).await?;
        self.touch(&item);
        info!("item {} created by {}", short_id(&item.id), short_id(session.uid()));

        if let Err(e) = self.activity_dao.insert(&ActivityItem::snapshot_of(&item, ts)).await {
            warn!("could not record activity for item {}: {}", short_id(&item.id), e);
        }
        Ok(item)
    }

    /// 总是读库；缓存里的副本只用于视图首屏
    pub async fn get_item(&self, item_id: &str) -> AppResult<Option<WishlistItem>> {
        let item = self.dao.find_by_id(item_id).await?;
        if let Some(item) = &item {
            self.cache.put(&CacheKey::WishlistItem(item_id.to_string()), item.clone());
        }
        Ok(item)
    }

    /// 按 priority 升序
    pub async fn list_items(&self, owner_id: &str) -> AppResult<Vec<WishlistItem>> {
        let items = self.dao.query(owner_items(owner_id)).await?;
        self.cache.put(&CacheKey::Wishlist(owner_id.to_string()), items.clone());
        Ok(items)
    }

    pub async fn watch_items(&self, owner_id: &str) -> AppResult<LiveView<WishlistItem>> {
        LiveView::open(&self.dao, owner_items(owner_id), CacheKey::Wishlist(owner_id.to_string()), self.cache.clone())
            .await
    }

    pub async fn update_item(&self, session: &Session, item_id: &str, update: ItemUpdate) -> AppResult<WishlistItem> {
        let mut item = self.owned_item(session, item_id).await?;
        update.apply_to(&mut item);
        NewItem::from(&item).validate()?;
        item.updated_at = now();

        let patch = Patch::new()
            .set("name", item.name.clone())
            .set("images", json!(item.images))
            .set_opt("price", item.price)
            .set_opt("currency", item.currency.map(|c| c.to_string()))
            .set_opt("description", item.description.clone())
            .set("links", json!(item.links))
            .unset("link")
            .set("updatedAt", item.updated_at);
        self.dao.update(item_id, &patch).await?;
        self.touch(&item);
        info!("item {} updated", short_id(item_id));

        self.sync_activity(&item).await;
        Ok(item)
    }

    /// 动态里的冗余字段尽力跟随条目，失败只记日志
    async fn sync_activity(&self, item: &WishlistItem) {
        let query = QueryBuilder::new("activity").eq("userId", item.owner_id.clone()).eq("wishlistItemId", item.id.clone());
        let activities = match self.activity_dao.query(query).await {
            Ok(activities) => activities,
            Err(e) => {
                warn!("could not look up activity for item {}: {}", short_id(&item.id), e);
                return;
            }
        };
        let patch = Patch::new()
            .set("itemName", item.name.clone())
            .set_opt("itemDescription", item.description.clone())
            .set("itemImages", json!(item.images))
            .set_opt("itemPrice", item.price)
            .set_opt("itemCurrency", item.currency.map(|c| c.to_string()))
            .set("itemLinks", json!(item.links));
        for activity in activities {
            if let Err(e) = self.activity_dao.update(&activity.id, &patch).await {
                warn!("could not sync activity {}: {}", short_id(&activity.id), e);
            }
        }
    }

    /// 先校验所有权，再删条目本身；动态、购买记录、图片、文件夹顺序的清理各自独立，失败只记日志
    pub async fn delete_item(&self, session: &Session, item_id: &str) -> AppResult<CascadeReport> {
        let Some(item) = self.dao.find_by_id(item_id).await? else {
            return Ok(CascadeReport::default());
        };
        session.ensure_owner(&item.owner_id, "this item")?;
        self.dao.delete(item_id).await?;
        self.touch(&item);
        info!("item {} deleted", short_id(item_id));

        let mut report = CascadeReport::default();

        let activity_query =
            QueryBuilder::new("activity").eq("userId", item.owner_id.clone()).eq("wishlistItemId", item_id);
        match self.activity_dao.query(activity_query).await {
            Ok(activities) => {
                for activity in activities {
                    match self.activity_dao.delete(&activity.id).await {
                        Ok(()) => report.activities_removed += 1,
                        Err(e) => {
                            warn!("could not delete activity {}: {}", short_id(&activity.id), e);
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("could not look up activity for item {}: {}", short_id(item_id), e);
                report.failures += 1;
            }
        }

        match self.purchase_dao.query(QueryBuilder::new("purchases").eq("itemId", item_id)).await {
            Ok(purchases) => {
                for purchase in purchases {
                    if let Err(e) = self.purchase_dao.delete(&purchase.id).await {
                        warn!("could not delete purchase {}: {}", short_id(&purchase.id), e);
                        report.failures += 1;
                    }
                }
                self.cache.invalidate(&CacheKey::PurchasesByOwner(item.owner_id.clone()));
            }
            Err(e) => {
                warn!("could not look up purchases for item {}: {}", short_id(item_id), e);
                report.failures += 1;
            }
        }

        for url in &item.images {
            match self.storage.delete(url).await {
                Ok(()) => report.images_removed += 1,
                Err(e) => {
                    warn!("could not delete image {}: {}", url, e);
                    report.failures += 1;
                }
            }
        }

        let pull = Patch::new().array_remove("itemOrder", vec![Value::String(item_id.to_string())]);
        for folder_id in &item.folder_ids {
            match self.folder_dao.update(folder_id, &pull).await {
                Ok(()) => {
                    self.cache.invalidate(&CacheKey::FolderDetail(folder_id.clone()));
                    report.folders_updated += 1;
                }
                Err(AppError::NotFound(_)) => debug!("folder {} already gone", short_id(folder_id)),
                Err(e) => {
                    warn!("could not pull item from folder {}: {}", short_id(folder_id), e);
                    report.failures += 1;
                }
            }
        }
        Ok(report)
    }

    /// 按给定顺序把 priority 改写为 0..n-1，一次原子批量写
    pub async fn reorder(&self, session: &Session, ordered_ids: &[String]) -> AppResult<()> {
        let unique: HashSet<&String> = ordered_ids.iter().collect();
        if unique.len() != ordered_ids.len() {
            return Err(AppError::Validation("reorder list contains duplicates".to_string()));
        }
        let items = load_by_ids(&self.dao, ordered_ids, self.id_batch_size).await?;
        if items.len() != ordered_ids.len() {
            return Err(AppError::NotFound("some items no longer exist".to_string()));
        }
        for item in &items {
            session.ensure_owner(&item.owner_id, "this item")?;
        }
        let ops = ordered_ids
            .iter()
            .enumerate()
            .map(|(index, id)| WriteOp::Update {
                collection: "wishlistItems".to_string(),
                id: id.clone(),
                patch: Patch::new().set("priority", index as f64),
            })
            .collect();
        self.dao.store().batch_write(ops).await?;
        self.cache.invalidate(&CacheKey::Wishlist(session.uid().to_string()));
        debug!("reordered {} items for {}", ordered_ids.len(), short_id(session.uid()));
        Ok(())
    }

    /// 整体替换条目所在文件夹
    pub async fn set_item_folders(&self, session: &Session, item_id: &str, folder_ids: Vec<String>) -> AppResult<()> {
        let item = self.owned_item(session, item_id).await?;
        let folder_ids = dedup_ids(folder_ids);
        self.owned_folders(session, &folder_ids).await?;
        let patch = Patch::new().set("folderIds", json!(folder_ids)).set("updatedAt", now());
        self.dao.update(item_id, &patch).await?;
        self.touch(&item);
        Ok(())
    }

    pub async fn add_item_to_folder(&self, session: &Session, item_id: &str, folder_id: &str) -> AppResult<()> {
        let item = self.owned_item(session, item_id).await?;
        self.owned_folders(session, &[folder_id.to_string()]).await?;
        let patch =
            Patch::new().array_union("folderIds", vec![Value::String(folder_id.to_string())]).set("updatedAt", now());
        self.dao.update(item_id, &patch).await?;
        self.touch(&item);
        Ok(())
    }

    /// 同时从文件夹的手动顺序里移除
    pub async fn remove_item_from_folder(&self, session: &Session, item_id: &str, folder_id: &str) -> AppResult<()> {
        let item = self.owned_item(session, item_id).await?;
        self.owned_folders(session, &[folder_id.to_string()]).await?;
        let patch =
            Patch::new().array_remove("folderIds", vec![Value::String(folder_id.to_string())]).set("updatedAt", now());
        self.dao.update(item_id, &patch).await?;
        self.touch(&item);
        let pull = Patch::new().array_remove("itemOrder", vec![Value::String(item_id.to_string())]);
        match self.folder_dao.update(folder_id, &pull).await {
            Ok(()) => self.cache.invalidate(&CacheKey::FolderDetail(folder_id.to_string())),
            Err(e) => warn!("could not pull item {} from folder order: {}", short_id(item_id), e),
        }
        Ok(())
    }

    /// 上传条目图片，返回可访问的 URL
    pub async fn upload_item_image(&self, session: &Session, image: Bytes) -> AppResult<String> {
        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
        let key = format!("users/{}/wishlist/{}_{}.webp", session.uid(), now(), suffix);
        self.storage.put(&key, image, "image/webp").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_validation() {
        let ok = NewItem { name: "Kindle".into(), price: Some(120.0), links: vec!["https://a.example".into()], ..Default::default() };
        assert!(ok.validate().is_ok());

        let empty = NewItem { name: String::new(), ..Default::default() };
        assert!(empty.validate().is_err());
        let negative = NewItem { price: Some(-1.0), ..ok.clone() };
        assert!(negative.validate().is_err());
        let bad_link = NewItem { links: vec!["ftp://a.example".into()], ..ok.clone() };
        assert!(bad_link.validate().is_err());
        let too_many = NewItem { images: vec!["x".into(); 6], ..ok };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn update_clears_and_trims() {
        let mut item = WishlistItem {
            name: "Old".into(),
            price: Some(10.0),
            description: Some("desc".into()),
            ..Default::default()
        };
        ItemUpdate {
            name: Some("  New  ".into()),
            price: Some(None),
            description: Some(Some("   ".into())),
            links: Some(vec![" https://b.example ".into(), "".into()]),
            ..Default::default()
        }
        .apply_to(&mut item);
        assert_eq!(item.name, "New");
        assert!(item.price.is_none());
        assert!(item.description.is_none());
        assert_eq!(item.links, vec!["https://b.example".to_string()]);
    }
}
