use crate::entitys::deserialize_null_default;
use crate::entitys::wishlist_item::{Currency, WishlistItem};
use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityType {
    #[default]
    ItemAdded,
}

/// 动态：新增条目时的快照，编辑时尽力同步
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: ActivityType,
    pub wishlist_item_id: String,
    pub item_name: String,
    #[serde(default)]
    pub item_description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub item_images: Vec<String>,
    #[serde(default)]
    pub item_price: Option<f64>,
    #[serde(default)]
    pub item_currency: Option<Currency>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub item_links: Vec<String>,
    /// 旧版本单链接
    #[serde(default, skip_serializing)]
    pub item_link: Option<String>,
    pub created_at: i64,
}

impl ActivityItem {
    pub fn snapshot_of(item: &WishlistItem, created_at: i64) -> Self {
        Self {
            id: String::new(),
            user_id: item.owner_id.clone(),
            kind: ActivityType::ItemAdded,
            wishlist_item_id: item.id.clone(),
            item_name: item.name.clone(),
            item_description: item.description.clone(),
            item_images: item.images.clone(),
            item_price: item.price,
            item_currency: item.currency,
            item_links: item.links.clone(),
            item_link: None,
            created_at,
        }
    }
}

impl Entity for ActivityItem {
    const COLLECTION: &'static str = "activity";

    fn id(&self) -> &str {
        &self.id
    }

    fn normalize(mut self) -> Self {
        if let Some(link) = self.item_link.take().filter(|l| !l.trim().is_empty()) {
            if !self.item_links.contains(&link) {
                self.item_links.insert(0, link);
            }
        }
        self
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::asc(&["userId", "createdAt"]), IndexSpec::asc(&["wishlistItemId"])]
    }
}
