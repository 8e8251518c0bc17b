use crate::entitys::deserialize_null_default;
use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Currency {
    Ars,
    #[default]
    Usd,
}

/// 心愿单条目
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub images: Vec<String>, // 最多 5 张
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub links: Vec<String>,
    /// 旧版本的单链接字段，读取时并入 links
    #[serde(default, skip_serializing)]
    pub link: Option<String>,
    /// 手动排序键，新建为创建时间戳，重排后为 0..n-1
    pub priority: f64,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub folder_ids: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity for WishlistItem {
    const COLLECTION: &'static str = "wishlistItems";

    fn id(&self) -> &str {
        &self.id
    }

    fn normalize(mut self) -> Self {
        if let Some(link) = self.link.take().filter(|l| !l.trim().is_empty()) {
            if !self.links.contains(&link) {
                self.links.insert(0, link);
            }
        }
        self
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::asc(&["ownerId", "priority"]), IndexSpec::asc(&["ownerId", "folderIds"])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::repository::{Record, repository_util::decode};
    use serde_json::json;

    #[test]
    fn legacy_link_is_migrated_on_read() {
        let record = Record::new(
            "i1",
            json!({
                "ownerId": "u1",
                "name": "Kindle",
                "images": null,
                "link": "https://shop.example.com/kindle",
                "priority": 1700000000000_i64,
                "createdAt": 1,
                "updatedAt": 1
            })
            .as_object()
            .unwrap()
            .clone(),
        );
        let item: WishlistItem = decode(record).unwrap();
        assert_eq!(item.id, "i1");
        assert_eq!(item.links, vec!["https://shop.example.com/kindle".to_string()]);
        assert!(item.link.is_none());
        assert!(item.images.is_empty());
        assert!(item.folder_ids.is_empty());
    }

    #[test]
    fn currency_codes() {
        assert_eq!(Currency::Ars.to_string(), "ARS");
        assert_eq!(serde_json::to_value(Currency::Usd).unwrap(), json!("USD"));
        assert_eq!("ARS".parse::<Currency>().unwrap(), Currency::Ars);
    }
}
