use crate::entitys::deserialize_null_default;
use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};

/// 文件夹；成员关系存在条目的 folderIds 上，这里只保存夹内顺序
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub item_order: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity for Folder {
    const COLLECTION: &'static str = "folders";

    fn id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::asc(&["ownerId", "createdAt"])]
    }
}
