use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};

/// 购买认领。条目主人永远读不到
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: String,
    pub item_id: String,
    pub item_owner_id: String,
    pub buyer_id: String,
    pub buyer_name: String, // 冗余的买家展示名
    pub created_at: i64,
}

impl Entity for Purchase {
    const COLLECTION: &'static str = "purchases";

    fn id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::asc(&["itemOwnerId"]), IndexSpec::asc(&["itemId"])]
    }
}
