pub mod activity;
pub mod folder;
pub mod friend_request;
pub mod friendship;
pub mod purchase;
pub mod user_entity;
pub mod wishlist_item;

use serde::{Deserialize, Deserializer};

/// 旧文档里数组字段可能是 null 或缺失，统一读成默认值
pub fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

/// 空白字符串视为未填写
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
