use chrono::NaiveDate;
use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};

/// 用户资料
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// 认证方给出的用户 ID
    pub id: String,
    pub email: String,
    /// 全局唯一，小写存储
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    pub created_at: i64, // 注册时间（毫秒）
}

impl UserInfo {
    /// 展示名：姓名 -> 用户名 -> "Someone"
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        if !first.is_empty() || !last.is_empty() {
            return format!("{} {}", first, last).trim().to_string();
        }
        if !self.username.is_empty() {
            return self.username.clone();
        }
        "Someone".to_string()
    }

    /// 搜索词（已小写）是否命中用户名或姓名
    pub fn matches_term(&self, term_lower: &str) -> bool {
        let hit = |v: Option<&str>| v.is_some_and(|s| s.to_lowercase().contains(term_lower));
        hit(Some(&self.username)) || hit(self.first_name.as_deref()) || hit(self.last_name.as_deref())
    }
}

impl Entity for UserInfo {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::asc(&["username"]).unique()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: Option<&str>, last: Option<&str>, username: &str) -> UserInfo {
        UserInfo {
            id: "u1".into(),
            username: username.into(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn display_name_fallback_chain() {
        assert_eq!(user(Some("Ana"), Some("Gómez"), "ana").display_name(), "Ana Gómez");
        assert_eq!(user(None, Some("Gómez"), "ana").display_name(), "Gómez");
        assert_eq!(user(Some("Ana"), None, "ana").display_name(), "Ana");
        assert_eq!(user(None, None, "ana").display_name(), "ana");
        assert_eq!(user(None, None, "").display_name(), "Someone");
    }

    #[test]
    fn search_matches_username_and_names() {
        let u = user(Some("Lucía"), Some("Pérez"), "lucy_p");
        assert!(u.matches_term("lucy"));
        assert!(u.matches_term("pérez"));
        assert!(!u.matches_term("juan"));
    }

    #[test]
    fn reads_camel_case_documents() {
        let u: UserInfo = serde_json::from_value(serde_json::json!({
            "id": "u9",
            "email": "a@b.com",
            "username": "ab_c",
            "photoURL": "https://x/p.webp",
            "birthday": "1995-07-14",
            "createdAt": 1
        }))
        .unwrap();
        assert_eq!(u.photo_url.as_deref(), Some("https://x/p.webp"));
        assert_eq!(u.birthday, NaiveDate::from_ymd_opt(1995, 7, 14));
        assert!(u.first_name.is_none());
    }
}
