use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};

/// 好友关系，对称；id 由排序后的两个用户 id 拼接
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: String,
    pub users: Vec<String>, // 升序的两个用户 id
    pub created_at: i64,
}

impl Friendship {
    pub fn new(a: &str, b: &str, created_at: i64) -> Self {
        let users = sorted_pair(a, b);
        Self { id: users.join("_"), users: users.to_vec(), created_at }
    }

    /// 关系中的另一方
    pub fn other(&self, uid: &str) -> Option<&str> {
        if !self.involves(uid) {
            return None;
        }
        self.users.iter().map(String::as_str).find(|u| *u != uid)
    }

    pub fn involves(&self, uid: &str) -> bool {
        self.users.iter().any(|u| u == uid)
    }
}

pub fn sorted_pair(a: &str, b: &str) -> [String; 2] {
    if a <= b { [a.to_string(), b.to_string()] } else { [b.to_string(), a.to_string()] }
}

/// 确定性的好友关系 id：sort(a, b).join("_")
pub fn friendship_id(a: &str, b: &str) -> String {
    sorted_pair(a, b).join("_")
}

impl Entity for Friendship {
    const COLLECTION: &'static str = "friendships";

    fn id(&self) -> &str {
        &self.id
    }

    fn normalize(mut self) -> Self {
        self.users.sort();
        self
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![IndexSpec::asc(&["users"])]
    }
}
