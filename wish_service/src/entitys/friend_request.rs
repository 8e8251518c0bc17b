use common::repository::{Entity, IndexSpec};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FriendRequestStatus {
    #[default]
    Pending, // 待处理
    Accepted, // 已接受（终态）
    Rejected, // 已拒绝（终态，保留记录）
}

/// 好友申请，单向
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub status: FriendRequestStatus,
    pub created_at: i64,
    /// 好友关系写入成功的时间；accepted 但为空说明接受只完成了一半
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl FriendRequest {
    pub fn is_pending(&self) -> bool {
        self.status == FriendRequestStatus::Pending
    }

    /// 接受流程已经走完，不能再用来建立好友关系
    pub fn is_completed(&self) -> bool {
        self.status == FriendRequestStatus::Accepted && self.completed_at.is_some()
    }

    /// 是否在 a、b 两人之间（任一方向）
    pub fn between(&self, a: &str, b: &str) -> bool {
        (self.from_user_id == a && self.to_user_id == b) || (self.from_user_id == b && self.to_user_id == a)
    }
}

impl Entity for FriendRequest {
    const COLLECTION: &'static str = "friendRequests";

    fn id(&self) -> &str {
        &self.id
    }

    fn indexes() -> Vec<IndexSpec> {
        vec![
            IndexSpec::asc(&["fromUserId", "toUserId", "status"]),
            IndexSpec::asc(&["toUserId", "status"]),
        ]
    }
}
