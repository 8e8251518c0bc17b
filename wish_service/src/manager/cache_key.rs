use crate::entitys::friendship::sorted_pair;
use std::fmt;

/// 客户端缓存的组合键：集合 + 作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    User(String),
    Friends(String),
    Friendships(String),
    FriendRequests(String),
    /// 两个 id 已排序，双方共用一份
    FriendshipStatus(String, String),
    Wishlist(String),
    WishlistItem(String),
    Folders(String),
    FolderDetail(String),
    ActivityFeed(String),
    PurchasesByOwner(String),
}

impl CacheKey {
    pub fn friendship_status(a: &str, b: &str) -> Self {
        let [first, second] = sorted_pair(a, b);
        CacheKey::FriendshipStatus(first, second)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::User(id) => write!(f, "users:{}", id),
            CacheKey::Friends(uid) => write!(f, "friends:{}", uid),
            CacheKey::Friendships(uid) => write!(f, "friendships:{}", uid),
            CacheKey::FriendRequests(uid) => write!(f, "friendRequests:{}", uid),
            CacheKey::FriendshipStatus(a, b) => write!(f, "friendshipStatus:{}:{}", a, b),
            CacheKey::Wishlist(uid) => write!(f, "wishlist:{}", uid),
            CacheKey::WishlistItem(id) => write!(f, "wishlist:item:{}", id),
            CacheKey::Folders(uid) => write!(f, "folders:{}", uid),
            CacheKey::FolderDetail(id) => write!(f, "folders:detail:{}", id),
            CacheKey::ActivityFeed(uid) => write!(f, "activity:feed:{}", uid),
            CacheKey::PurchasesByOwner(uid) => write!(f, "purchases:byOwner:{}", uid),
        }
    }
}
