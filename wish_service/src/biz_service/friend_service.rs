use crate::biz_service::user_service::UserService;
use crate::entitys::friend_request::{FriendRequest, FriendRequestStatus};
use crate::entitys::friendship::{Friendship, friendship_id};
use crate::entitys::user_entity::UserInfo;
use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::manager::friend_views::{FriendsView, RequestsView, StatusView};
use crate::session::Session;
use common::errors::{AppError, AppResult};
use common::logging::short_id;
use common::repository::repository_util::encode;
use common::repository::{BaseRepository, DocumentStore, GuardedInsert, OrderType, Patch, QueryBuilder, WriteOp};
use common::util::date_util::now;
use futures::future::try_join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{AsRefStr, Display};

/// 派生的好友状态，不落库
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FriendshipStatus {
    #[default]
    None,
    Friends,
    PendingSent,
    PendingReceived,
}

/// 状态 + 相关的待处理申请 id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FriendshipState {
    pub status: FriendshipStatus,
    pub request_id: Option<String>,
}

impl FriendshipState {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn friends() -> Self {
        Self { status: FriendshipStatus::Friends, request_id: None }
    }

    pub fn pending_sent(request_id: impl Into<String>) -> Self {
        Self { status: FriendshipStatus::PendingSent, request_id: Some(request_id.into()) }
    }

    pub fn pending_received(request_id: impl Into<String>) -> Self {
        Self { status: FriendshipStatus::PendingReceived, request_id: Some(request_id.into()) }
    }
}

/// 一对用户之间与状态相关的全部文档，与观察方向无关，可以双方共用一份缓存
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairState {
    pub friendship: Option<Friendship>,
    pub requests: Vec<FriendRequest>,
}

/// 依次判断：好友 -> 我发出的待处理申请 -> 对方发来的待处理申请 -> 无。
/// 只有 pending 的申请参与判断，已接受/已拒绝的视为过期
pub fn derive_status(viewer: &str, target: &str, pair: &PairState) -> FriendshipState {
    if viewer == target {
        return FriendshipState::none();
    }
    if pair.friendship.as_ref().is_some_and(|f| f.involves(viewer) && f.involves(target)) {
        return FriendshipState::friends();
    }
    let pending = || pair.requests.iter().filter(|r| r.is_pending());
    if let Some(sent) = pending().find(|r| r.from_user_id == viewer && r.to_user_id == target) {
        return FriendshipState::pending_sent(sent.id.clone());
    }
    if let Some(received) = pending().find(|r| r.from_user_id == target && r.to_user_id == viewer) {
        return FriendshipState::pending_received(received.id.clone());
    }
    FriendshipState::none()
}

/// 带申请人资料的收到的申请
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub request: FriendRequest,
    pub from_user: UserInfo,
}

/// 用户 + 相对当前用户的好友状态
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user: UserInfo,
    pub state: FriendshipState,
}

pub(crate) fn pending_query(from: &str, to: &str) -> QueryBuilder {
    QueryBuilder::new("friendRequests")
        .eq("fromUserId", from)
        .eq("toUserId", to)
        .eq("status", FriendRequestStatus::Pending.to_string())
        .order_by("createdAt", OrderType::Asc)
}

fn completed(ts: i64) -> Patch {
    Patch::new().set("status", FriendRequestStatus::Accepted.to_string()).set("completedAt", ts)
}

#[derive(Clone)]
pub struct FriendService {
    pub request_dao: BaseRepository<FriendRequest>,
    pub friendship_dao: BaseRepository<Friendship>,
    users: UserService,
    cache: ClientCache,
    min_search_len: usize,
}

impl FriendService {
    pub fn new(store: Arc<dyn DocumentStore>, users: UserService, cache: ClientCache, min_search_len: usize) -> Self {
        Self {
            request_dao: BaseRepository::new(store.clone()),
            friendship_dao: BaseRepository::new(store),
            users,
            cache,
            min_search_len,
        }
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }

    /// 现读三类文档，组装一对用户的状态
    pub async fn pair_state(&self, a: &str, b: &str) -> AppResult<PairState> {
        let friendship = self.friendship_dao.find_by_id(&friendship_id(a, b)).await?;
        let mut requests = self.request_dao.query(pending_query(a, b)).await?;
        requests.extend(self.request_dao.query(pending_query(b, a)).await?);
        let pair = PairState { friendship, requests };
        self.cache.put(&CacheKey::friendship_status(a, b), pair.clone());
        Ok(pair)
    }

    pub async fn friendship_status(&self, viewer: &str, target: &str) -> AppResult<FriendshipState> {
        if viewer == target {
            return Ok(FriendshipState::none());
        }
        let pair = self.pair_state(viewer, target).await?;
        Ok(derive_status(viewer, target, &pair))
    }

    /// 按确定性 id 直接查，不需要查询
    pub async fn is_friend(&self, a: &str, b: &str) -> AppResult<bool> {
        if a == b {
            return Ok(false);
        }
        Ok(self.friendship_dao.find_by_id(&friendship_id(a, b)).await?.is_some())
    }

    /// 发送申请。好友关系或任一方向的待处理申请存在时，事务内检查直接拒绝
    pub async fn send_request(&self, session: &Session, to_user_id: &str) -> AppResult<String> {
        let from = session.uid();
        if from == to_user_id {
            return Err(AppError::Validation("cannot send a friend request to yourself".to_string()));
        }
        if self.users.get_user(to_user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("user {}", to_user_id)));
        }
        let fid = friendship_id(from, to_user_id);
        let guards = [
            QueryBuilder::new("friendships").id_in(vec![fid.clone()]).build(),
            pending_query(from, to_user_id).build(),
            pending_query(to_user_id, from).build(),
        ];
        let request = FriendRequest {
            id: String::new(),
            from_user_id: from.to_string(),
            to_user_id: to_user_id.to_string(),
            status: FriendRequestStatus::Pending,
            created_at: now(),
            completed_at: None,
        };
        self.cache.invalidate(&CacheKey::friendship_status(from, to_user_id));
        match self.request_dao.insert_unless_exists(&guards, &request).await? {
            GuardedInsert::Inserted(id) => {
                info!("friend request {} sent {} -> {}", short_id(&id), short_id(from), short_id(to_user_id));
                Ok(id)
            }
            GuardedInsert::Blocked(existing) if existing.id == fid => {
                Err(AppError::Conflict("you are already friends".to_string()))
            }
            GuardedInsert::Blocked(_) => Err(AppError::Conflict("a friend request is already pending".to_string())),
        }
    }

    async fn load_request(&self, request_id: &str) -> AppResult<FriendRequest> {
        self.request_dao
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("friend request {}", request_id)))
    }

    /// 接受申请：先把申请标记为 accepted，再在一个批次里写确定性 id 的好友关系并给申请打上 completedAt。
    /// 第二步失败时申请停在 accepted 且没有 completedAt，重试只补做第二步；
    /// 已完成的申请不能再次接受，解除好友后旧申请也就无法把关系复活
    pub async fn accept_request(&self, session: &Session, request_id: &str, from_user_id: &str) -> AppResult<Friendship> {
        let request = self.load_request(request_id).await?;
        if request.to_user_id != session.uid() {
            return Err(AppError::Forbidden("only the recipient can accept a request".to_string()));
        }
        if request.from_user_id != from_user_id {
            return Err(AppError::Validation("request sender does not match".to_string()));
        }
        match request.status {
            FriendRequestStatus::Pending => {
                self.request_dao
                    .update(request_id, &Patch::new().set("status", FriendRequestStatus::Accepted.to_string()))
                    .await?;
            }
            FriendRequestStatus::Accepted if request.is_completed() => {
                return Err(AppError::Conflict("request was already accepted".to_string()));
            }
            FriendRequestStatus::Accepted => {
                info!("request {} already accepted, completing friendship", short_id(request_id));
            }
            FriendRequestStatus::Rejected => {
                return Err(AppError::Conflict("request was already rejected".to_string()));
            }
        }

        let ts = now();
        let friendship = Friendship::new(session.uid(), from_user_id, ts);
        let ops = vec![
            WriteOp::Set { collection: "friendships".to_string(), id: friendship.id.clone(), data: encode(&friendship)? },
            WriteOp::Update { collection: "friendRequests".to_string(), id: request_id.to_string(), patch: completed(ts) },
        ];
        self.friendship_dao.store().batch_write(ops).await?;
        self.cache.invalidate(&CacheKey::friendship_status(session.uid(), from_user_id));
        info!("friendship {} created", friendship.id);

        // 双方互发过申请时，反方向那条一并收掉
        match self.request_dao.query(pending_query(session.uid(), from_user_id)).await {
            Ok(crossing) => {
                for other in crossing {
                    if let Err(e) = self.request_dao.update(&other.id, &completed(ts)).await {
                        warn!("could not retire crossing request {}: {}", short_id(&other.id), e);
                    }
                }
            }
            Err(e) => warn!("could not look up crossing requests: {}", e),
        }
        Ok(friendship)
    }

    /// 拒绝：保留记录，状态改为 rejected
    pub async fn reject_request(&self, session: &Session, request_id: &str) -> AppResult<()> {
        let request = self.load_request(request_id).await?;
        if request.to_user_id != session.uid() {
            return Err(AppError::Forbidden("only the recipient can reject a request".to_string()));
        }
        if !request.is_pending() {
            return Err(AppError::Conflict(format!("request is already {}", request.status)));
        }
        self.request_dao
            .update(request_id, &Patch::new().set("status", FriendRequestStatus::Rejected.to_string()))
            .await?;
        self.cache.invalidate(&CacheKey::friendship_status(&request.from_user_id, &request.to_user_id));
        info!("friend request {} rejected", short_id(request_id));
        Ok(())
    }

    /// 撤回：直接删除；已经不存在时视为成功
    pub async fn cancel_request(&self, session: &Session, request_id: &str) -> AppResult<()> {
        let Some(request) = self.request_dao.find_by_id(request_id).await? else {
            return Ok(());
        };
        if request.from_user_id != session.uid() {
            return Err(AppError::Forbidden("only the sender can cancel a request".to_string()));
        }
        if !request.is_pending() {
            return Err(AppError::Conflict(format!("request is already {}", request.status)));
        }
        self.request_dao.delete(request_id).await?;
        self.cache.invalidate(&CacheKey::friendship_status(&request.from_user_id, &request.to_user_id));
        info!("friend request {} cancelled", short_id(request_id));
        Ok(())
    }

    /// 任一方都可以单方面解除；重复调用无副作用
    pub async fn remove_friend(&self, session: &Session, friend_id: &str) -> AppResult<()> {
        let fid = friendship_id(session.uid(), friend_id);
        self.friendship_dao.delete(&fid).await?;
        self.cache.invalidate(&CacheKey::friendship_status(session.uid(), friend_id));
        info!("friendship {} removed by {}", fid, short_id(session.uid()));
        Ok(())
    }

    pub async fn friend_ids(&self, uid: &str) -> AppResult<Vec<String>> {
        let friendships = self.friendship_dao.query(QueryBuilder::new("friendships").array_contains("users", uid)).await?;
        Ok(friendships.iter().filter_map(|f| f.other(uid)).map(String::from).collect())
    }

    pub async fn list_friends(&self, uid: &str) -> AppResult<Vec<UserInfo>> {
        let ids = self.friend_ids(uid).await?;
        let friends = self.users.fetch_users(&ids).await?;
        self.cache.put(&CacheKey::Friends(uid.to_string()), friends.clone());
        Ok(friends)
    }

    /// 收到的待处理申请，申请人已不存在的丢弃
    pub async fn incoming_requests(&self, uid: &str) -> AppResult<Vec<IncomingRequest>> {
        let requests = self
            .request_dao
            .query(
                QueryBuilder::new("friendRequests")
                    .eq("toUserId", uid)
                    .eq("status", FriendRequestStatus::Pending.to_string())
                    .order_by("createdAt", OrderType::Desc),
            )
            .await?;
        self.enrich_requests(requests).await
    }

    pub(crate) async fn enrich_requests(&self, requests: Vec<FriendRequest>) -> AppResult<Vec<IncomingRequest>> {
        let sender_ids: Vec<String> = requests.iter().map(|r| r.from_user_id.clone()).collect();
        let senders = self.users.fetch_users(&sender_ids).await?;
        Ok(requests
            .into_iter()
            .filter_map(|request| {
                let from_user = senders.iter().find(|u| u.id == request.from_user_id)?.clone();
                Some(IncomingRequest { request, from_user })
            })
            .collect())
    }

    pub async fn user_profile(&self, session: &Session, user_id: &str) -> AppResult<Option<UserProfile>> {
        let Some(user) = self.users.get_user(user_id).await? else {
            return Ok(None);
        };
        let state = self.friendship_status(session.uid(), user_id).await?;
        Ok(Some(UserProfile { user, state }))
    }

    /// 搜索用户并逐个补上好友状态；搜索词过短时不查询
    pub async fn search_users(&self, session: &Session, term: &str) -> AppResult<Vec<UserProfile>> {
        if term.trim().chars().count() < self.min_search_len {
            return Ok(Vec::new());
        }
        let matches = self.users.search(term, session.uid()).await?;
        let states = try_join_all(matches.iter().map(|u| self.friendship_status(session.uid(), &u.id))).await?;
        Ok(matches.into_iter().zip(states).map(|(user, state)| UserProfile { user, state }).collect())
    }

    pub async fn watch_friends(&self, uid: &str) -> AppResult<FriendsView> {
        FriendsView::open(self, uid, self.cache.clone()).await
    }

    pub async fn watch_requests(&self, uid: &str) -> AppResult<RequestsView> {
        RequestsView::open(self, uid, self.cache.clone()).await
    }

    pub async fn watch_status(&self, session: &Session, target: &str) -> AppResult<StatusView> {
        StatusView::open(self, session.uid(), target, self.cache.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, from: &str, to: &str, status: FriendRequestStatus) -> FriendRequest {
        FriendRequest {
            id: id.into(),
            from_user_id: from.into(),
            to_user_id: to.into(),
            status,
            created_at: 0,
            completed_at: None,
        }
    }

    #[test]
    fn derivation_order() {
        let mut pair = PairState::default();
        assert_eq!(derive_status("a", "b", &pair), FriendshipState::none());

        pair.requests.push(request("r1", "a", "b", FriendRequestStatus::Pending));
        assert_eq!(derive_status("a", "b", &pair), FriendshipState::pending_sent("r1"));
        assert_eq!(derive_status("b", "a", &pair), FriendshipState::pending_received("r1"));

        pair.friendship = Some(Friendship::new("a", "b", 0));
        assert_eq!(derive_status("a", "b", &pair).status, FriendshipStatus::Friends);
        assert_eq!(derive_status("b", "a", &pair).status, FriendshipStatus::Friends);
    }

    #[test]
    fn resolved_requests_are_ignored() {
        let pair = PairState {
            friendship: None,
            requests: vec![
                request("r1", "a", "b", FriendRequestStatus::Accepted),
                request("r2", "b", "a", FriendRequestStatus::Rejected),
            ],
        };
        assert_eq!(derive_status("a", "b", &pair), FriendshipState::none());
        assert_eq!(derive_status("a", "a", &pair), FriendshipState::none());
    }

    #[test]
    fn status_names() {
        assert_eq!(FriendshipStatus::PendingSent.to_string(), "pending_sent");
        assert_eq!(serde_json::to_value(FriendshipStatus::PendingReceived).unwrap(), "pending_received");
    }
}
