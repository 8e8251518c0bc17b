use crate::biz_service::friend_service::{
    FriendService, FriendshipState, IncomingRequest, PairState, derive_status, pending_query,
};
use crate::entitys::friend_request::{FriendRequest, FriendRequestStatus};
use crate::entitys::friendship::{Friendship, friendship_id};
use crate::entitys::user_entity::UserInfo;
use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::manager::live_view::LiveView;
use crate::manager::optimistic::{OverlayCell, OverlayMap};
use common::errors::AppResult;
use common::repository::{OrderType, QueryBuilder, TypedSubscription};
use log::debug;

/// 好友列表：订阅好友关系，每次推送后批量解析出用户资料
pub struct FriendsView {
    uid: String,
    service: FriendService,
    cache: ClientCache,
    friendships: LiveView<Friendship>,
    friends: Vec<UserInfo>,
}

impl FriendsView {
    pub(crate) async fn open(service: &FriendService, uid: &str, cache: ClientCache) -> AppResult<Self> {
        let friendships = LiveView::open(
            &service.friendship_dao,
            QueryBuilder::new("friendships").array_contains("users", uid),
            CacheKey::Friendships(uid.to_string()),
            cache.clone(),
        )
        .await?;
        let friends = cache.get::<Vec<UserInfo>>(&CacheKey::Friends(uid.to_string())).unwrap_or_default();
        Ok(Self { uid: uid.to_string(), service: service.clone(), cache, friendships, friends })
    }

    pub fn is_loading(&self) -> bool {
        self.friendships.is_loading()
    }

    pub fn friends(&self) -> &[UserInfo] {
        &self.friends
    }

    /// 排除本地正在解除的好友
    pub fn visible(&self) -> Vec<UserInfo> {
        let hidden = self.friendships.hidden();
        self.friends.iter().filter(|f| !hidden.contains(&friendship_id(&self.uid, &f.id))).cloned().collect()
    }

    /// 按好友关系 id 隐藏
    pub fn hidden(&self) -> &OverlayMap<String, ()> {
        self.friendships.hidden()
    }

    /// 等待下一次推送；订阅结束返回 false
    pub async fn next(&mut self) -> AppResult<bool> {
        if self.friendships.next().await.is_none() {
            return Ok(false);
        }
        self.resolve().await?;
        Ok(true)
    }

    pub async fn poll(&mut self) -> AppResult<bool> {
        if !self.friendships.poll() {
            return Ok(false);
        }
        self.resolve().await?;
        Ok(true)
    }

    async fn resolve(&mut self) -> AppResult<()> {
        let ids: Vec<String> =
            self.friendships.items().iter().filter_map(|f| f.other(&self.uid)).map(String::from).collect();
        self.friends = self.service.users().fetch_users(&ids).await?;
        self.cache.put(&CacheKey::Friends(self.uid.clone()), self.friends.clone());
        Ok(())
    }
}

/// 收到的好友申请；已处理的申请 id 作为可撤销覆盖暂时隐藏
pub struct RequestsView {
    service: FriendService,
    cache: ClientCache,
    requests: LiveView<FriendRequest>,
    entries: Vec<IncomingRequest>,
}

impl RequestsView {
    pub(crate) async fn open(service: &FriendService, uid: &str, cache: ClientCache) -> AppResult<Self> {
        let requests = LiveView::open(
            &service.request_dao,
            QueryBuilder::new("friendRequests")
                .eq("toUserId", uid)
                .eq("status", FriendRequestStatus::Pending.to_string())
                .order_by("createdAt", OrderType::Desc),
            CacheKey::FriendRequests(uid.to_string()),
            cache.clone(),
        )
        .await?;
        // 首屏只用缓存里已有的申请人资料
        let entries = requests
            .items()
            .iter()
            .filter_map(|request| {
                let from_user = cache.get_user(&request.from_user_id)?;
                Some(IncomingRequest { request: request.clone(), from_user })
            })
            .collect();
        Ok(Self { service: service.clone(), cache, requests, entries })
    }

    pub fn is_loading(&self) -> bool {
        self.requests.is_loading()
    }

    pub fn entries(&self) -> &[IncomingRequest] {
        &self.entries
    }

    pub fn visible(&self) -> Vec<IncomingRequest> {
        let hidden = self.requests.hidden();
        self.entries.iter().filter(|e| !hidden.contains(&e.request.id)).cloned().collect()
    }

    /// 按申请 id 隐藏
    pub fn hidden(&self) -> &OverlayMap<String, ()> {
        self.requests.hidden()
    }

    pub async fn next(&mut self) -> AppResult<bool> {
        if self.requests.next().await.is_none() {
            return Ok(false);
        }
        self.resolve().await?;
        Ok(true)
    }

    pub async fn poll(&mut self) -> AppResult<bool> {
        if !self.requests.poll() {
            return Ok(false);
        }
        self.resolve().await?;
        Ok(true)
    }

    async fn resolve(&mut self) -> AppResult<()> {
        self.entries = self.service.enrich_requests(self.requests.items().to_vec()).await?;
        debug!("requests view {} has {} entries", self.requests.key(), self.entries.len());
        Ok(())
    }
}

/// 一对用户的实时状态：好友关系和两个方向的申请任一变化都会重新推导
pub struct StatusView {
    viewer: String,
    target: String,
    cache: ClientCache,
    friendship_sub: TypedSubscription<Friendship>,
    sent_sub: TypedSubscription<FriendRequest>,
    received_sub: TypedSubscription<FriendRequest>,
    friendship: Option<Friendship>,
    sent: Vec<FriendRequest>,
    received: Vec<FriendRequest>,
    loaded: [bool; 3],
    overlay: OverlayCell<FriendshipState>,
}

enum Pushed {
    Friendship(Vec<Friendship>),
    Sent(Vec<FriendRequest>),
    Received(Vec<FriendRequest>),
}

impl StatusView {
    pub(crate) async fn open(service: &FriendService, viewer: &str, target: &str, cache: ClientCache) -> AppResult<Self> {
        let friendship_sub = service
            .friendship_dao
            .subscribe(QueryBuilder::new("friendships").id_in(vec![friendship_id(viewer, target)]))
            .await?;
        let sent_sub = service.request_dao.subscribe(pending_query(viewer, target)).await?;
        let received_sub = service.request_dao.subscribe(pending_query(target, viewer)).await?;

        let seeded = cache.get::<PairState>(&CacheKey::friendship_status(viewer, target));
        let loaded = [seeded.is_some(); 3];
        let pair = seeded.unwrap_or_default();
        let (sent, received): (Vec<_>, Vec<_>) = pair.requests.into_iter().partition(|r| r.from_user_id == viewer);
        Ok(Self {
            viewer: viewer.to_string(),
            target: target.to_string(),
            cache,
            friendship_sub,
            sent_sub,
            received_sub,
            friendship: pair.friendship,
            sent,
            received,
            loaded,
            overlay: OverlayCell::new(),
        })
    }

    pub fn is_loading(&self) -> bool {
        !self.loaded.iter().all(|l| *l)
    }

    pub fn pair(&self) -> PairState {
        let mut requests = self.sent.clone();
        requests.extend(self.received.iter().cloned());
        PairState { friendship: self.friendship.clone(), requests }
    }

    /// 服务端推导出的状态
    pub fn server_state(&self) -> FriendshipState {
        derive_status(&self.viewer, &self.target, &self.pair())
    }

    /// 叠加乐观覆盖后的状态
    pub fn current(&self) -> FriendshipState {
        self.overlay.resolve(self.server_state())
    }

    pub fn overlay(&self) -> &OverlayCell<FriendshipState> {
        &self.overlay
    }

    /// 等待三路订阅中任一路推送
    pub async fn next(&mut self) -> bool {
        let pushed = tokio::select! {
            Some(s) = self.friendship_sub.next() => Pushed::Friendship(s),
            Some(s) = self.sent_sub.next() => Pushed::Sent(s),
            Some(s) = self.received_sub.next() => Pushed::Received(s),
            else => return false,
        };
        match pushed {
            Pushed::Friendship(s) => {
                self.friendship = s.into_iter().next();
                self.loaded[0] = true;
            }
            Pushed::Sent(s) => {
                self.sent = s;
                self.loaded[1] = true;
            }
            Pushed::Received(s) => {
                self.received = s;
                self.loaded[2] = true;
            }
        }
        self.settle();
        true
    }

    /// 吸收所有积压推送
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        if let Some(s) = self.friendship_sub.latest() {
            self.friendship = s.into_iter().next();
            self.loaded[0] = true;
            changed = true;
        }
        if let Some(s) = self.sent_sub.latest() {
            self.sent = s;
            self.loaded[1] = true;
            changed = true;
        }
        if let Some(s) = self.received_sub.latest() {
            self.received = s;
            self.loaded[2] = true;
            changed = true;
        }
        if changed {
            self.settle();
        }
        changed
    }

    fn settle(&mut self) {
        self.cache.put(&CacheKey::friendship_status(&self.viewer, &self.target), self.pair());
        self.overlay.reconcile();
    }
}
