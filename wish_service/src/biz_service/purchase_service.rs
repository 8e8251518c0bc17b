use crate::entitys::friendship::{Friendship, friendship_id};
use crate::entitys::purchase::Purchase;
use crate::entitys::wishlist_item::WishlistItem;
use crate::manager::cache_key::CacheKey;
use crate::manager::client_cache::ClientCache;
use crate::manager::live_view::LiveView;
use crate::session::Session;
use common::errors::{AppError, AppResult};
use common::logging::short_id;
use common::repository::{BaseRepository, DocumentStore, GuardedInsert, QueryBuilder, TypedSubscription};
use common::util::date_util::now;
use log::info;
use std::collections::HashMap;
use std::sync::Arc;

/// 某个条目对当前查看者呈现的购买状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseStatus {
    /// 条目主人：什么都不显示
    None,
    Claimable,
    YouBought { purchase_id: String },
    BoughtBy { buyer_name: String },
}

/// 查看者与清单主人的关系决定购买板能看到什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardAccess {
    Owner,
    Friend,
    /// 好友关系已解除，之前拿到的数据全部作废
    Revoked,
}

/// 购买状态的唯一读取入口。主人视角是空板，既没有买家也没有“已购买”这件事
#[derive(Debug, Clone)]
pub struct PurchaseBoard {
    viewer: String,
    access: BoardAccess,
    claims: HashMap<String, Purchase>,
}

impl PurchaseBoard {
    pub fn owner_blind(viewer: &str) -> Self {
        Self { viewer: viewer.to_string(), access: BoardAccess::Owner, claims: HashMap::new() }
    }

    pub fn revoked(viewer: &str) -> Self {
        Self { viewer: viewer.to_string(), access: BoardAccess::Revoked, claims: HashMap::new() }
    }

    /// 同一条目有多条认领时，最早的 createdAt 胜出，再比 id
    pub fn for_viewer(viewer: &str, purchases: impl IntoIterator<Item = Purchase>) -> Self {
        let mut claims: HashMap<String, Purchase> = HashMap::new();
        for purchase in purchases {
            let earlier = match claims.get(&purchase.item_id) {
                Some(current) => (purchase.created_at, &purchase.id) < (current.created_at, &current.id),
                None => true,
            };
            if earlier {
                claims.insert(purchase.item_id.clone(), purchase);
            }
        }
        Self { viewer: viewer.to_string(), access: BoardAccess::Friend, claims }
    }

    pub fn access(&self) -> BoardAccess {
        self.access
    }

    pub fn is_owner_blind(&self) -> bool {
        self.access == BoardAccess::Owner
    }

    pub fn is_revoked(&self) -> bool {
        self.access == BoardAccess::Revoked
    }

    pub fn status(&self, item_id: &str) -> PurchaseStatus {
        if self.access != BoardAccess::Friend {
            return PurchaseStatus::None;
        }
        match self.claims.get(item_id) {
            None => PurchaseStatus::Claimable,
            Some(p) if p.buyer_id == self.viewer => PurchaseStatus::YouBought { purchase_id: p.id.clone() },
            Some(p) => PurchaseStatus::BoughtBy { buyer_name: p.buyer_name.clone() },
        }
    }

    /// 只有好友视角可能为 true
    pub fn is_purchased(&self, item_id: &str) -> bool {
        self.access == BoardAccess::Friend && self.claims.contains_key(item_id)
    }
}

enum BoardPush {
    Friendship(Vec<Friendship>),
    Purchases(Vec<Purchase>),
}

/// 实时购买板。主人视角不开订阅；好友视角同时盯着好友关系，解除后立即封板
pub struct BoardView {
    viewer: String,
    owner_id: String,
    cache: ClientCache,
    live: Option<LiveView<Purchase>>,
    friendship: Option<TypedSubscription<Friendship>>,
    board: PurchaseBoard,
}

impl BoardView {
    pub fn board(&self) -> &PurchaseBoard {
        &self.board
    }

    pub fn is_subscribed(&self) -> bool {
        self.live.is_some()
    }

    /// 等待下一次推送；没有订阅时立即返回 false
    pub async fn next(&mut self) -> bool {
        let (Some(live), Some(friendship)) = (self.live.as_mut(), self.friendship.as_mut()) else {
            return false;
        };
        let pushed = tokio::select! {
            Some(s) = friendship.next() => BoardPush::Friendship(s),
            Some(items) = live.next() => BoardPush::Purchases(items.to_vec()),
            else => return false,
        };
        match pushed {
            BoardPush::Friendship(s) if s.is_empty() => self.revoke(),
            BoardPush::Friendship(_) => {}
            BoardPush::Purchases(items) => self.board = PurchaseBoard::for_viewer(&self.viewer, items),
        }
        true
    }

    /// 先看好友关系，再吸收积压的购买推送
    pub fn poll(&mut self) -> bool {
        if let Some(snapshot) = self.friendship.as_mut().and_then(|f| f.latest()) {
            if snapshot.is_empty() {
                self.revoke();
                return true;
            }
        }
        let Some(live) = self.live.as_mut() else {
            return false;
        };
        if !live.poll() {
            return false;
        }
        self.board = PurchaseBoard::for_viewer(&self.viewer, live.items().to_vec());
        true
    }

    fn revoke(&mut self) {
        self.live = None;
        self.friendship = None;
        self.cache.invalidate(&CacheKey::PurchasesByOwner(self.owner_id.clone()));
        self.board = PurchaseBoard::revoked(&self.viewer);
        info!("purchase board of {} revoked for {}", short_id(&self.owner_id), short_id(&self.viewer));
    }
}

#[derive(Clone)]
pub struct PurchaseService {
    pub dao: BaseRepository<Purchase>,
    item_dao: BaseRepository<WishlistItem>,
    friendship_dao: BaseRepository<Friendship>,
    cache: ClientCache,
}

fn owner_query(owner_id: &str) -> QueryBuilder {
    QueryBuilder::new("purchases").eq("itemOwnerId", owner_id)
}

impl PurchaseService {
    pub fn new(store: Arc<dyn DocumentStore>, cache: ClientCache) -> Self {
        Self {
            dao: BaseRepository::new(store.clone()),
            item_dao: BaseRepository::new(store.clone()),
            friendship_dao: BaseRepository::new(store),
            cache,
        }
    }

    /// 认领条目。事务内检查该条目是否已有认领，先到先得
    pub async fn create_purchase(&self, session: &Session, item_id: &str, item_owner_id: &str) -> AppResult<Purchase> {
        if session.is(item_owner_id) {
            return Err(AppError::Forbidden("you cannot purchase your own item".to_string()));
        }
        let item = self
            .item_dao
            .find_by_id(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("wishlist item {}", item_id)))?;
        if item.owner_id != item_owner_id {
            return Err(AppError::Validation("item owner does not match".to_string()));
        }
        self.ensure_friend(session, item_owner_id, "only friends can purchase this item").await?;

        let mut purchase = Purchase {
            id: String::new(),
            item_id: item_id.to_string(),
            item_owner_id: item_owner_id.to_string(),
            buyer_id: session.uid().to_string(),
            buyer_name: session.display_name(),
            created_at: now(),
        };
        let guards = [QueryBuilder::new("purchases").eq("itemId", item_id).build()];
        match self.dao.insert_unless_exists(&guards, &purchase).await? {
            GuardedInsert::Inserted(id) => {
                purchase.id = id;
                self.cache.invalidate(&CacheKey::PurchasesByOwner(item_owner_id.to_string()));
                info!("item {} purchased by {}", short_id(item_id), short_id(session.uid()));
                Ok(purchase)
            }
            GuardedInsert::Blocked(_) => Err(AppError::Conflict("item has already been purchased".to_string())),
        }
    }

    /// 撤销认领，只有买家本人可以；记录已不存在时视为成功
    pub async fn delete_purchase(&self, session: &Session, purchase_id: &str, item_owner_id: &str) -> AppResult<()> {
        let Some(purchase) = self.dao.find_by_id(purchase_id).await? else {
            return Ok(());
        };
        if purchase.buyer_id != session.uid() {
            return Err(AppError::Forbidden("only the buyer can cancel a purchase".to_string()));
        }
        if purchase.item_owner_id != item_owner_id {
            return Err(AppError::Validation("item owner does not match".to_string()));
        }
        self.dao.delete(purchase_id).await?;
        self.cache.invalidate(&CacheKey::PurchasesByOwner(purchase.item_owner_id.clone()));
        info!("purchase {} cancelled", short_id(purchase_id));
        Ok(())
    }

    async fn ensure_friend(&self, session: &Session, owner_id: &str, message: &str) -> AppResult<()> {
        match self.friendship_dao.find_by_id(&friendship_id(session.uid(), owner_id)).await? {
            Some(_) => Ok(()),
            None => Err(AppError::Forbidden(message.to_string())),
        }
    }

    /// 查看者是主人时不发起任何查询；非好友拿不到任何购买数据
    pub async fn for_viewer(&self, session: &Session, owner_id: &str) -> AppResult<PurchaseBoard> {
        if session.is(owner_id) {
            return Ok(PurchaseBoard::owner_blind(session.uid()));
        }
        self.ensure_friend(session, owner_id, "only friends can see purchases").await?;
        let purchases = self.dao.query(owner_query(owner_id)).await?;
        self.cache.put(&CacheKey::PurchasesByOwner(owner_id.to_string()), purchases.clone());
        Ok(PurchaseBoard::for_viewer(session.uid(), purchases))
    }

    pub async fn watch_board(&self, session: &Session, owner_id: &str) -> AppResult<BoardView> {
        let mut view = BoardView {
            viewer: session.uid().to_string(),
            owner_id: owner_id.to_string(),
            cache: self.cache.clone(),
            live: None,
            friendship: None,
            board: PurchaseBoard::owner_blind(session.uid()),
        };
        if session.is(owner_id) {
            return Ok(view);
        }
        self.ensure_friend(session, owner_id, "only friends can see purchases").await?;
        let fid = friendship_id(session.uid(), owner_id);
        view.friendship = Some(self.friendship_dao.subscribe(QueryBuilder::new("friendships").id_in(vec![fid])).await?);
        let live = LiveView::open(
            &self.dao,
            owner_query(owner_id),
            CacheKey::PurchasesByOwner(owner_id.to_string()),
            self.cache.clone(),
        )
        .await?;
        view.board = PurchaseBoard::for_viewer(session.uid(), live.items().to_vec());
        view.live = Some(live);
        Ok(view)
    }
}
