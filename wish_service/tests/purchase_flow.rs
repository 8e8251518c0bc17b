mod support;

use common::errors::AppError;
use support::{World, world};
use wish_service::biz_service::purchase_service::PurchaseStatus;
use wish_service::biz_service::wishlist_service::NewItem;
use wish_service::entitys::purchase::Purchase;
use wish_service::manager::cache_key::CacheKey;
use wish_service::entitys::wishlist_item::WishlistItem;
use wish_service::session::Session;

struct Party {
    w: World,
    owner: Session,
    friend: Session,
    other: Session,
    item: WishlistItem,
}

async fn party() -> Party {
    let w = world();
    let owner = w.user("owner", "olga", Some("Olga")).await;
    let friend = w.user("friend", "fede", Some("Fede")).await;
    let other = w.user("other", "gabi", None).await;
    w.befriend(&owner, &friend).await;
    w.befriend(&other, &owner).await;
    let item = w
        .app
        .wishlist
        .create_item(&owner, NewItem { name: "Record player".into(), price: Some(250.0), ..Default::default() })
        .await
        .unwrap();
    Party { w, owner, friend, other, item }
}

#[tokio::test]
async fn purchase_then_cancel_never_reaches_the_owner() {
    let p = party().await;
    let purchases = &p.w.app.purchases;

    let purchase = purchases.create_purchase(&p.friend, &p.item.id, p.owner.uid()).await.unwrap();
    assert_eq!(purchase.buyer_name, "Fede");

    let friend_board = purchases.for_viewer(&p.friend, p.owner.uid()).await.unwrap();
    assert!(friend_board.is_purchased(&p.item.id));
    assert_eq!(friend_board.status(&p.item.id), PurchaseStatus::YouBought { purchase_id: purchase.id.clone() });
    let other_board = purchases.for_viewer(&p.other, p.owner.uid()).await.unwrap();
    assert_eq!(other_board.status(&p.item.id), PurchaseStatus::BoughtBy { buyer_name: "Fede".into() });

    // 主人视角不发查询，也看不到任何购买痕迹
    let reads = p.w.store.read_count();
    let owner_board = purchases.for_viewer(&p.owner, p.owner.uid()).await.unwrap();
    assert_eq!(p.w.store.read_count(), reads);
    assert!(owner_board.is_owner_blind());
    assert!(!owner_board.is_purchased(&p.item.id));
    assert_eq!(owner_board.status(&p.item.id), PurchaseStatus::None);

    let err = purchases.delete_purchase(&p.other, &purchase.id, p.owner.uid()).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    purchases.delete_purchase(&p.friend, &purchase.id, p.owner.uid()).await.unwrap();
    purchases.delete_purchase(&p.friend, &purchase.id, p.owner.uid()).await.unwrap();

    let friend_board = purchases.for_viewer(&p.friend, p.owner.uid()).await.unwrap();
    assert!(!friend_board.is_purchased(&p.item.id));
    assert_eq!(friend_board.status(&p.item.id), PurchaseStatus::Claimable);
    let owner_board = purchases.for_viewer(&p.owner, p.owner.uid()).await.unwrap();
    assert_eq!(owner_board.status(&p.item.id), PurchaseStatus::None);
}

#[tokio::test]
async fn first_claim_wins() {
    let p = party().await;
    let purchases = &p.w.app.purchases;

    let (a, b) = tokio::join!(
        purchases.create_purchase(&p.friend, &p.item.id, p.owner.uid()),
        purchases.create_purchase(&p.other, &p.item.id, p.owner.uid()),
    );
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    match loser {
        Err(AppError::Conflict(message)) => assert_eq!(message, "item has already been purchased"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(p.w.store.len("purchases"), 1);
}

#[tokio::test]
async fn claim_preconditions() {
    let p = party().await;
    let purchases = &p.w.app.purchases;
    let stranger = p.w.user("stranger", "sam", None).await;

    let own = purchases.create_purchase(&p.owner, &p.item.id, p.owner.uid()).await.unwrap_err();
    assert!(matches!(own, AppError::Forbidden(_)));
    let not_friend = purchases.create_purchase(&stranger, &p.item.id, p.owner.uid()).await.unwrap_err();
    assert!(matches!(not_friend, AppError::Forbidden(_)));
    let wrong_owner = purchases.create_purchase(&p.friend, &p.item.id, p.other.uid()).await.unwrap_err();
    assert!(matches!(wrong_owner, AppError::Validation(_)));
    let missing = purchases.create_purchase(&p.friend, "nope", p.owner.uid()).await.unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));
    assert!(p.w.store.is_empty("purchases"));
}

#[tokio::test]
async fn live_board_follows_claims_and_owner_never_subscribes() {
    let p = party().await;
    let purchases = &p.w.app.purchases;

    let mut owner_view = purchases.watch_board(&p.owner, p.owner.uid()).await.unwrap();
    assert!(!owner_view.is_subscribed());
    let listeners = p.w.store.listener_count();

    let mut other_view = purchases.watch_board(&p.other, p.owner.uid()).await.unwrap();
    assert!(other_view.is_subscribed());
    // 购买记录和好友关系各一路
    assert_eq!(p.w.store.listener_count(), listeners + 2);
    assert!(other_view.poll());
    assert_eq!(other_view.board().status(&p.item.id), PurchaseStatus::Claimable);

    let purchase = purchases.create_purchase(&p.friend, &p.item.id, p.owner.uid()).await.unwrap();
    assert!(other_view.poll());
    assert_eq!(other_view.board().status(&p.item.id), PurchaseStatus::BoughtBy { buyer_name: "Fede".into() });
    assert!(!owner_view.next().await);
    assert_eq!(owner_view.board().status(&p.item.id), PurchaseStatus::None);

    purchases.delete_purchase(&p.friend, &purchase.id, p.owner.uid()).await.unwrap();
    assert!(other_view.poll());
    assert!(!other_view.board().is_purchased(&p.item.id));
}

#[tokio::test]
async fn cancelling_checks_the_stored_owner() {
    let p = party().await;
    let purchases = &p.w.app.purchases;
    let purchase = purchases.create_purchase(&p.friend, &p.item.id, p.owner.uid()).await.unwrap();
    purchases.for_viewer(&p.friend, p.owner.uid()).await.unwrap();
    let key = CacheKey::PurchasesByOwner(p.owner.uid().to_string());
    assert!(p.w.app.cache.get::<Vec<Purchase>>(&key).is_some());

    let err = purchases.delete_purchase(&p.friend, &purchase.id, p.other.uid()).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(p.w.store.len("purchases"), 1);

    purchases.delete_purchase(&p.friend, &purchase.id, p.owner.uid()).await.unwrap();
    assert!(p.w.app.cache.get::<Vec<Purchase>>(&key).is_none());
    assert!(p.w.store.is_empty("purchases"));
}

#[tokio::test]
async fn deleting_the_item_clears_its_claims() {
    let p = party().await;
    p.w.app.purchases.create_purchase(&p.friend, &p.item.id, p.owner.uid()).await.unwrap();
    let report = p.w.app.wishlist.delete_item(&p.owner, &p.item.id).await.unwrap();
    assert_eq!(report.failures, 0);
    assert!(p.w.store.is_empty("purchases"));
}
