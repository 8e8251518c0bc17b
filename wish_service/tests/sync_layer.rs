mod support;

use chrono::{Days, NaiveDate};
use common::config::AppConfig;
use common::errors::AppError;
use std::collections::HashSet;
use std::io::Write;
use support::world;
use wish_service::WishlistApp;
use wish_service::biz_service::friend_service::{FriendshipState, FriendshipStatus};
use wish_service::biz_service::user_service::ProfileUpdate;
use wish_service::biz_service::folder_service::NewFolder;
use wish_service::biz_service::wishlist_service::{ItemUpdate, NewItem};
use wish_service::entitys::friendship::friendship_id;
use wish_service::manager::optimistic::run_optimistic;

#[tokio::test]
async fn friends_view_hides_optimistically_and_restores_on_failure() {
    let w = world();
    let me = w.user("me", "maria", None).await;
    let bruno = w.user("b1", "bruno", None).await;
    let carla = w.user("c1", "carla", None).await;
    w.befriend(&me, &bruno).await;
    w.befriend(&carla, &me).await;

    let mut view = w.app.friends.watch_friends(me.uid()).await.unwrap();
    assert!(view.poll().await.unwrap());
    assert!(!view.is_loading());
    assert_eq!(view.friends().len(), 2);

    let ticket = view.hidden().begin(friendship_id(me.uid(), bruno.uid()), ());
    assert_eq!(view.visible().len(), 1);
    run_optimistic(view.hidden(), ticket, w.app.friends.remove_friend(&me, bruno.uid())).await.unwrap();
    // 已确认的覆盖在权威快照到达前继续生效
    assert_eq!(view.visible().len(), 1);
    assert!(view.poll().await.unwrap());
    assert!(view.hidden().is_empty());
    assert_eq!(view.friends().iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["c1"]);

    w.store.fail_writes("friendships");
    let ticket = view.hidden().begin(friendship_id(me.uid(), carla.uid()), ());
    assert!(view.visible().is_empty());
    let err = run_optimistic(view.hidden(), ticket, w.app.friends.remove_friend(&me, carla.uid())).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(view.visible().len(), 1);
    assert!(view.hidden().is_empty());
}

#[tokio::test]
async fn requests_view_accept_round_trip() {
    let w = world();
    let me = w.user("me", "maria", None).await;
    let a = w.user("a1", "alice", None).await;
    let c = w.user("c1", "carla", None).await;
    let from_alice = w.app.friends.send_request(&a, me.uid()).await.unwrap();

    let mut view = w.app.friends.watch_requests(me.uid()).await.unwrap();
    assert!(view.is_loading());
    assert!(view.poll().await.unwrap());
    assert_eq!(view.entries().len(), 1);
    assert_eq!(view.entries()[0].from_user.username, "alice");

    let ticket = view.hidden().begin(from_alice.clone(), ());
    assert!(view.visible().is_empty());
    run_optimistic(view.hidden(), ticket, w.app.friends.accept_request(&me, &from_alice, a.uid())).await.unwrap();
    assert!(view.poll().await.unwrap());
    assert!(view.entries().is_empty());
    assert!(view.hidden().is_empty());

    // 失败的接受把申请放回列表
    let from_carla = w.app.friends.send_request(&c, me.uid()).await.unwrap();
    assert!(view.poll().await.unwrap());
    w.store.fail_writes("friendRequests");
    let ticket = view.hidden().begin(from_carla.clone(), ());
    assert!(view.visible().is_empty());
    let result = run_optimistic(view.hidden(), ticket, w.app.friends.accept_request(&me, &from_carla, c.uid())).await;
    assert!(matches!(result, Err(AppError::Store(_))));
    assert_eq!(view.visible().len(), 1);
    assert_eq!(view.visible()[0].request.id, from_carla);
}

#[tokio::test]
async fn status_view_follows_both_directions() {
    let w = world();
    let a = w.user("a1", "alice", None).await;
    let b = w.user("b1", "bruno", None).await;

    let mut view = w.app.friends.watch_status(&a, b.uid()).await.unwrap();
    assert!(view.is_loading());
    assert!(view.poll());
    assert!(!view.is_loading());
    assert_eq!(view.current(), FriendshipState::none());

    let ticket = view.overlay().begin(FriendshipState { status: FriendshipStatus::PendingSent, request_id: None });
    assert_eq!(view.current().status, FriendshipStatus::PendingSent);
    assert_eq!(view.server_state(), FriendshipState::none());
    let request_id = run_optimistic(view.overlay(), ticket, w.app.friends.send_request(&a, b.uid())).await.unwrap();
    assert!(!view.overlay().is_settled());

    assert!(view.poll());
    assert!(view.overlay().is_settled());
    assert_eq!(view.current(), FriendshipState::pending_sent(request_id.clone()));

    let mut other_side = w.app.friends.watch_status(&b, a.uid()).await.unwrap();
    // 首屏来自缓存里这一对用户的状态
    assert!(!other_side.is_loading());
    assert_eq!(other_side.current(), FriendshipState::pending_received(request_id.clone()));

    w.app.friends.accept_request(&b, &request_id, a.uid()).await.unwrap();
    assert!(view.poll());
    assert_eq!(view.current(), FriendshipState::friends());
    assert!(other_side.poll());
    assert_eq!(other_side.current(), FriendshipState::friends());
}

#[tokio::test]
async fn failed_send_reverts_the_status_overlay() {
    let w = world();
    let a = w.user("a1", "alice", None).await;
    let b = w.user("b1", "bruno", None).await;
    let mut view = w.app.friends.watch_status(&a, b.uid()).await.unwrap();
    assert!(view.poll());

    w.store.fail_writes("friendRequests");
    let ticket = view.overlay().begin(FriendshipState { status: FriendshipStatus::PendingSent, request_id: None });
    assert!(run_optimistic(view.overlay(), ticket, w.app.friends.send_request(&a, b.uid())).await.is_err());
    assert!(view.overlay().is_settled());
    assert_eq!(view.current(), FriendshipState::none());
}

#[tokio::test]
async fn feed_pages_across_friend_chunks() {
    let w = world();
    let me = w.user("me", "maria", None).await;
    for i in 0..12 {
        let friend = w.user(&format!("f{:02}", i), &format!("friend_{:02}", i), None).await;
        w.befriend(&me, &friend).await;
        w.app
            .wishlist
            .create_item(&friend, NewItem { name: format!("Gift {}", i), ..Default::default() })
            .await
            .unwrap();
    }

    assert!(w.app.activity.cached_first_page(&me).is_none());
    let first = w.app.activity.feed_page(&me, None).await.unwrap();
    assert_eq!(first.entries.len(), 10);
    let cursor = first.next_cursor.clone().expect("full page carries a cursor");
    let times: Vec<i64> = first.entries.iter().map(|e| e.activity.created_at).collect();
    assert!(times.windows(2).all(|pair| pair[0] >= pair[1]));
    assert_eq!(w.app.activity.cached_first_page(&me).map(|entries| entries.len()), Some(10));

    let second = w.app.activity.feed_page(&me, Some(cursor)).await.unwrap();
    assert_eq!(second.entries.len(), 2);
    assert!(second.next_cursor.is_none());

    let authors: HashSet<String> =
        first.entries.iter().chain(second.entries.iter()).map(|e| e.user.id.clone()).collect();
    assert_eq!(authors.len(), 12);
    assert!(!authors.contains(me.uid()));
}

#[tokio::test]
async fn feed_is_empty_without_friends() {
    let w = world();
    let me = w.user("me", "maria", None).await;
    let page = w.app.activity.feed_page(&me, None).await.unwrap();
    assert!(page.entries.is_empty());
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn birthdays_come_from_friends_only() {
    let w = world();
    let me = w.user("me", "maria", None).await;
    let mut friend = w.user("f1", "fede", Some("Fede")).await;
    let mut stranger = w.user("s1", "sam", None).await;
    w.befriend(&me, &friend).await;

    let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
    let birthday = NaiveDate::from_ymd_opt(1990, 3, 15).unwrap();
    for session in [&mut friend, &mut stranger] {
        w.app
            .users
            .update_profile(session, ProfileUpdate { birthday: Some(Some(birthday)), ..Default::default() })
            .await
            .unwrap();
    }

    let upcoming = w.app.activity.upcoming_birthdays(&me, today).await.unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].user.id, "f1");
    assert_eq!(upcoming[0].days_until, 5);
    assert_eq!(upcoming[0].date, today.checked_add_days(Days::new(5)).unwrap());
}

#[tokio::test]
async fn reopened_views_start_from_the_cache() {
    let w = world();
    let me = w.user("me", "maria", None).await;
    for name in ["Lamp", "Kettle"] {
        w.app.wishlist.create_item(&me, NewItem { name: name.into(), ..Default::default() }).await.unwrap();
    }

    let mut first = w.app.wishlist.watch_items(me.uid()).await.unwrap();
    assert!(first.is_loading());
    assert!(first.items().is_empty());
    assert!(first.poll());
    let names: Vec<String> = first.items().iter().map(|i| i.name.clone()).collect();
    assert_eq!(names, vec!["Lamp", "Kettle"]);
    drop(first);

    let second = w.app.wishlist.watch_items(me.uid()).await.unwrap();
    assert!(!second.is_loading());
    assert_eq!(second.items().iter().map(|i| i.name.clone()).collect::<Vec<_>>(), names);
}

#[tokio::test]
async fn fetch_users_splits_large_id_sets() {
    let w = world();
    let mut ids = Vec::new();
    for i in 0..65 {
        let uid = format!("u{:02}", i);
        w.user(&uid, &format!("user_{:02}", i), None).await;
        ids.push(uid);
    }
    w.app.cache.clear();

    let reads = w.store.read_count();
    let users = w.app.users.fetch_users(&ids).await.unwrap();
    assert_eq!(w.store.read_count(), reads + 3);
    assert_eq!(users.len(), 65);
    assert_eq!(users.iter().map(|u| u.id.clone()).collect::<Vec<_>>(), ids);

    // 每次都按批读库，缓存只用于首屏
    w.app.users.fetch_users(&ids).await.unwrap();
    assert_eq!(w.store.read_count(), reads + 6);
}

#[tokio::test]
async fn edits_from_another_device_are_visible() {
    let w = world();
    let me = w.user("me", "maria", Some("Maria")).await;
    let mut friend = w.user("f1", "fede", Some("Fede")).await;
    w.befriend(&me, &friend).await;
    let tablet = w.another_device();
    let tablet_me = tablet.users.open_session(me.uid()).await.unwrap();

    let item = w.app.wishlist.create_item(&me, NewItem { name: "Old".into(), ..Default::default() }).await.unwrap();
    let folder = w.app.folders.create_folder(&me, NewFolder { name: "Gifts".into() }).await.unwrap();
    let mut ids = Vec::new();
    for name in ["A", "B"] {
        let member = NewItem { name: name.into(), folder_ids: vec![folder.id.clone()], ..Default::default() };
        ids.push(w.app.wishlist.create_item(&me, member).await.unwrap().id);
    }
    w.app.folders.reorder_folder(&me, &folder.id, ids.clone()).await.unwrap();

    // 先在本机读一遍，缓存里留下旧副本
    assert_eq!(w.app.wishlist.get_item(&item.id).await.unwrap().unwrap().name, "Old");
    let order = |items: Vec<wish_service::entitys::wishlist_item::WishlistItem>| {
        items.into_iter().map(|i| i.name).collect::<Vec<_>>()
    };
    assert_eq!(order(w.app.folders.folder_items(&folder.id).await.unwrap()), vec!["A", "B"]);
    assert_eq!(w.app.friends.list_friends(me.uid()).await.unwrap()[0].first_name.as_deref(), Some("Fede"));

    let renamed = ItemUpdate { name: Some("New".into()), ..Default::default() };
    tablet.wishlist.update_item(&tablet_me, &item.id, renamed).await.unwrap();
    tablet.folders.reorder_folder(&tablet_me, &folder.id, vec![ids[1].clone(), ids[0].clone()]).await.unwrap();
    let profile = ProfileUpdate { first_name: Some("Federico".into()), ..Default::default() };
    w.another_device().users.update_profile(&mut friend, profile).await.unwrap();

    assert_eq!(w.app.wishlist.get_item(&item.id).await.unwrap().unwrap().name, "New");
    assert_eq!(order(w.app.folders.folder_items(&folder.id).await.unwrap()), vec!["B", "A"]);
    assert_eq!(w.app.friends.list_friends(me.uid()).await.unwrap()[0].first_name.as_deref(), Some("Federico"));
    assert_eq!(w.app.users.get_user(friend.uid()).await.unwrap().unwrap().first_name.as_deref(), Some("Federico"));
}

#[tokio::test]
async fn app_boots_from_a_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[sys]
log_level = "warn"

[store]
backend = "memory"

[feed]
page_size = 3
"#
    )
    .unwrap();
    let config = AppConfig::new(file.path().to_str().unwrap()).unwrap();
    let app = WishlistApp::from_config(config).await.unwrap();
    assert_eq!(app.config.get_feed().page_size, 3);
    assert_eq!(app.config.get_store().feed_batch_size, 10);

    let new_user = wish_service::biz_service::user_service::NewUser {
        email: "ana@example.com".into(),
        username: "ana".into(),
        ..Default::default()
    };
    app.users.register("u1", new_user).await.unwrap();
    let session = app.users.open_session("u1").await.unwrap();
    assert_eq!(session.display_name(), "ana");
}
