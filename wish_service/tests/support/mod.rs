#![allow(dead_code)]

use common::config::AppConfig;
use common::repository::MemoryStore;
use common::storage::MemoryObjectStorage;
use std::sync::Arc;
use wish_service::WishlistApp;
use wish_service::biz_service::user_service::NewUser;
use wish_service::session::Session;

pub struct World {
    pub app: WishlistApp,
    pub store: MemoryStore,
    pub storage: MemoryObjectStorage,
}

pub fn world() -> World {
    let store = MemoryStore::default();
    let storage = MemoryObjectStorage::default();
    let app = WishlistApp::new(Arc::new(store.clone()), Arc::new(storage.clone()), AppConfig::default());
    World { app, store, storage }
}

impl World {
    pub async fn user(&self, uid: &str, username: &str, first_name: Option<&str>) -> Session {
        let new_user = NewUser {
            email: format!("{}@example.com", username),
            username: username.to_string(),
            first_name: first_name.map(String::from),
            ..Default::default()
        };
        self.app.users.register(uid, new_user).await.expect("register");
        self.app.users.open_session(uid).await.expect("session")
    }

    /// 同一份存储上的另一台设备，缓存各自独立
    pub fn another_device(&self) -> WishlistApp {
        WishlistApp::new(Arc::new(self.store.clone()), Arc::new(self.storage.clone()), AppConfig::default())
    }

    pub async fn befriend(&self, a: &Session, b: &Session) {
        let request_id = self.app.friends.send_request(a, b.uid()).await.expect("send");
        self.app.friends.accept_request(b, &request_id, a.uid()).await.expect("accept");
    }
}
