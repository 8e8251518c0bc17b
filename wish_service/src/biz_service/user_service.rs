use crate::entitys::non_blank;
use crate::entitys::user_entity::UserInfo;
use crate::manager::batch_loader::load_by_ids;
use crate::manager::client_cache::ClientCache;
use crate::session::Session;
use bytes::Bytes;
use chrono::NaiveDate;
use common::errors::{AppError, AppResult};
use common::logging::short_id;
use common::repository::{BaseRepository, DocumentStore, GuardedInsert, OrderType, Patch, QueryBuilder};
use common::storage::ObjectStorage;
use common::util::date_util::now;
use common::util::validate::validate_username;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use validator::Validate;

/// 注册参数
#[derive(Debug, Clone, Deserialize, Validate, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[validate(email)]
    pub email: String,
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birthday: Option<NaiveDate>,
}

/// 资料修改：None 表示不动；空字符串清空字段
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Some(None) 清空生日
    pub birthday: Option<Option<NaiveDate>>,
    pub photo_url: Option<String>,
}

#[derive(Clone)]
pub struct UserService {
    pub dao: BaseRepository<UserInfo>,
    cache: ClientCache,
    storage: Arc<dyn ObjectStorage>,
    id_batch_size: usize,
}

impl UserService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        storage: Arc<dyn ObjectStorage>,
        cache: ClientCache,
        id_batch_size: usize,
    ) -> Self {
        Self { dao: BaseRepository::new(store), cache, storage, id_batch_size }
    }

    /// 用户名是否可用（不区分大小写）
    pub async fn check_username_available(&self, username: &str) -> AppResult<bool> {
        let username = username.trim().to_lowercase();
        let taken = self.dao.exists(QueryBuilder::new("users").eq("username", username)).await?;
        Ok(!taken)
    }

    pub async fn register(&self, uid: &str, new_user: NewUser) -> AppResult<UserInfo> {
        new_user.validate()?;
        let user = UserInfo {
            id: uid.to_string(),
            email: new_user.email.trim().to_lowercase(),
            username: new_user.username.trim().to_lowercase(),
            first_name: non_blank(new_user.first_name),
            last_name: non_blank(new_user.last_name),
            photo_url: None,
            birthday: new_user.birthday,
            created_at: now(),
        };
        // 账号和用户名在同一个事务里检查，并发注册同一用户名只有一个成功
        let guards = [
            QueryBuilder::new("users").id_in(vec![uid.to_string()]).build(),
            QueryBuilder::new("users").eq("username", user.username.clone()).build(),
        ];
        match self.dao.set_unless_exists(&guards, &user).await? {
            GuardedInsert::Inserted(_) => {
                self.cache.put_users(std::slice::from_ref(&user));
                info!("user {} registered as {}", short_id(uid), user.username);
                Ok(user)
            }
            GuardedInsert::Blocked(existing) if existing.id == uid => {
                Err(AppError::Conflict("account already registered".to_string()))
            }
            GuardedInsert::Blocked(_) => Err(AppError::Conflict("username is already taken".to_string())),
        }
    }

    pub async fn open_session(&self, uid: &str) -> AppResult<Session> {
        match self.dao.find_by_id(uid).await? {
            Some(user) => {
                self.cache.put_users(std::slice::from_ref(&user));
                Ok(Session::new(user))
            }
            None => Err(AppError::Unauthorized(format!("no profile for {}", uid))),
        }
    }

    pub async fn update_profile(&self, session: &mut Session, update: ProfileUpdate) -> AppResult<UserInfo> {
        let text = |value: Option<String>| -> Value { non_blank(value).map(Value::String).unwrap_or(Value::Null) };
        let mut patch = Patch::new();
        if update.first_name.is_some() {
            patch = patch.set("firstName", text(update.first_name));
        }
        if update.last_name.is_some() {
            patch = patch.set("lastName", text(update.last_name));
        }
        if let Some(birthday) = update.birthday {
            patch = patch.set_opt("birthday", birthday.map(|d| d.format("%Y-%m-%d").to_string()));
        }
        if update.photo_url.is_some() {
            patch = patch.set("photoURL", text(update.photo_url));
        }
        if patch.is_empty() {
            return Ok(session.user().clone());
        }
        self.dao.update(session.uid(), &patch).await?;
        let user = self
            .dao
            .find_by_id(session.uid())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", session.uid())))?;
        self.cache.put_users(std::slice::from_ref(&user));
        session.refresh(user.clone());
        Ok(user)
    }

    /// 上传头像并写入资料
    pub async fn upload_profile_photo(&self, session: &mut Session, image: Bytes) -> AppResult<UserInfo> {
        let key = format!("users/{}/profile.webp", session.uid());
        let url = self.storage.put(&key, image, "image/webp").await?;
        self.update_profile(session, ProfileUpdate { photo_url: Some(url), ..Default::default() }).await
    }

    /// 总是读库并刷新缓存；缓存里的副本只用于视图首屏
    pub async fn get_user(&self, id: &str) -> AppResult<Option<UserInfo>> {
        let user = self.dao.find_by_id(id).await?;
        if let Some(user) = &user {
            self.cache.put_users(std::slice::from_ref(user));
        }
        Ok(user)
    }

    /// 公开主页按用户名查找
    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<UserInfo>> {
        let username = username.trim().to_lowercase();
        self.dao.find_one(QueryBuilder::new("users").eq("username", username)).await
    }

    /// 批量取用户：按批次上限分批读库，结果写回缓存；按传入顺序返回，不存在的 id 跳过
    pub async fn fetch_users(&self, ids: &[String]) -> AppResult<Vec<UserInfo>> {
        let loaded = load_by_ids(&self.dao, ids, self.id_batch_size).await?;
        self.cache.put_users(&loaded);
        Ok(loaded)
    }

    /// 全量扫描后在内存里按用户名/姓名子串过滤
    pub async fn search(&self, term: &str, exclude: &str) -> AppResult<Vec<UserInfo>> {
        let term = term.trim().to_lowercase();
        let all = self.dao.query(QueryBuilder::new("users").order_by("username", OrderType::Asc)).await?;
        Ok(all.into_iter().filter(|u| u.id != exclude && u.matches_term(&term)).collect())
    }
}
