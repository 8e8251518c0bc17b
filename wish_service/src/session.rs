use crate::entitys::user_entity::UserInfo;
use common::errors::{AppError, AppResult};

/// 当前登录用户上下文，显式传入每个核心操作
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    user: UserInfo,
}

impl Session {
    pub fn new(user: UserInfo) -> Self {
        Self { user }
    }

    pub fn uid(&self) -> &str {
        &self.user.id
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    pub fn display_name(&self) -> String {
        self.user.display_name()
    }

    /// 资料更新后刷新会话中的用户
    pub fn refresh(&mut self, user: UserInfo) {
        self.user = user;
    }

    pub fn is(&self, uid: &str) -> bool {
        self.user.id == uid
    }

    /// 只有资源所有者本人可以继续
    pub fn ensure_owner(&self, owner_id: &str, what: &str) -> AppResult<()> {
        if self.is(owner_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("not authorized to modify {}", what)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_check_fails_closed() {
        let session = Session::new(UserInfo { id: "u1".into(), username: "uno".into(), ..Default::default() });
        assert!(session.ensure_owner("u1", "item").is_ok());
        let err = session.ensure_owner("u2", "item").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(session.display_name(), "uno");
    }
}
