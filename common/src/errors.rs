use log::error;
use mongodb::error::Error as MongoError;
use std::io;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    // ==== 常规业务错误 ====
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    Validation(String),

    #[error("Unauthorized access: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // ==== 系统错误 ====
    #[error("Store error: {0}")]
    Store(String),
    #[error("MongoDB error: {0}")]
    Mongo(#[from] MongoError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 网络/存储层的临时故障，乐观更新需要回滚而不是当作逻辑错误
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Store(_) | AppError::Mongo(_) | AppError::Io(_))
    }

    /// 记录并返回面向用户的简短提示
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(_) => "Not found".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Unauthorized(_) => "Not authenticated".to_string(),
            AppError::Forbidden(_) => "Not authorized".to_string(),
            AppError::Conflict(msg) => msg.clone(),
            e => {
                error!("{:?}", e);
                "Something went wrong".to_string()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("参数验证失败: {}", e))
    }
}

impl From<validator::ValidationError> for AppError {
    fn from(e: validator::ValidationError) -> Self {
        AppError::Validation(format!("参数验证失败: {}", e.code))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Validation(format!("配置加载失败: {}", e))
    }
}

impl From<mongodb::bson::ser::Error> for AppError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        AppError::Internal(format!("bson encode: {}", e))
    }
}

impl From<mongodb::bson::de::Error> for AppError {
    fn from(e: mongodb::bson::de::Error) -> Self {
        AppError::Internal(format!("bson decode: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_store_level() {
        assert!(AppError::Store("down".into()).is_transient());
        assert!(!AppError::Forbidden("x".into()).is_transient());
        assert!(!AppError::Conflict("x".into()).is_transient());
    }

    #[test]
    fn user_message_hides_internal_details() {
        assert_eq!(AppError::Internal("stack".into()).user_message(), "Something went wrong");
        assert_eq!(
            AppError::Conflict("item has already been purchased".into()).user_message(),
            "item has already been purchased"
        );
    }
}
