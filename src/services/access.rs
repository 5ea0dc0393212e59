//! 访问控制 - 业务能力层
//!
//! 只负责"这个请求能不能开始一次克隆"判断

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::warn;

use crate::error::{AppError, AppResult, AuthError};
use crate::services::store::CloneStore;

/// 访问控制能力
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// 检查凭证和配额，不通过时返回 [`AuthError`]
    async fn authorize(&self, token: Option<&str>) -> AppResult<()>;
}

/// 可选的访问令牌 + 每日克隆次数上限
pub struct QuotaAccessControl {
    store: Arc<dyn CloneStore>,
    daily_limit: u64,
    access_token: Option<String>,
}

impl QuotaAccessControl {
    pub fn new(store: Arc<dyn CloneStore>, daily_limit: u64, access_token: Option<String>) -> Self {
        Self {
            store,
            daily_limit,
            access_token,
        }
    }
}

#[async_trait]
impl AccessControl for QuotaAccessControl {
    async fn authorize(&self, token: Option<&str>) -> AppResult<()> {
        if let Some(expected) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            match token {
                None => return Err(AuthError::MissingCredential.into()),
                Some(given) if given != expected => {
                    warn!("⚠️ 访问令牌不匹配");
                    return Err(AuthError::InvalidCredential.into());
                }
                Some(_) => {}
            }
        }

        let since = Utc::now() - Duration::hours(24);
        let used = self.store.count_since(since).await.map_err(AppError::from)? as u64;
        if used >= self.daily_limit {
            warn!("⚠️ 今日克隆次数已达上限: {}/{}", used, self.daily_limit);
            return Err(AuthError::QuotaExceeded {
                limit: self.daily_limit,
            }
            .into());
        }
        Ok(())
    }
}

/// 不做任何限制
pub struct AllowAll;

#[async_trait]
impl AccessControl for AllowAll {
    async fn authorize(&self, _token: Option<&str>) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CloneRecord, Usage};
    use crate::services::store::MemoryCloneStore;

    async fn store_with(count: usize) -> Arc<dyn CloneStore> {
        let store = MemoryCloneStore::new();
        for i in 0..count {
            store
                .save(&CloneRecord {
                    id: format!("c{}", i),
                    url: "https://example.com".to_string(),
                    preview_url: None,
                    sandbox_id: None,
                    created_at: Utc::now(),
                    completed_at: Utc::now(),
                    usage: Usage::default(),
                    files: Vec::new(),
                })
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let access = QuotaAccessControl::new(store_with(2).await, 2, None);
        let err = access.authorize(None).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
    }

    #[tokio::test]
    async fn test_under_quota() {
        let access = QuotaAccessControl::new(store_with(1).await, 2, None);
        assert!(access.authorize(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_required_when_configured() {
        let access = QuotaAccessControl::new(store_with(0).await, 10, Some("secret".to_string()));
        assert_eq!(access.authorize(None).await.unwrap_err().status_code(), 401);
        assert_eq!(
            access.authorize(Some("wrong")).await.unwrap_err().status_code(),
            401
        );
        assert!(access.authorize(Some("secret")).await.is_ok());
    }
}
