//! 在线会话注册表
//!
//! 克隆 ID → 取消令牌 + 沙箱租约。会话开始时登记，进入终止状态或被清理时移除；
//! 完成后保留沙箱的会话会带上过期时间，由后台任务定期清理。

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::infrastructure::sandbox_lease::{ReleaseOutcome, SandboxLease};
use crate::models::short_id;

/// 注册表中的一个会话
pub struct SessionEntry {
    pub cancel: CancellationToken,
    pub lease: Arc<SandboxLease>,
    expires_at: Mutex<Option<Instant>>,
}

impl SessionEntry {
    pub fn new(lease: Arc<SandboxLease>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            lease,
            expires_at: Mutex::new(None),
        }
    }

    fn expires_at(&self) -> Option<Instant> {
        *self.expires_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_expires_at(&self, at: Instant) {
        *self.expires_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }
}

/// 会话注册表
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str, entry: Arc<SessionEntry>) {
        debug!("[克隆 {}] 登记会话", short_id(id));
        self.sessions.insert(id.to_string(), entry);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.remove(id).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 结束会话：取消进行中的流程并释放沙箱
    ///
    /// 对未知或已结束的会话调用是成功的空操作
    pub async fn end(&self, id: &str) -> ReleaseOutcome {
        let Some(entry) = self.remove(id) else {
            debug!("[克隆 {}] 会话不存在或已结束", short_id(id));
            return ReleaseOutcome::Unknown;
        };
        entry.cancel.cancel();
        let outcome = entry.lease.release().await;
        info!("[克隆 {}] 🛑 会话已结束 ({:?})", short_id(id), outcome);
        outcome
    }

    /// 保留会话（和沙箱）`ttl` 时长
    pub fn keep_alive(&self, id: &str, ttl: Duration) -> bool {
        match self.get(id) {
            Some(entry) => {
                entry.set_expires_at(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    /// 截至 `now` 已经过期的会话
    pub fn expired(&self, now: Instant) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().expires_at().is_some_and(|at| at <= now))
            .map(|entry| entry.key().clone())
            .collect()
    }
}
