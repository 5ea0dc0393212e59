//! 沙箱租约
//!
//! 一个会话最多持有一个沙箱，无论哪个触发方先到（显式结束、beacon、编排器完成、
//! 调用方断开、TTL 到期），沙箱都只会被释放一次。
//!
//! 状态只能单向变化：
//!
//! ```text
//! UNPROVISIONED ──activate──▶ ACTIVE ──release──▶ RELEASED
//!       └───────────────release───────────────────▲
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::models::SandboxHandle;
use crate::services::SandboxProvider;

const UNPROVISIONED: u8 = 0;
const ACTIVE: u8 = 1;
const RELEASED: u8 = 2;

/// 一次 `release` 调用的结果，所有结果对调用方来说都是成功
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 本次调用真正释放了沙箱
    Released,
    /// 已经被其他触发方释放过
    AlreadyReleased,
    /// 从未创建过沙箱
    NeverProvisioned,
    /// 会话不存在
    Unknown,
}

/// 沙箱租约
pub struct SandboxLease {
    state: AtomicU8,
    handle: Mutex<Option<SandboxHandle>>,
    provider: Option<Arc<dyn SandboxProvider>>,
}

impl SandboxLease {
    pub fn new(provider: Option<Arc<dyn SandboxProvider>>) -> Self {
        Self {
            state: AtomicU8::new(UNPROVISIONED),
            handle: Mutex::new(None),
            provider,
        }
    }

    /// 登记刚创建好的沙箱
    ///
    /// 如果租约已经被释放（会话在创建期间被结束），立即释放这个沙箱并返回 `false`
    pub async fn activate(&self, handle: SandboxHandle) -> bool {
        self.lock_handle().replace(handle.clone());

        if self
            .state
            .compare_exchange(UNPROVISIONED, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }

        warn!("⚠️ 会话已结束，释放刚创建的沙箱 {}", handle.id);
        let orphan = self.lock_handle().take();
        if let Some(orphan) = orphan {
            self.release_handle(&orphan).await;
        }
        false
    }

    /// 释放沙箱，可以重复调用
    pub async fn release(&self) -> ReleaseOutcome {
        match self.state.swap(RELEASED, Ordering::AcqRel) {
            ACTIVE => {
                let handle = self.lock_handle().take();
                if let Some(handle) = handle {
                    self.release_handle(&handle).await;
                }
                ReleaseOutcome::Released
            }
            RELEASED => ReleaseOutcome::AlreadyReleased,
            _ => ReleaseOutcome::NeverProvisioned,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub fn is_released(&self) -> bool {
        self.state.load(Ordering::Acquire) == RELEASED
    }

    pub fn handle(&self) -> Option<SandboxHandle> {
        self.lock_handle().clone()
    }

    async fn release_handle(&self, handle: &SandboxHandle) {
        let Some(provider) = &self.provider else {
            return;
        };
        // 释放失败只记录日志，租约状态不回退
        match provider.release(handle).await {
            Ok(()) => info!("🗑️ 已释放沙箱 {}", handle.id),
            Err(e) => warn!("⚠️ 释放沙箱 {} 失败: {}", handle.id, e),
        }
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<SandboxHandle>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}
