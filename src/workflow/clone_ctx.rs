//! 克隆处理上下文
//!
//! 封装"我正在处理哪一次克隆"这一信息，以及它是否还应该继续

use std::fmt::Display;

use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::infrastructure::EventSender;
use crate::models::short_id;

/// 克隆处理上下文
#[derive(Debug, Clone)]
pub struct CloneCtx {
    /// 克隆 ID
    pub clone_id: String,

    /// 规范化后的目标网址
    pub target_url: String,

    cancel: CancellationToken,
}

impl CloneCtx {
    pub fn new(clone_id: String, target_url: String, cancel: CancellationToken) -> Self {
        Self {
            clone_id,
            target_url,
            cancel,
        }
    }

    /// 日志用的短 ID
    pub fn short_id(&self) -> &str {
        short_id(&self.clone_id)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 每次外部调用返回后检查：调用方是否还在、会话是否被结束
    ///
    /// 调用方断开优先于取消，断开时不再发送任何事件
    pub fn ensure_live(&self, events: &EventSender) -> Result<(), StreamError> {
        if events.is_closed() && !events.is_terminated() {
            return Err(StreamError::Disconnected);
        }
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }

    /// 等待取消，返回停止原因
    pub async fn stopped(&self, events: &EventSender) -> StreamError {
        self.cancel.cancelled().await;
        match self.ensure_live(events) {
            Err(reason) => reason,
            Ok(()) => StreamError::Cancelled,
        }
    }
}

impl Display for CloneCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[克隆 {}]", self.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_channel;
    use std::time::Duration;

    #[test]
    fn test_display_uses_short_id() {
        let ctx = CloneCtx::new(
            "0123456789abcdef".to_string(),
            "https://example.com".to_string(),
            CancellationToken::new(),
        );
        assert_eq!(ctx.to_string(), "[克隆 01234567]");
    }

    #[tokio::test]
    async fn test_disconnect_wins_over_cancel() {
        let token = CancellationToken::new();
        let ctx = CloneCtx::new("id".to_string(), "https://a.test".to_string(), token.clone());
        let (tx, mut rx) = event_channel(4, Duration::from_secs(5), Duration::from_secs(5));

        assert_eq!(ctx.ensure_live(&tx), Ok(()));
        token.cancel();
        assert_eq!(ctx.ensure_live(&tx), Err(StreamError::Cancelled));
        rx.close();
        assert_eq!(ctx.ensure_live(&tx), Err(StreamError::Disconnected));
    }
}
