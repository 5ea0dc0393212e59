//! 事件通道
//!
//! 编排器（唯一生产者）→ 调用方（唯一消费者）的有序事件流：
//!
//! - 先进先出，生产结束前就可以消费
//! - 终止事件（`done` / `error`）之后通道关闭，不会再有任何事件
//! - 消费者侧有停滞上限和总时长上限，超时时合成一条 `error` 事件后关闭
//! - 消费者关闭（断开、超时）对生产者可见，生产者据此触发清理

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::error::{AppError, StreamError};
use crate::models::ProgressEvent;

/// 创建事件通道
///
/// # 参数
/// - `buffer`: 缓冲的事件数量，满了以后生产者等待
/// - `stall`: 两个事件之间的最长间隔
/// - `overall`: 整个流的最长时长
pub fn event_channel(buffer: usize, stall: Duration, overall: Duration) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let terminal_sent = Arc::new(AtomicBool::new(false));

    let sender = EventSender {
        tx: Some(tx),
        terminal_sent,
        send_timeout: stall,
    };
    let stream = EventStream {
        rx: Some(rx),
        stall,
        overall,
        deadline: Instant::now() + overall,
    };
    (sender, stream)
}

/// 生产者一端
pub struct EventSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    terminal_sent: Arc<AtomicBool>,
    send_timeout: Duration,
}

impl EventSender {
    /// 发送一个事件
    ///
    /// 消费者已经离开时返回 [`StreamError::Disconnected`]；终止事件之后再发送返回
    /// [`StreamError::AlreadyTerminated`]
    pub async fn emit(&mut self, event: ProgressEvent) -> Result<(), StreamError> {
        if self.is_terminated() {
            return Err(StreamError::AlreadyTerminated);
        }
        let Some(tx) = &self.tx else {
            return Err(StreamError::Disconnected);
        };

        let terminal = event.is_terminal();
        if terminal {
            self.terminal_sent.store(true, Ordering::Release);
        }

        // 消费者长时间不读取等同于断开
        if tx.send_timeout(event, self.send_timeout).await.is_err() {
            self.tx = None;
            return Err(StreamError::Disconnected);
        }

        if terminal {
            self.tx = None;
        }
        Ok(())
    }

    /// 消费者是否已经离开
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// 是否已经发送过终止事件
    pub fn is_terminated(&self) -> bool {
        self.terminal_sent.load(Ordering::Acquire)
    }

    /// 断开信号，交给后台任务监听
    pub fn disconnect_signal(&self) -> Option<DisconnectSignal> {
        self.tx.as_ref().map(|tx| DisconnectSignal {
            tx: tx.clone(),
            terminal_sent: self.terminal_sent.clone(),
        })
    }
}

/// 消费者在收到终止事件之前离开的信号
///
/// 持有一个发送端，监听任务结束前消费者不会看到通道关闭
pub struct DisconnectSignal {
    tx: mpsc::Sender<ProgressEvent>,
    terminal_sent: Arc<AtomicBool>,
}

impl DisconnectSignal {
    /// 消费者提前离开时返回；正常收到终止事件后关闭则永远不会返回
    pub async fn disconnected(self) {
        self.tx.closed().await;
        if self.terminal_sent.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
    }
}

/// 消费者一端
pub struct EventStream {
    rx: Option<mpsc::Receiver<ProgressEvent>>,
    stall: Duration,
    overall: Duration,
    deadline: Instant,
}

impl EventStream {
    /// 读取下一个事件，终止事件之后返回 `None`
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        let rx = self.rx.as_mut()?;

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let wait = remaining.min(self.stall);

        match timeout(wait, rx.recv()).await {
            Ok(Some(event)) => {
                if event.is_terminal() {
                    self.close();
                }
                Some(event)
            }
            Ok(None) => {
                // 生产者没有发送终止事件就结束了
                self.close();
                Some(ProgressEvent::error("克隆意外中断，请稍后重试", 500))
            }
            Err(_) => {
                let err = if remaining <= self.stall {
                    StreamError::SessionTimeout {
                        secs: self.overall.as_secs(),
                    }
                } else {
                    StreamError::StallTimeout {
                        secs: self.stall.as_secs(),
                    }
                };
                self.close();
                let err = AppError::Stream(err);
                Some(ProgressEvent::error(err.user_message(), err.status_code()))
            }
        }
    }

    /// 关闭消费端，生产者会观察到断开
    pub fn close(&mut self) {
        self.rx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    /// 转换为 `Stream`，用于 SSE 响应
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }

    /// 读取全部事件直到终止
    pub async fn collect_all(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Phase, Usage};
    use tokio_test::{assert_err, assert_ok};

    fn done() -> ProgressEvent {
        ProgressEvent::Done {
            clone_id: "abc".to_string(),
            preview_url: None,
            usage: Usage::default(),
            files: Vec::new(),
        }
    }

    fn channel() -> (EventSender, EventStream) {
        event_channel(8, Duration::from_secs(5), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_fifo_until_terminal() {
        let (mut tx, rx) = channel();
        assert_ok!(tx.emit(ProgressEvent::phase(Phase::Scraping, "a")).await);
        assert_ok!(tx.emit(ProgressEvent::scrape_progress("b")).await);
        assert_ok!(tx.emit(done()).await);

        let events = rx.collect_all().await;
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["phase", "scrape_progress", "done"]);
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let (mut tx, _rx) = channel();
        assert_ok!(tx.emit(ProgressEvent::error("boom", 502)).await);
        assert!(tx.is_terminated());
        assert_eq!(
            tx.emit(ProgressEvent::scrape_progress("late")).await,
            Err(StreamError::AlreadyTerminated)
        );
    }

    #[tokio::test]
    async fn test_consumer_close_is_visible_to_producer() {
        let (mut tx, mut rx) = channel();
        rx.close();
        assert!(tx.is_closed());
        assert_eq!(
            tx.emit(ProgressEvent::scrape_progress("x")).await,
            Err(StreamError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_stall_synthesizes_single_error() {
        let (tx, mut rx) = event_channel(8, Duration::from_millis(50), Duration::from_secs(30));

        let event = rx.next().await.unwrap();
        assert!(matches!(event, ProgressEvent::Error { code: 504, .. }));
        assert!(rx.next().await.is_none());
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_overall_deadline() {
        let (mut tx, mut rx) =
            event_channel(8, Duration::from_millis(80), Duration::from_millis(120));
        tokio::spawn(async move {
            loop {
                if tx.emit(ProgressEvent::scrape_progress("tick")).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let mut last = None;
        while let Some(event) = rx.next().await {
            last = Some(event);
        }
        match last {
            Some(ProgressEvent::Error { code, message }) => {
                assert_eq!(code, 504);
                assert!(message.contains("超时"));
            }
            other => panic!("unexpected last event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_producer_gone_without_terminal() {
        let (tx, mut rx) = channel();
        drop(tx);
        let event = rx.next().await.unwrap();
        assert!(matches!(event, ProgressEvent::Error { code: 500, .. }));
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_signal() {
        let (tx, mut rx) = channel();
        let signal = tx.disconnect_signal().unwrap();
        rx.close();
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), signal.disconnected()).await);
    }

    #[tokio::test]
    async fn test_close_after_terminal_is_not_a_disconnect() {
        let (mut tx, mut rx) = channel();
        let signal = tx.disconnect_signal().unwrap();
        tx.emit(done()).await.unwrap();
        assert!(rx.next().await.unwrap().is_terminal());
        assert!(rx.is_closed());

        assert_err!(
            tokio::time::timeout(Duration::from_millis(100), signal.disconnected()).await
        );
    }
}
