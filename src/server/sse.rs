//! 事件流编码
//!
//! 每个进度事件编码为一条 `data: <json>` 消息，流结束时发送 `data: [DONE]`。
//! 解码端跳过无法解析的消息，遇到结束标记后停止。

use axum::response::sse::Event;
use tracing::warn;

use crate::models::ProgressEvent;

/// 流结束标记
pub const DONE_SENTINEL: &str = "[DONE]";

/// 进度事件 → SSE 消息
pub fn to_sse_event(event: &ProgressEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            warn!("⚠️ 事件序列化失败 ({}): {}", event.kind(), e);
            Event::default().comment("unserializable event")
        }
    }
}

pub fn done_event() -> Event {
    Event::default().data(DONE_SENTINEL)
}

/// 编码为原始文本帧
pub fn encode_frame(event: &ProgressEvent) -> Option<String> {
    serde_json::to_string(event)
        .ok()
        .map(|json| format!("data: {}\n\n", json))
}

/// 增量解码器，适合逐块读取响应体
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已经读到结束标记
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 追加一块数据，返回其中完整的事件
    pub fn push(&mut self, chunk: &str) -> Vec<ProgressEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            let Some(data) = frame_data(&frame) else {
                continue;
            };
            if data.trim() == DONE_SENTINEL {
                self.finished = true;
                self.buffer.clear();
                break;
            }
            match serde_json::from_str::<ProgressEvent>(&data) {
                Ok(event) => events.push(event),
                Err(e) => warn!("⚠️ 跳过无法解析的事件: {}", e),
            }
        }
        events
    }
}

/// 一条消息里所有 `data:` 行拼接后的内容，注释和其他字段忽略
fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// 解码完整的响应体
pub fn parse_sse_body(body: &str) -> Vec<ProgressEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.push(body);
    if !decoder.is_finished() {
        // 末尾缺少空行的最后一条消息
        events.extend(decoder.push("\n\n"));
    }
    events
}
