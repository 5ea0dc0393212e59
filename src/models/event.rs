//! 进度事件
//!
//! 每个事件序列化为一条扁平的 JSON 记录，`status` 字段区分类型

use serde::{Deserialize, Serialize};

use crate::models::session::{GeneratedFile, Phase, Usage};

/// 发送给调用方的进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 进入新阶段
    Phase { phase: Phase, message: String },
    /// 抓取子步骤
    ScrapeProgress { message: String },
    /// 截图完成（base64 PNG）
    #[serde(rename = "screenshot")]
    ScreenshotCaptured { message: String, screenshot: String },
    /// 某个分段生成完成
    SectionComplete {
        index: usize,
        total: usize,
        components: Vec<String>,
    },
    /// 生成了一个文件
    #[serde(rename = "file_write")]
    FileWritten { file: String, lines: usize },
    /// 上传了一个文件到沙箱
    #[serde(rename = "file_upload")]
    FileUploaded { file: String, message: String },
    /// 沙箱预览地址可用
    SandboxReady { preview_url: String },
    /// 正在自动修复
    Fixing {
        attempt: u32,
        max_attempts: u32,
        file: Option<String>,
        message: String,
    },
    /// 克隆完成（终止事件）
    Done {
        clone_id: String,
        preview_url: Option<String>,
        usage: Usage,
        files: Vec<GeneratedFile>,
    },
    /// 克隆失败（终止事件）
    Error { message: String, code: u16 },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Done { .. } | ProgressEvent::Error { .. })
    }

    /// 事件类型名，与序列化后的 `status` 字段一致
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Phase { .. } => "phase",
            ProgressEvent::ScrapeProgress { .. } => "scrape_progress",
            ProgressEvent::ScreenshotCaptured { .. } => "screenshot",
            ProgressEvent::SectionComplete { .. } => "section_complete",
            ProgressEvent::FileWritten { .. } => "file_write",
            ProgressEvent::FileUploaded { .. } => "file_upload",
            ProgressEvent::SandboxReady { .. } => "sandbox_ready",
            ProgressEvent::Fixing { .. } => "fixing",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn phase(phase: Phase, message: impl Into<String>) -> Self {
        ProgressEvent::Phase {
            phase,
            message: message.into(),
        }
    }

    pub fn scrape_progress(message: impl Into<String>) -> Self {
        ProgressEvent::ScrapeProgress {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>, code: u16) -> Self {
        ProgressEvent::Error {
            message: message.into(),
            code,
        }
    }
}
