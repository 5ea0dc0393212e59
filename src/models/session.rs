//! 克隆会话 - 一次克隆请求的全部状态

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// 状态机阶段
///
/// `scraping → generating → deploying → done`，`fixing` 嵌套在 `deploying` 内，
/// `error` 可以从任意非终止阶段进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scraping,
    Generating,
    Deploying,
    Fixing,
    Done,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }

    /// 是否允许从 `self` 进入 `next`
    pub fn can_advance_to(self, next: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Phase::Error)
                | (Phase::Scraping, Phase::Generating)
                | (Phase::Generating, Phase::Deploying)
                // 没有配置沙箱时直接完成
                | (Phase::Generating, Phase::Done)
                | (Phase::Deploying, Phase::Fixing)
                | (Phase::Fixing, Phase::Deploying)
                | (Phase::Deploying, Phase::Done)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Scraping => "scraping",
            Phase::Generating => "generating",
            Phase::Deploying => "deploying",
            Phase::Fixing => "fixing",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        f.write_str(name)
    }
}

/// 生成的源文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    pub lines: usize,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let lines = content.matches('\n').count() + 1;
        Self {
            path: path.into(),
            content,
            lines,
        }
    }
}

/// 沙箱句柄，由沙箱服务返回
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub id: String,
}

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// 单次模型调用的用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// 计价参数（美元 / 百万 token）
#[derive(Debug, Clone, Copy, Default)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub fn cost(&self, call: &CallUsage) -> f64 {
        (call.input_tokens as f64 * self.input_per_mtok
            + call.output_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

/// 会话累计用量，只增不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// 所有调用次数（包括失败的）
    pub calls: u64,
    pub failed_calls: u64,
    pub elapsed_ms: u64,
    pub estimated_cost_usd: f64,
}

impl Usage {
    /// 记录一次成功的调用
    pub fn record(&mut self, call: &CallUsage, pricing: &Pricing) {
        self.calls += 1;
        self.add_tokens(call, pricing);
    }

    /// 记录一次失败的调用，失败调用也可能已经计费
    pub fn record_failure(&mut self, billed: Option<CallUsage>, pricing: &Pricing) {
        self.calls += 1;
        self.failed_calls += 1;
        if let Some(call) = billed {
            self.add_tokens(&call, pricing);
        }
    }

    pub fn observe_elapsed(&mut self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        self.elapsed_ms = self.elapsed_ms.max(ms);
    }

    fn add_tokens(&mut self, call: &CallUsage, pricing: &Pricing) {
        self.input_tokens += call.input_tokens;
        self.output_tokens += call.output_tokens;
        self.estimated_cost_usd += pricing.cost(call);
    }
}

/// 一次克隆请求的会话
///
/// 只能由驱动它的编排器修改
#[derive(Debug)]
pub struct CloneSession {
    pub id: String,
    pub target_url: String,
    phase: Phase,
    sandbox: Option<SandboxHandle>,
    usage: Usage,
    files: Vec<GeneratedFile>,
    files_frozen: bool,
    started_at: Instant,
    pub created_at: DateTime<Utc>,
}

impl CloneSession {
    pub fn new(id: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target_url: target_url.into(),
            phase: Phase::Scraping,
            sandbox: None,
            usage: Usage::default(),
            files: Vec::new(),
            files_frozen: false,
            started_at: Instant::now(),
            created_at: Utc::now(),
        }
    }

    /// 日志用的短 ID
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 进入下一个阶段
    pub fn advance(&mut self, next: Phase) -> AppResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(AppError::Other(format!(
                "非法的阶段切换: {} → {}",
                self.phase, next
            )));
        }
        self.phase = next;
        Ok(())
    }

    pub fn sandbox(&self) -> Option<&SandboxHandle> {
        self.sandbox.as_ref()
    }

    pub fn set_sandbox(&mut self, handle: SandboxHandle) {
        self.sandbox = Some(handle);
    }

    pub fn usage(&self) -> Usage {
        let mut usage = self.usage;
        usage.observe_elapsed(self.started_at.elapsed());
        usage
    }

    pub fn usage_mut(&mut self) -> &mut Usage {
        &mut self.usage
    }

    pub fn files(&self) -> &[GeneratedFile] {
        &self.files
    }

    /// 追加生成的文件；生成阶段结束后文件列表冻结
    pub fn push_file(&mut self, file: GeneratedFile) -> AppResult<()> {
        if self.files_frozen {
            return Err(AppError::Other(format!(
                "生成阶段已结束，不能再追加文件: {}",
                file.path
            )));
        }
        self.files.push(file);
        Ok(())
    }

    pub fn freeze_files(&mut self) {
        self.files_frozen = true;
    }
}

/// 取 ID 的前 8 个字符
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
