//! # Site Cloner
//!
//! 输入一个网址，抓取页面，用大模型生成等价的 Next.js 源码，部署到沙箱并返回预览地址
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `event_channel` - 单生产者 / 单消费者的进度事件流
//! - `SandboxLease` - 沙箱的唯一所有者，释放恰好生效一次
//! - `SessionRegistry` - 在线会话表（克隆 ID → 取消令牌 + 租约）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `Scraper` - 抓取页面（HTML + 截图）
//! - `Generator` - 大模型生成源文件
//! - `SandboxProvider` - 创建沙箱、上传、检查、释放
//! - `CloneStore` / `AccessControl` - 历史记录和配额
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义一次克隆中每个阶段的处理流程
//! - `GenerationStage` - 单次 / 分段并发生成
//! - `DeploymentStage` - 上传 → 检查 → 自动修复
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/clone_orchestrator` - 一次克隆的状态机
//! - `orchestrator/app` - 持有所有协作者，对外提供全部操作
//!
//! `server/` 是 axum HTTP 层，只调用 `App`。
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{event_channel, EventSender, EventStream, SandboxLease, SessionRegistry};
pub use models::{CloneRecord, GeneratedFile, Phase, ProgressEvent, Usage};
pub use orchestrator::{App, CloneHandle, Preview, Services};
pub use workflow::normalize_url;
