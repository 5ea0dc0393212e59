//! 流程层（Workflow）
//!
//! 定义"一次克隆"中每个阶段的处理流程：
//! - `url` - 目标网址规范化
//! - `section_plan` - 决定整页生成还是分段生成
//! - `generation` - 生成阶段（单次 / 分段并发 + 组合入口）
//! - `deployment` - 部署阶段（创建沙箱 → 上传 → 检查 → 修复）

pub mod clone_ctx;
pub mod deployment;
pub mod generation;
pub mod section_plan;
pub mod url;

pub use clone_ctx::CloneCtx;
pub use deployment::{Deployment, DeploymentStage};
pub use generation::{compose_entry_page, GenerationStage};
pub use section_plan::{plan_sections, SectionPlan};
pub use url::normalize_url;
