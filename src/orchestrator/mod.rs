//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `app` - 应用主结构
//! - 持有所有协作者和在线会话注册表
//! - 开始克隆、查询历史、结束沙箱、定期清理过期沙箱
//!
//! ### `clone_orchestrator` - 单次克隆编排器
//! - 驱动一次克隆的状态机，发送进度事件
//! - 负责失败、超时、断开时的清理
//!
//! ## 层次关系
//!
//! ```text
//! app (所有会话)
//!     ↓
//! clone_orchestrator (一次克隆)
//!     ↓
//! workflow::{GenerationStage, DeploymentStage} (一个阶段)
//!     ↓
//! services (能力层：scraper / generator / sandbox / store)
//!     ↓
//! infrastructure (事件通道、沙箱租约、会话注册表)
//! ```

pub mod app;
pub mod clone_orchestrator;

pub use app::{App, CloneHandle, Preview, Services};
pub use clone_orchestrator::CloneOrchestrator;
