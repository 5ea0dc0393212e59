//! 业务能力层（Services）
//!
//! 每个服务描述"我能做什么"，只处理单个请求，不关心流程顺序。
//! 外部协作方都以 trait 暴露，编排层持有 `Arc<dyn Trait>`，测试中可以替换为假实现。

pub mod access;
pub mod build_log;
pub mod generator;
pub mod html;
pub mod sandbox;
pub mod scraper;
pub mod screenshot;
pub mod store;
pub mod template_loader;

pub use access::{AccessControl, AllowAll, QuotaAccessControl};
pub use generator::{Generation, GenerationRequest, GenerationTask, Generator, LlmGenerator};
pub use sandbox::{HealthReport, HttpSandboxProvider, SandboxProvider};
pub use scraper::{BrowserScraper, Scraper};
pub use store::{CloneStore, MemoryCloneStore, TomlCloneStore};
