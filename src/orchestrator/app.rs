//! 应用主结构 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：按配置创建抓取器、生成器、沙箱、存储、访问控制
//! 2. **开始克隆**：鉴权 → 规范化网址 → 登记会话 → 后台运行编排器
//! 3. **查询**：历史记录分页、详情、文件、预览地址
//! 4. **沙箱结束**：显式结束 / beacon / 过期清理，全部走注册表的同一个入口
//!
//! 唯一持有所有协作者的模块，HTTP 层只和这里打交道。

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{
    event_channel, EventStream, ReleaseOutcome, SandboxLease, SessionEntry, SessionRegistry,
};
use crate::models::{short_id, ClonePage, CloneRecord, CloneSession, GeneratedFile};
use crate::orchestrator::clone_orchestrator::CloneOrchestrator;
use crate::services::generator::ENTRY_FILE;
use crate::services::{
    AccessControl, BrowserScraper, CloneStore, Generator, HttpSandboxProvider, LlmGenerator,
    QuotaAccessControl, SandboxProvider, Scraper, TomlCloneStore,
};
use crate::utils::logging::log_startup;
use crate::workflow::normalize_url;

/// 过期沙箱的检查间隔
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// 编排器依赖的全部协作者
#[derive(Clone)]
pub struct Services {
    pub scraper: Arc<dyn Scraper>,
    pub generator: Arc<dyn Generator>,
    /// 为空时跳过部署，使用本地预览
    pub sandbox: Option<Arc<dyn SandboxProvider>>,
    pub store: Arc<dyn CloneStore>,
    pub access: Arc<dyn AccessControl>,
}

/// 一次已开始的克隆
pub struct CloneHandle {
    pub clone_id: String,
    pub events: EventStream,
}

/// 预览内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preview {
    /// 沙箱中运行的页面
    Redirect(String),
    /// 没有沙箱时直接渲染生成的入口文件
    Html(String),
}

/// 应用主结构
pub struct App {
    config: Arc<Config>,
    services: Services,
    registry: Arc<SessionRegistry>,
}

impl App {
    /// 按配置初始化真实的协作者
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let store: Arc<dyn CloneStore> = Arc::new(TomlCloneStore::open(&config.store_dir).await?);
        let sandbox: Option<Arc<dyn SandboxProvider>> = if config.sandbox_enabled() {
            Some(Arc::new(HttpSandboxProvider::new(&config).await?))
        } else {
            warn!("⚠️ 未配置 SANDBOX_API_KEY，克隆结果只提供本地预览");
            None
        };

        let services = Services {
            scraper: Arc::new(BrowserScraper::new(&config)),
            generator: Arc::new(LlmGenerator::new(&config)),
            sandbox,
            access: Arc::new(QuotaAccessControl::new(
                store.clone(),
                config.daily_clone_limit,
                config.access_token.clone(),
            )),
            store,
        };

        Ok(Self::with_services(config, services))
    }

    /// 使用给定的协作者创建应用
    pub fn with_services(config: Config, services: Services) -> Self {
        Self {
            config: Arc::new(config),
            services,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 开始一次克隆，返回事件流
    ///
    /// 鉴权和网址校验失败时直接返回错误，不会产生会话
    pub async fn start_clone(&self, raw_url: &str, token: Option<&str>) -> AppResult<CloneHandle> {
        let url = normalize_url(raw_url)?;
        self.services.access.authorize(token).await?;

        let clone_id = Uuid::new_v4().to_string();
        let session = CloneSession::new(clone_id.clone(), url);
        let lease = Arc::new(SandboxLease::new(self.services.sandbox.clone()));
        let entry = Arc::new(SessionEntry::new(lease));
        self.registry.register(&clone_id, entry.clone());

        let (sender, stream) = event_channel(
            self.config.event_buffer,
            self.config.stall_timeout(),
            self.config.session_timeout(),
        );

        let orchestrator = CloneOrchestrator::new(
            self.config.clone(),
            self.services.clone(),
            self.registry.clone(),
        );
        tokio::spawn(orchestrator.run(session, entry, sender));

        Ok(CloneHandle {
            clone_id,
            events: stream,
        })
    }

    /// 历史记录分页
    pub async fn list_clones(&self, page: usize, per_page: usize) -> AppResult<ClonePage> {
        Ok(self.services.store.list(page, per_page).await?)
    }

    pub async fn clone_detail(&self, id: &str) -> AppResult<CloneRecord> {
        self.services
            .store
            .get(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    pub async fn clone_files(&self, id: &str) -> AppResult<Vec<GeneratedFile>> {
        self.services
            .store
            .get_files(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// 预览地址：沙箱仍在时取实时地址，否则用记录里的地址或渲染入口文件
    pub async fn preview(&self, id: &str) -> AppResult<Preview> {
        if let (Some(provider), Some(handle)) = (
            self.services.sandbox.as_ref(),
            self.registry.get(id).and_then(|entry| entry.lease.handle()),
        ) {
            return Ok(Preview::Redirect(provider.preview_url(&handle).await?));
        }

        let record = self.clone_detail(id).await?;
        match record.preview_url {
            Some(url) if url.starts_with("http") => Ok(Preview::Redirect(url)),
            _ => Ok(Preview::Html(render_preview_page(&record))),
        }
    }

    /// 结束沙箱，对未知或已结束的会话是空操作
    pub async fn end_sandbox(&self, id: &str) -> ReleaseOutcome {
        info!("[克隆 {}] 收到结束请求", short_id(id));
        self.registry.end(id).await
    }

    /// 页面关闭时的 beacon，尽力而为
    pub async fn beacon(&self, id: &str) -> ReleaseOutcome {
        debug!("[克隆 {}] 收到 beacon", short_id(id));
        self.registry.end(id).await
    }

    /// 释放所有已过期的保留沙箱，返回释放的数量
    pub async fn reap_expired(&self) -> usize {
        let expired = self.registry.expired(Instant::now());
        for id in &expired {
            info!("[克隆 {}] ⏰ 沙箱保留时间已到，正在释放", short_id(id));
            self.registry.end(id).await;
        }
        expired.len()
    }

    /// 后台定期清理过期沙箱
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let app = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_INTERVAL);
            loop {
                ticker.tick().await;
                let reaped = app.reap_expired().await;
                if reaped > 0 {
                    debug!("清理了 {} 个过期沙箱", reaped);
                }
            }
        })
    }

    /// 启动 HTTP 服务
    pub async fn run(self) -> Result<()> {
        let app = Arc::new(self);
        let _reaper = app.spawn_reaper();

        let listener = tokio::net::TcpListener::bind(&app.config.bind_addr).await?;
        info!("🌐 服务已启动: http://{}", listener.local_addr()?);

        axum::serve(listener, crate::server::router(app)).await?;
        Ok(())
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound {
        what: format!("克隆记录 {}", id),
    }
}

/// 没有沙箱时的预览页：展示生成的入口文件
fn render_preview_page(record: &CloneRecord) -> String {
    let entry = record
        .files
        .iter()
        .find(|f| f.path == ENTRY_FILE)
        .or_else(|| record.files.first());

    let (path, content) = match entry {
        Some(file) => (file.path.as_str(), file.content.as_str()),
        None => ("", ""),
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<p>{path} · {count} 个文件</p>\n<pre><code>{code}</code></pre>\n</body>\n</html>\n",
        title = escape_html(&record.url),
        path = escape_html(path),
        count = record.files.len(),
        code = escape_html(content),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Usage;
    use chrono::Utc;

    #[test]
    fn test_preview_page_escapes_entry_file() {
        let record = CloneRecord {
            id: "abc".to_string(),
            url: "https://example.com".to_string(),
            preview_url: Some("/api/preview/abc".to_string()),
            sandbox_id: None,
            created_at: Utc::now(),
            completed_at: Utc::now(),
            usage: Usage::default(),
            files: vec![
                GeneratedFile::new("components/S1Hero.tsx", "hero"),
                GeneratedFile::new(ENTRY_FILE, "<main className=\"x\">&</main>"),
            ],
        };

        let html = render_preview_page(&record);
        assert!(html.contains("&lt;main className=&quot;x&quot;&gt;&amp;&lt;/main&gt;"));
        assert!(html.contains("app/page.tsx · 2 个文件"));
        assert!(!html.contains("hero"));
    }
}
