//! 集成测试用的假协作者
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use site_cloner::error::{DeploymentError, GenerationError, ScrapeError, StoreError};
use chrono::{DateTime, Utc};
use site_cloner::models::{CallUsage, ClonePage, CloneRecord, GeneratedFile, SandboxHandle, ScrapeResult};
use site_cloner::services::{
    AccessControl, AllowAll, CloneStore, Generation, GenerationRequest, GenerationTask, Generator,
    HealthReport, MemoryCloneStore, QuotaAccessControl, SandboxProvider, Scraper,
};
use site_cloner::{App, Config, ProgressEvent, Services};
use tokio::time::{sleep, timeout, Instant};

// ========== 抓取 ==========

pub enum ScrapeScript {
    Page(ScrapeResult),
    Timeout,
}

pub struct FakeScraper {
    script: ScrapeScript,
    pub urls: Mutex<Vec<String>>,
}

impl FakeScraper {
    pub fn page(result: ScrapeResult) -> Self {
        Self {
            script: ScrapeScript::Page(result),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn timing_out() -> Self {
        Self {
            script: ScrapeScript::Timeout,
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError> {
        self.urls.lock().unwrap().push(url.to_string());
        match &self.script {
            ScrapeScript::Page(result) => Ok(result.clone()),
            ScrapeScript::Timeout => Err(ScrapeError::Timeout {
                url: url.to_string(),
                secs: 60,
            }),
        }
    }
}

// ========== 生成 ==========

pub const CALL_USAGE: CallUsage = CallUsage {
    input_tokens: 1_000,
    output_tokens: 200,
};

pub const BILLED_FAILURE: CallUsage = CallUsage {
    input_tokens: 100,
    output_tokens: 50,
};

pub struct FakeGenerator {
    fail_sections: Vec<usize>,
    pub calls: AtomicUsize,
    pub repairs: AtomicUsize,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::failing_sections(Vec::new())
    }

    pub fn failing_sections(fail_sections: Vec<usize>) -> Self {
        Self {
            fail_sections,
            calls: AtomicUsize::new(0),
            repairs: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let files = match &request.task {
            GenerationTask::Full { .. } => vec![
                GeneratedFile::new("components/Hero.tsx", "export default function Hero() {}"),
                GeneratedFile::new(
                    "app/page.tsx",
                    "import Hero from \"../components/Hero\";\nexport default function Page() { return <Hero />; }",
                ),
            ],
            GenerationTask::Section { index, .. } => {
                // 让分段乱序完成
                sleep(Duration::from_millis(10 * (4 - (*index as u64).min(3)))).await;
                if self.fail_sections.contains(index) {
                    return Err(GenerationError::Model {
                        message: format!("section {} exploded", index),
                        billed: Some(BILLED_FAILURE),
                    });
                }
                vec![GeneratedFile::new(
                    format!("components/S{}Block.tsx", index),
                    format!("export default function S{}Block() {{}}", index),
                )]
            }
            GenerationTask::Repair { path, content, .. } => {
                let n = self.repairs.fetch_add(1, Ordering::SeqCst) + 1;
                vec![GeneratedFile::new(
                    path.clone(),
                    format!("// fixed v{}\n{}", n, content),
                )]
            }
        };
        Ok(Generation {
            files,
            usage: CALL_USAGE,
        })
    }
}

// ========== 沙箱 ==========

pub struct FakeSandbox {
    checks: Mutex<VecDeque<HealthReport>>,
    fallback: HealthReport,
    check_delay: Duration,
    provision_delay: Duration,
    pub log: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<GeneratedFile>>,
    pub releases: AtomicUsize,
}

impl FakeSandbox {
    pub fn healthy() -> Self {
        Self::with_checks(Vec::new(), HealthReport::Healthy)
    }

    pub fn with_checks(checks: Vec<HealthReport>, fallback: HealthReport) -> Self {
        Self {
            checks: Mutex::new(checks.into()),
            fallback,
            check_delay: Duration::ZERO,
            provision_delay: Duration::ZERO,
            log: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    /// 创建沙箱要花的时间（模拟上传模板、安装依赖）
    pub fn provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = delay;
        self
    }

    pub fn provisions(&self) -> usize {
        self.log().iter().filter(|entry| *entry == "provision").count()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// 某个路径最后一次上传的内容
    pub fn last_upload(&self, path: &str) -> Option<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|f| f.path == path)
            .map(|f| f.content.clone())
    }
}

pub fn failing(file: &str, error: &str) -> HealthReport {
    HealthReport::Failing {
        file: Some(file.to_string()),
        error: error.to_string(),
    }
}

#[async_trait]
impl SandboxProvider for FakeSandbox {
    async fn provision(&self) -> Result<SandboxHandle, DeploymentError> {
        self.log.lock().unwrap().push("provision".to_string());
        if !self.provision_delay.is_zero() {
            sleep(self.provision_delay).await;
        }
        Ok(SandboxHandle::new("sb-test"))
    }

    async fn upload(
        &self,
        _handle: &SandboxHandle,
        file: &GeneratedFile,
    ) -> Result<(), DeploymentError> {
        self.log.lock().unwrap().push(format!("upload:{}", file.path));
        self.uploads.lock().unwrap().push(file.clone());
        Ok(())
    }

    async fn preview_url(&self, handle: &SandboxHandle) -> Result<String, DeploymentError> {
        Ok(format!("https://3000-{}.preview.test", handle.id))
    }

    async fn check(&self, _handle: &SandboxHandle) -> Result<HealthReport, DeploymentError> {
        self.log.lock().unwrap().push("check".to_string());
        if !self.check_delay.is_zero() {
            sleep(self.check_delay).await;
        }
        let next = self.checks.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn release(&self, _handle: &SandboxHandle) -> Result<(), DeploymentError> {
        self.log.lock().unwrap().push("release".to_string());
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ========== 存储 ==========

/// 保存很慢的存储，用来在保存期间制造断开
pub struct SlowStore {
    inner: Arc<MemoryCloneStore>,
    delay: Duration,
    pub saving: AtomicBool,
}

impl SlowStore {
    pub fn new(inner: Arc<MemoryCloneStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            saving: AtomicBool::new(false),
        }
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloneStore for SlowStore {
    async fn save(&self, record: &CloneRecord) -> Result<(), StoreError> {
        self.saving.store(true, Ordering::SeqCst);
        sleep(self.delay).await;
        let result = self.inner.save(record).await;
        self.saving.store(false, Ordering::SeqCst);
        result
    }

    async fn list(&self, page: usize, per_page: usize) -> Result<ClonePage, StoreError> {
        self.inner.list(page, per_page).await
    }

    async fn get(&self, id: &str) -> Result<Option<CloneRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        self.inner.count_since(since).await
    }
}

// ========== 组装 ==========

pub fn test_config() -> Config {
    Config {
        section_threshold_chars: 1_000_000,
        max_sections: 3,
        min_successful_sections: 1,
        max_repair_attempts: 2,
        session_timeout_secs: 30,
        stall_timeout_secs: 10,
        event_buffer: 16,
        sandbox_ttl_secs: 600,
        ..Config::default()
    }
}

pub fn small_page() -> ScrapeResult {
    ScrapeResult {
        markup: "<html><body><header>Hi</header><main>Hello</main></body></html>".to_string(),
        title: "Example".to_string(),
        screenshots: vec!["iVBORw0KGgo=".to_string()],
        ..ScrapeResult::default()
    }
}

/// header / section / footer 三块，配合较小的拆分阈值得到 3 个分段
pub fn sectioned_page() -> ScrapeResult {
    let markup = format!(
        "<html><body><header>{}</header><section>{}</section><footer>{}</footer></body></html>",
        "h".repeat(500),
        "s".repeat(500),
        "f".repeat(500)
    );
    ScrapeResult {
        markup,
        title: "Big".to_string(),
        ..ScrapeResult::default()
    }
}

pub struct Harness {
    pub app: Arc<App>,
    pub scraper: Arc<FakeScraper>,
    pub generator: Arc<FakeGenerator>,
    pub sandbox: Option<Arc<FakeSandbox>>,
    pub store: Arc<MemoryCloneStore>,
}

impl Harness {
    pub fn new(
        config: Config,
        scraper: FakeScraper,
        generator: FakeGenerator,
        sandbox: Option<FakeSandbox>,
    ) -> Self {
        Self::build(config, scraper, generator, sandbox, None, None)
    }

    /// 保存记录时先等待 `save_delay`
    pub fn with_slow_store(
        config: Config,
        scraper: FakeScraper,
        generator: FakeGenerator,
        sandbox: FakeSandbox,
        save_delay: Duration,
    ) -> (Self, Arc<SlowStore>) {
        let store = Arc::new(MemoryCloneStore::new());
        let slow = Arc::new(SlowStore::new(store.clone(), save_delay));
        let harness = Self::build(
            config,
            scraper,
            generator,
            Some(sandbox),
            None,
            Some((store, slow.clone() as Arc<dyn CloneStore>)),
        );
        (harness, slow)
    }

    pub fn with_quota(
        config: Config,
        scraper: FakeScraper,
        generator: FakeGenerator,
        daily_limit: u64,
    ) -> Self {
        Self::build(config, scraper, generator, None, Some(daily_limit), None)
    }

    fn build(
        config: Config,
        scraper: FakeScraper,
        generator: FakeGenerator,
        sandbox: Option<FakeSandbox>,
        daily_limit: Option<u64>,
        store: Option<(Arc<MemoryCloneStore>, Arc<dyn CloneStore>)>,
    ) -> Self {
        let scraper = Arc::new(scraper);
        let generator = Arc::new(generator);
        let sandbox = sandbox.map(Arc::new);
        let (store, app_store): (Arc<MemoryCloneStore>, Arc<dyn CloneStore>) = match store {
            Some(pair) => pair,
            None => {
                let store = Arc::new(MemoryCloneStore::new());
                (store.clone(), store)
            }
        };

        let access: Arc<dyn AccessControl> = match daily_limit {
            Some(limit) => Arc::new(QuotaAccessControl::new(
                store.clone() as Arc<dyn CloneStore>,
                limit,
                None,
            )),
            None => Arc::new(AllowAll),
        };

        let services = Services {
            scraper: scraper.clone(),
            generator: generator.clone(),
            sandbox: sandbox
                .clone()
                .map(|s| s as Arc<dyn SandboxProvider>),
            store: app_store,
            access,
        };

        Self {
            app: Arc::new(App::with_services(config, services)),
            scraper,
            generator,
            sandbox,
            store,
        }
    }

    pub fn sandbox(&self) -> &FakeSandbox {
        self.sandbox.as_deref().expect("harness has no sandbox")
    }

    /// 开始一次克隆并读完全部事件
    pub async fn run_clone(&self, url: &str) -> (String, Vec<ProgressEvent>) {
        let handle = self.app.start_clone(url, None).await.expect("start clone");
        let events = handle.events.collect_all().await;
        (handle.clone_id, events)
    }
}

/// 在 5 秒内轮询直到条件成立
pub async fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    timeout(Duration::from_secs(5), async {
        while !cond() && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
        && cond()
}

pub fn terminal_count(events: &[ProgressEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

pub fn done_files(events: &[ProgressEvent]) -> Vec<GeneratedFile> {
    match events.last() {
        Some(ProgressEvent::Done { files, .. }) => files.clone(),
        other => panic!("expected done, got {:?}", other),
    }
}
