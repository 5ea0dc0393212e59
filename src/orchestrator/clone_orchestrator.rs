//! 单次克隆编排器 - 编排层
//!
//! ## 职责
//!
//! 驱动一次克隆的状态机：
//!
//! ```text
//! scraping → generating → deploying ⇄ fixing → done
//!     └──────────┴────────────┴──────────────→ error
//! ```
//!
//! - 每个阶段切换都发送进度事件，终止事件（`done` / `error`）恰好一个
//! - 每次外部调用返回后检查调用方是否还在、会话是否被结束
//! - 负责沙箱的完整生命周期：任何结束路径都会经过同一个幂等的释放入口
//!
//! ## 清理规则
//!
//! | 结束方式 | 沙箱 |
//! |---|---|
//! | 完成 | 保留 `sandbox_ttl_secs`（`release_on_done` 时立即释放） |
//! | 修复次数用尽 | 保留供排查（调用方已断开时释放） |
//! | 其他错误 / 超时 / 断开 / 取消 | 立即释放 |
//!
//! 超时和断开都只取消会话：已经发出的外部调用自然返回，返回的结果（比如刚创建的沙箱）
//! 交给同一个清理入口。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, StreamError};
use crate::infrastructure::{DisconnectSignal, EventSender, SessionEntry, SessionRegistry};
use crate::models::{CloneRecord, CloneSession, PageContext, Phase, Pricing, ProgressEvent};
use crate::orchestrator::app::Services;
use crate::services::html::landmark_outline;
use crate::utils::logging::{log_clone_complete, log_clone_start};
use crate::workflow::{plan_sections, CloneCtx, DeploymentStage, GenerationStage, SectionPlan};

/// 单次克隆编排器
pub struct CloneOrchestrator {
    config: Arc<Config>,
    services: Services,
    registry: Arc<SessionRegistry>,
    generation: GenerationStage,
    deployment: Option<DeploymentStage>,
}

impl CloneOrchestrator {
    pub fn new(config: Arc<Config>, services: Services, registry: Arc<SessionRegistry>) -> Self {
        let pricing = Pricing {
            input_per_mtok: config.input_cost_per_mtok,
            output_per_mtok: config.output_cost_per_mtok,
        };
        let generation = GenerationStage::new(
            services.generator.clone(),
            pricing,
            config.min_successful_sections,
        );
        let deployment = services.sandbox.clone().map(|provider| {
            DeploymentStage::new(
                provider,
                services.generator.clone(),
                pricing,
                config.max_repair_attempts,
            )
        });

        Self {
            config,
            services,
            registry,
            generation,
            deployment,
        }
    }

    /// 运行一次克隆直到终止
    pub async fn run(self, mut session: CloneSession, entry: Arc<SessionEntry>, mut events: EventSender) {
        let ctx = CloneCtx::new(
            session.id.clone(),
            session.target_url.clone(),
            entry.cancel.clone(),
        );
        log_clone_start(ctx.short_id(), &ctx.target_url);

        // 编排器退出时（包括 panic）停止断开监听
        let finished = CancellationToken::new();
        let _finished_guard = finished.clone().drop_guard();
        if let Some(signal) = events.disconnect_signal() {
            spawn_disconnect_watcher(ctx.to_string(), signal, finished.clone(), entry.clone());
        }

        // 超时只取消会话，进行中的外部调用自然返回后在下一次检查处停下
        let limit = self.config.session_timeout();
        let timed_out = Arc::new(AtomicBool::new(false));
        spawn_deadline_watcher(
            ctx.to_string(),
            limit,
            finished.clone(),
            entry.clone(),
            timed_out.clone(),
        );

        let outcome = match self.drive(&ctx, &mut session, &mut events, &entry).await {
            Err(AppError::Stream(StreamError::Cancelled)) if timed_out.load(Ordering::Acquire) => {
                Err(StreamError::SessionTimeout {
                    secs: limit.as_secs(),
                }
                .into())
            }
            outcome => outcome,
        };

        match outcome {
            Ok(record) => self.finish_success(&ctx, &entry, &record).await,
            Err(err) => {
                self.finish_failure(&ctx, &mut session, &mut events, &entry, err)
                    .await
            }
        }
    }

    /// 按阶段推进，返回已保存的克隆记录
    async fn drive(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        entry: &SessionEntry,
    ) -> AppResult<CloneRecord> {
        // ========== 阶段 1: 抓取 ==========
        events
            .emit(ProgressEvent::phase(
                Phase::Scraping,
                format!("正在抓取 {}", ctx.target_url),
            ))
            .await?;
        events
            .emit(ProgressEvent::scrape_progress("正在打开页面并等待渲染..."))
            .await?;

        info!("{} 🔍 正在抓取页面...", ctx);
        let scrape = self.services.scraper.scrape(&ctx.target_url).await;
        ctx.ensure_live(events)?;
        let scrape = scrape?;

        info!(
            "{} ✓ 抓取完成: 标题 '{}', HTML {} 字符",
            ctx,
            scrape.title,
            scrape.markup.chars().count()
        );
        events
            .emit(ProgressEvent::scrape_progress(format!(
                "已获取页面 HTML（{} 字符）",
                scrape.markup.chars().count()
            )))
            .await?;
        let screenshot_total = scrape.screenshots.len();
        for (i, screenshot) in scrape.screenshots.iter().enumerate() {
            events
                .emit(ProgressEvent::ScreenshotCaptured {
                    message: format!("已截图（{}/{}）", i + 1, screenshot_total),
                    screenshot: screenshot.clone(),
                })
                .await?;
        }

        let outline = landmark_outline(&scrape.markup);
        let context = Arc::new(PageContext::from_scrape(&ctx.target_url, &scrape, outline));
        let plan = plan_sections(
            &scrape.markup,
            self.config.section_threshold_chars,
            self.config.max_sections,
        );

        // ========== 阶段 2: 生成 ==========
        session.advance(Phase::Generating)?;
        let message = match &plan {
            SectionPlan::Single { .. } => "正在生成代码...".to_string(),
            SectionPlan::Sections { tasks } => {
                format!("页面较大，拆分为 {} 个部分并行生成...", tasks.len())
            }
        };
        events
            .emit(ProgressEvent::phase(Phase::Generating, message))
            .await?;
        self.generation
            .run(ctx, session, events, context.clone(), plan)
            .await?;

        // ========== 阶段 3: 部署 ==========
        let (preview_url, files, sandbox_id) = match &self.deployment {
            Some(deployment) => {
                session.advance(Phase::Deploying)?;
                events
                    .emit(ProgressEvent::phase(Phase::Deploying, "正在部署到沙箱..."))
                    .await?;
                let deployed = deployment
                    .run(ctx, session, events, &entry.lease, context)
                    .await?;
                if deployed.repair_attempts > 0 {
                    info!("{} ✓ 经过 {} 次修复后运行正常", ctx, deployed.repair_attempts);
                }
                let sandbox_id = session.sandbox().map(|h| h.id.clone());
                (deployed.preview_url, deployed.files, sandbox_id)
            }
            None => {
                info!("{} 未配置沙箱，使用本地预览", ctx);
                (
                    local_preview_url(&ctx.clone_id),
                    session.files().to_vec(),
                    None,
                )
            }
        };

        // ========== 阶段 4: 完成 ==========
        ctx.ensure_live(events)?;
        let usage = session.usage();
        let mut record = CloneRecord {
            id: ctx.clone_id.clone(),
            url: ctx.target_url.clone(),
            preview_url: Some(preview_url),
            sandbox_id,
            created_at: session.created_at,
            completed_at: Utc::now(),
            usage,
            files,
        };
        self.services.store.save(&record).await?;

        let delivered = match ctx.ensure_live(events) {
            Ok(()) => {
                session.advance(Phase::Done)?;
                events
                    .emit(ProgressEvent::Done {
                        clone_id: record.id.clone(),
                        preview_url: record.preview_url.clone(),
                        usage: record.usage,
                        files: record.files.clone(),
                    })
                    .await
            }
            Err(reason) => Err(reason),
        };
        if let Err(reason) = delivered {
            // 保存期间调用方离开或会话被结束，沙箱随后释放
            self.detach_sandbox(ctx, &mut record).await;
            return Err(reason.into());
        }

        Ok(record)
    }

    /// 已保存的记录不再指向即将释放的沙箱，改为本地预览
    async fn detach_sandbox(&self, ctx: &CloneCtx, record: &mut CloneRecord) {
        if record.sandbox_id.take().is_none() {
            return;
        }
        record.preview_url = Some(local_preview_url(&record.id));
        if let Err(e) = self.services.store.save(record).await {
            warn!("{} ⚠️ 更新克隆记录失败: {}", ctx, e);
        }
    }

    async fn finish_success(&self, ctx: &CloneCtx, entry: &SessionEntry, record: &CloneRecord) {
        log_clone_complete(
            ctx.short_id(),
            record.files.len(),
            record.usage.calls,
            record.usage.estimated_cost_usd,
            record.usage.elapsed_ms,
        );

        if !entry.lease.is_active() {
            self.registry.remove(&ctx.clone_id);
            return;
        }
        if self.config.release_on_done {
            self.registry.end(&ctx.clone_id).await;
        } else {
            info!(
                "{} ⏳ 沙箱保留 {} 秒供预览",
                ctx, self.config.sandbox_ttl_secs
            );
            self.registry
                .keep_alive(&ctx.clone_id, self.config.sandbox_ttl());
        }
    }

    async fn finish_failure(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        entry: &SessionEntry,
        err: AppError,
    ) {
        error!("{} ❌ 克隆失败 (阶段 {}): {}", ctx, session.phase(), err);
        if !session.phase().is_terminal() {
            let _ = session.advance(Phase::Error);
        }

        let disconnected = matches!(err, AppError::Stream(StreamError::Disconnected))
            || (events.is_closed() && !events.is_terminated());

        if err.is_visible() && !disconnected {
            let event = ProgressEvent::error(err.user_message(), err.status_code());
            if let Err(e) = events.emit(event).await {
                warn!("{} 错误事件发送失败: {}", ctx, e);
            }
        }

        if err.keeps_sandbox() && !disconnected && entry.lease.is_active() {
            warn!(
                "{} ⚠️ 沙箱保留 {} 秒以便排查",
                ctx, self.config.sandbox_ttl_secs
            );
            self.registry
                .keep_alive(&ctx.clone_id, self.config.sandbox_ttl());
            return;
        }

        self.registry.remove(&ctx.clone_id);
        entry.cancel.cancel();
        entry.lease.release().await;
    }
}

fn local_preview_url(clone_id: &str) -> String {
    format!("/api/preview/{}", clone_id)
}

/// 会话到达总时长上限时取消它
fn spawn_deadline_watcher(
    label: String,
    limit: Duration,
    finished: CancellationToken,
    entry: Arc<SessionEntry>,
    timed_out: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = finished.cancelled() => {}
            _ = sleep(limit) => {
                warn!("{} ⏰ 会话超过 {} 秒，正在停止", label, limit.as_secs());
                timed_out.store(true, Ordering::Release);
                entry.cancel.cancel();
            }
        }
    });
}

/// 调用方在终止事件之前离开时，立即取消会话并释放沙箱
fn spawn_disconnect_watcher(
    label: String,
    signal: DisconnectSignal,
    finished: CancellationToken,
    entry: Arc<SessionEntry>,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = finished.cancelled() => {}
            _ = signal.disconnected() => {
                warn!("{} 🔌 调用方已断开，停止克隆并释放沙箱", label);
                entry.cancel.cancel();
                entry.lease.release().await;
            }
        }
    });
}
