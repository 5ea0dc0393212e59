//! 部署阶段 - 流程层
//!
//! 核心职责：把生成的文件放进沙箱并让它跑起来
//!
//! 流程顺序：
//! 1. 创建沙箱 → 立即登记到租约和会话
//! 2. 拿到预览地址 → `sandbox_ready`
//! 3. 逐个上传文件 → `file_upload`
//! 4. 检查运行状态，出错时进入有限次数的自动修复（`fixing`）

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AppResult, DeploymentError, StreamError};
use crate::infrastructure::{EventSender, SandboxLease};
use crate::models::{
    CloneSession, GeneratedFile, PageContext, Phase, Pricing, ProgressEvent, SandboxHandle,
};
use crate::services::generator::ENTRY_FILE;
use crate::services::{GenerationRequest, GenerationTask, Generator, HealthReport, SandboxProvider};
use crate::utils::logging::truncate_text;
use crate::workflow::clone_ctx::CloneCtx;

/// 部署结果
#[derive(Debug, Clone)]
pub struct Deployment {
    pub preview_url: String,
    /// 沙箱中实际运行的文件（包含修复后的版本）
    pub files: Vec<GeneratedFile>,
    pub repair_attempts: u32,
}

/// 部署阶段
pub struct DeploymentStage {
    provider: Arc<dyn SandboxProvider>,
    generator: Arc<dyn Generator>,
    pricing: Pricing,
    max_repair_attempts: u32,
}

impl DeploymentStage {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        generator: Arc<dyn Generator>,
        pricing: Pricing,
        max_repair_attempts: u32,
    ) -> Self {
        Self {
            provider,
            generator,
            pricing,
            max_repair_attempts,
        }
    }

    pub async fn run(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        lease: &SandboxLease,
        context: Arc<PageContext>,
    ) -> AppResult<Deployment> {
        info!("{} 📦 正在创建沙箱...", ctx);
        let handle = self.provider.provision().await?;

        // 先登记再检查，保证任何清理路径都能释放它
        if !lease.activate(handle.clone()).await {
            let reason = ctx.ensure_live(events).err().unwrap_or(StreamError::Cancelled);
            return Err(reason.into());
        }
        session.set_sandbox(handle.clone());
        info!("{} ✓ 沙箱已创建: {}", ctx, handle.id);
        ctx.ensure_live(events)?;

        let preview_url = self.provider.preview_url(&handle).await?;
        ctx.ensure_live(events)?;
        info!("{} 🌐 预览地址: {}", ctx, preview_url);
        events
            .emit(ProgressEvent::SandboxReady {
                preview_url: preview_url.clone(),
            })
            .await?;

        let mut deployed: Vec<GeneratedFile> = session.files().to_vec();
        for file in &deployed {
            self.upload(ctx, events, &handle, file).await?;
        }
        info!("{} ✓ 已上传 {} 个文件", ctx, deployed.len());

        let repair_attempts = self
            .check_and_repair(ctx, session, events, &handle, context, &mut deployed)
            .await?;

        Ok(Deployment {
            preview_url,
            files: deployed,
            repair_attempts,
        })
    }

    async fn upload(
        &self,
        ctx: &CloneCtx,
        events: &mut EventSender,
        handle: &SandboxHandle,
        file: &GeneratedFile,
    ) -> AppResult<()> {
        self.provider.upload(handle, file).await?;
        ctx.ensure_live(events)?;
        events
            .emit(ProgressEvent::FileUploaded {
                file: file.path.clone(),
                message: format!("已上传 {} ({} 行)", file.path, file.lines),
            })
            .await?;
        Ok(())
    }

    /// 检查运行状态，出错时修复并重新上传，直到正常或次数用尽
    async fn check_and_repair(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        handle: &SandboxHandle,
        context: Arc<PageContext>,
        deployed: &mut Vec<GeneratedFile>,
    ) -> AppResult<u32> {
        let mut attempts: u32 = 0;

        loop {
            let report = self.provider.check(handle).await?;
            ctx.ensure_live(events)?;

            let (file, error) = match report {
                HealthReport::Healthy => {
                    info!("{} ✅ 沙箱运行正常", ctx);
                    return Ok(attempts);
                }
                HealthReport::Failing { file, error } => (file, error),
            };

            warn!(
                "{} ⚠️ 沙箱报错 ({}): {}",
                ctx,
                file.as_deref().unwrap_or("未知文件"),
                truncate_text(&error, 200)
            );

            if attempts >= self.max_repair_attempts {
                return Err(DeploymentError::RepairExhausted { attempts, error }.into());
            }
            attempts += 1;

            session.advance(Phase::Fixing)?;
            events
                .emit(ProgressEvent::Fixing {
                    attempt: attempts,
                    max_attempts: self.max_repair_attempts,
                    file: file.clone(),
                    message: format!(
                        "正在自动修复（第 {}/{} 次）",
                        attempts, self.max_repair_attempts
                    ),
                })
                .await?;

            let target = repair_target(deployed, file.as_deref());
            let request = GenerationRequest {
                context: context.clone(),
                task: GenerationTask::Repair {
                    path: target.path.clone(),
                    content: target.content.clone(),
                    error: error.clone(),
                },
            };

            let result = self.generator.generate(&request).await;
            ctx.ensure_live(events)?;

            match result {
                Ok(generation) => {
                    session
                        .usage_mut()
                        .record(&generation.usage, &self.pricing);
                    for fixed in generation.files {
                        self.upload(ctx, events, handle, &fixed).await?;
                        replace_file(deployed, fixed);
                    }
                }
                Err(e) => {
                    // 修复调用失败也算一次尝试
                    session
                        .usage_mut()
                        .record_failure(e.billed_usage(), &self.pricing);
                    warn!("{} ⚠️ 第 {} 次修复调用失败: {}", ctx, attempts, e);
                }
            }

            session.advance(Phase::Deploying)?;
        }
    }
}

/// 选出要修复的文件：报错里识别出的文件，否则页面入口，否则第一个文件
fn repair_target(deployed: &[GeneratedFile], file: Option<&str>) -> GeneratedFile {
    file.and_then(|path| deployed.iter().find(|f| f.path == path))
        .or_else(|| deployed.iter().find(|f| f.path == ENTRY_FILE))
        .or_else(|| deployed.first())
        .cloned()
        .unwrap_or_else(|| GeneratedFile::new(file.unwrap_or(ENTRY_FILE), ""))
}

fn replace_file(files: &mut Vec<GeneratedFile>, file: GeneratedFile) {
    match files.iter_mut().find(|f| f.path == file.path) {
        Some(existing) => *existing = file,
        None => files.push(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_target_prefers_reported_file() {
        let files = vec![
            GeneratedFile::new("components/S1Hero.tsx", "hero"),
            GeneratedFile::new(ENTRY_FILE, "page"),
        ];
        assert_eq!(
            repair_target(&files, Some("components/S1Hero.tsx")).content,
            "hero"
        );
        assert_eq!(repair_target(&files, Some("missing.tsx")).path, ENTRY_FILE);
        assert_eq!(repair_target(&files, None).path, ENTRY_FILE);
        assert_eq!(repair_target(&[], Some("x.tsx")).path, "x.tsx");
    }

    #[test]
    fn test_replace_file_keeps_order() {
        let mut files = vec![
            GeneratedFile::new("a.tsx", "1"),
            GeneratedFile::new("b.tsx", "1"),
        ];
        replace_file(&mut files, GeneratedFile::new("a.tsx", "2"));
        replace_file(&mut files, GeneratedFile::new("c.tsx", "3"));

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.tsx", "b.tsx", "c.tsx"]);
        assert_eq!(files[0].content, "2");
    }
}
