//! 生成阶段 - 流程层
//!
//! 核心职责：把页面素材变成源文件
//!
//! 流程顺序：
//! 1. 小页面：一次调用生成整页
//! 2. 大页面：分段并发生成（JoinSet），按完成顺序发送事件，全部上报后汇总
//! 3. 分段模式下自动组合页面入口 `app/page.tsx`

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AppResult, GenerationError};
use crate::infrastructure::EventSender;
use crate::models::{
    CloneSession, GeneratedFile, PageContext, Pricing, ProgressEvent, SectionTask, SectionTracker,
};
use crate::services::generator::ENTRY_FILE;
use crate::services::{Generation, GenerationRequest, GenerationTask, Generator};
use crate::workflow::clone_ctx::CloneCtx;
use crate::workflow::section_plan::SectionPlan;

/// 生成阶段
pub struct GenerationStage {
    generator: Arc<dyn Generator>,
    pricing: Pricing,
    min_successful_sections: usize,
}

impl GenerationStage {
    pub fn new(
        generator: Arc<dyn Generator>,
        pricing: Pricing,
        min_successful_sections: usize,
    ) -> Self {
        Self {
            generator,
            pricing,
            min_successful_sections,
        }
    }

    /// 执行生成，结束后冻结会话的文件列表
    pub async fn run(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        context: Arc<PageContext>,
        plan: SectionPlan,
    ) -> AppResult<()> {
        match plan {
            SectionPlan::Single { markup } => {
                self.run_single(ctx, session, events, context, markup)
                    .await?
            }
            SectionPlan::Sections { tasks } => {
                self.run_sections(ctx, session, events, context, tasks)
                    .await?
            }
        }

        session.freeze_files();
        info!("{} ✓ 生成完成，共 {} 个文件", ctx, session.files().len());
        Ok(())
    }

    async fn run_single(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        context: Arc<PageContext>,
        markup: String,
    ) -> AppResult<()> {
        info!("{} 🤖 单次生成整页...", ctx);

        let request = GenerationRequest {
            context,
            task: GenerationTask::Full { markup },
        };
        let result = self.generator.generate(&request).await;
        // 调用自然结束后再检查，取消时结果只用于清理
        ctx.ensure_live(events)?;

        let generation = match result {
            Ok(generation) => generation,
            Err(e) => {
                session
                    .usage_mut()
                    .record_failure(e.billed_usage(), &self.pricing);
                return Err(e.into());
            }
        };
        session
            .usage_mut()
            .record(&generation.usage, &self.pricing);

        let mut components = Vec::new();
        let mut has_entry = false;
        for file in generation.files {
            has_entry |= file.path == ENTRY_FILE;
            if let Some(name) = component_name(&file.path) {
                components.push(name);
            }
            write_file(session, events, file).await?;
        }

        if !has_entry {
            debug!("{} 模型没有返回页面入口，自动组合", ctx);
            let sections = BTreeMap::from([(1, components)]);
            write_file(session, events, compose_entry_page(&sections)).await?;
        }
        Ok(())
    }

    async fn run_sections(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        context: Arc<PageContext>,
        tasks: Vec<SectionTask>,
    ) -> AppResult<()> {
        let total = tasks.len();
        info!("{} 🧩 页面拆分为 {} 个分段并发生成", ctx, total);

        let mut set = JoinSet::new();
        for task in tasks {
            let generator = self.generator.clone();
            let index = task.index;
            let request = GenerationRequest {
                context: context.clone(),
                task: GenerationTask::Section {
                    index: task.index,
                    total: task.total,
                    slice: task.slice,
                },
            };
            set.spawn(async move {
                let result = AssertUnwindSafe(generator.generate(&request))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(GenerationError::Model {
                            message: format!("分段 {} 的生成任务异常退出", index),
                            billed: None,
                        })
                    });
                (index, result)
            });
        }

        let mut tracker = SectionTracker::new(total);
        let mut components: BTreeMap<usize, Vec<String>> = BTreeMap::new();

        loop {
            let joined = tokio::select! {
                biased;
                reason = ctx.stopped(events) => Err(reason),
                joined = set.join_next() => Ok(joined),
            };
            let joined = match joined {
                Ok(joined) => joined,
                Err(reason) => {
                    // 进行中的调用自然结束，结果丢弃
                    set.detach_all();
                    return Err(reason.into());
                }
            };
            let Some(joined) = joined else {
                break;
            };
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("{} ⚠️ 分段任务无法汇合: {}", ctx, e);
                    continue;
                }
            };

            match result {
                Ok(generation) => {
                    let names = self
                        .accept_section(ctx, session, events, index, generation)
                        .await?;
                    tracker.mark_succeeded(index)?;
                    info!(
                        "{} ✓ 分段 {}/{} 完成，组件: {:?}",
                        ctx, index, total, names
                    );
                    events
                        .emit(ProgressEvent::SectionComplete {
                            index,
                            total,
                            components: names.clone(),
                        })
                        .await?;
                    components.insert(index, names);
                }
                Err(e) => {
                    session
                        .usage_mut()
                        .record_failure(e.billed_usage(), &self.pricing);
                    tracker.mark_failed(index)?;
                    warn!("{} ⚠️ 分段 {}/{} 生成失败: {}", ctx, index, total, e);
                }
            }
        }

        for index in tracker.pending() {
            tracker.mark_failed(index)?;
        }

        let required = self.min_successful_sections.max(1);
        if tracker.succeeded() < required {
            return Err(GenerationError::InsufficientSections {
                succeeded: tracker.succeeded(),
                total,
                required,
            }
            .into());
        }
        if !tracker.failed_indices().is_empty() {
            warn!(
                "{} ⚠️ 分段 {:?} 失败，使用其余 {} 个分段继续",
                ctx,
                tracker.failed_indices(),
                tracker.succeeded()
            );
        }

        write_file(session, events, compose_entry_page(&components)).await?;
        Ok(())
    }

    /// 记录一个成功分段的用量和文件，返回该分段的组件名
    async fn accept_section(
        &self,
        ctx: &CloneCtx,
        session: &mut CloneSession,
        events: &mut EventSender,
        index: usize,
        generation: Generation,
    ) -> AppResult<Vec<String>> {
        session
            .usage_mut()
            .record(&generation.usage, &self.pricing);

        let mut names = Vec::new();
        for file in generation.files {
            // 页面入口在所有分段完成后统一组合
            if file.path == ENTRY_FILE {
                debug!("{} 忽略分段 {} 返回的页面入口", ctx, index);
                continue;
            }
            if session.files().iter().any(|f| f.path == file.path) {
                warn!("{} ⚠️ 分段 {} 的文件 {} 与已有文件重名，已忽略", ctx, index, file.path);
                continue;
            }
            if let Some(name) = component_name(&file.path) {
                names.push(name);
            }
            write_file(session, events, file).await?;
        }
        Ok(names)
    }
}

async fn write_file(
    session: &mut CloneSession,
    events: &mut EventSender,
    file: GeneratedFile,
) -> AppResult<()> {
    events
        .emit(ProgressEvent::FileWritten {
            file: file.path.clone(),
            lines: file.lines,
        })
        .await?;
    session.push_file(file)
}

/// `components/` 下直接存放的组件文件名（不含扩展名）
pub fn component_name(path: &str) -> Option<String> {
    let rest = path.strip_prefix("components/")?;
    if rest.contains('/') {
        return None;
    }
    let (stem, ext) = rest.rsplit_once('.')?;
    if stem.is_empty() || !matches!(ext, "tsx" | "jsx") {
        return None;
    }
    Some(stem.to_string())
}

/// 组件名转为合法的 JSX 标识符（首字母大写）
fn component_ident(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            format!("{}{}", first.to_ascii_uppercase(), chars.as_str())
        }
        _ => format!("C{}", cleaned),
    }
}

/// 按分段顺序组合页面入口
pub fn compose_entry_page(sections: &BTreeMap<usize, Vec<String>>) -> GeneratedFile {
    let mut imports = String::new();
    let mut body = String::new();
    let mut used: HashSet<String> = HashSet::new();

    for names in sections.values() {
        for name in names {
            let base = component_ident(name);
            let mut ident = base.clone();
            let mut n = 2;
            while !used.insert(ident.clone()) {
                ident = format!("{}{}", base, n);
                n += 1;
            }
            imports.push_str(&format!(
                "import {} from \"../components/{}\";\n",
                ident, name
            ));
            body.push_str(&format!("      <{} />\n", ident));
        }
    }

    let content = format!(
        "{}\nexport default function Page() {{\n  return (\n    <main className=\"min-h-screen\">\n{}    </main>\n  );\n}}\n",
        imports, body
    );
    GeneratedFile::new(ENTRY_FILE, content)
}
