//! 代码生成服务 - 业务能力层
//!
//! 只负责"页面素材 → 源文件"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型（默认 OpenRouter）
//! - 截图以 data URL 的形式随用户消息一起发送（Vision API）
//!
//! ## 输出格式
//!
//! 模型按如下格式返回多个文件：
//!
//! ```text
//! === FILE: components/S1Hero.tsx ===
//! export default function S1Hero() { ... }
//! === FILE: app/page.tsx ===
//! ...
//! ```

use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::GenerationError;
use crate::models::{CallUsage, GeneratedFile, PageContext};
use crate::utils::logging::truncate_text;

/// 整页生成时的入口文件
pub const ENTRY_FILE: &str = "app/page.tsx";

const FILE_MARKER_PREFIX: &str = "=== FILE:";
const FILE_MARKER_SUFFIX: &str = "===";

/// 一次生成调用要做的事
#[derive(Debug, Clone)]
pub enum GenerationTask {
    /// 小页面：一次调用生成整页
    Full { markup: String },
    /// 大页面的第 `index`/`total` 个分段
    Section {
        index: usize,
        total: usize,
        slice: String,
    },
    /// 根据沙箱报错修复一个文件
    Repair {
        path: String,
        content: String,
        error: String,
    },
}

/// 生成请求
///
/// 所有分段共享同一份 [`PageContext`]
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub context: Arc<PageContext>,
    pub task: GenerationTask,
}

/// 一次成功调用的结果
#[derive(Debug, Clone)]
pub struct Generation {
    pub files: Vec<GeneratedFile>,
    pub usage: CallUsage,
}

/// 代码生成能力
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

/// 基于 OpenAI 兼容接口的生成服务
pub struct LlmGenerator {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmGenerator {
    /// 创建新的生成服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            max_tokens: config.llm_max_tokens,
            temperature: config.llm_temperature,
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息
    /// - `imgs`: 图片 URL 列表（可以是 data URL），会追加到用户消息中
    ///
    /// # 返回
    /// 返回 LLM 的响应内容和本次调用的 token 用量
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: &str,
        imgs: &[String],
    ) -> Result<(String, CallUsage), GenerationError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!(
            "用户消息长度: {} 字符, 包含 {} 张图片",
            user_message.len(),
            imgs.len()
        );

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(model_error)?;

        // 构建用户消息内容（支持图片）
        let user_msg = if imgs.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(model_error)?
        } else {
            let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();

            content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: user_message.to_string(),
                },
            ));

            for url in imgs {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::High),
                        },
                    },
                ));
            }

            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(
                    content_parts,
                ))
                .build()
                .map_err(model_error)?
        };

        let messages = vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(model_error)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_api_error(&e.to_string())
        })?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| CallUsage {
                input_tokens: u.prompt_tokens as u64,
                output_tokens: u.completion_tokens as u64,
            })
            .unwrap_or_default();

        debug!(
            "LLM API 调用成功 (输入 {} / 输出 {} tokens)",
            usage.input_tokens, usage.output_tokens
        );

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok((content, usage))
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let (user_message, system_message) = build_messages(request);

        // 修复调用只需要报错和源码，不带截图
        let imgs: Vec<String> = match request.task {
            GenerationTask::Repair { .. } => Vec::new(),
            _ => request
                .context
                .screenshots
                .iter()
                .map(|s| format!("data:image/png;base64,{}", s))
                .collect(),
        };

        let (content, usage) = self
            .send_to_llm(&user_message, &system_message, &imgs)
            .await?;

        let default_path = match &request.task {
            GenerationTask::Full { .. } => Some(ENTRY_FILE),
            GenerationTask::Repair { path, .. } => Some(path.as_str()),
            GenerationTask::Section { .. } => None,
        };

        let files = parse_generated_files(&content, default_path);
        if files.is_empty() {
            warn!(
                "模型没有返回可解析的文件，响应预览: {}",
                truncate_text(&content, 200)
            );
            return Err(GenerationError::EmptyOutput {
                billed: Some(usage),
            });
        }

        Ok(Generation { files, usage })
    }
}

const SYSTEM_PROMPT: &str = "你是一名网站克隆专家。根据网站截图和 HTML 源码，使用 Next.js (App Router) + React + Tailwind CSS 生成视觉上尽可能一致的页面。

规则：
1. 只输出源文件，不要解释
2. 每个文件以单独一行 `=== FILE: <相对路径> ===` 开头，后面紧跟文件内容
3. 使用 TypeScript (.tsx)，组件使用默认导出，组件名与文件名一致
4. 使用 Tailwind CSS 类名；Tailwind 无法表达的样式写在组件内的 style 中
5. 图片优先使用原网站的图片地址，没有时使用 https://placehold.co 占位图
6. 页面需要响应式布局，保留原页面的结构和视觉层级
7. 使用语义化 HTML 元素";

/// 构建生成消息
///
/// 返回 (user_message, system_message)
fn build_messages(request: &GenerationRequest) -> (String, String) {
    let context = page_context_block(&request.context);

    let user_message = match &request.task {
        GenerationTask::Full { markup } => format!(
            "克隆这个网站: {}\n\n{}\n\n请生成 `app/page.tsx` 作为页面入口，把页面拆分为若干组件放在 `components/` 下。\n\n源码 HTML:\n\n{}",
            request.context.url, context, markup
        ),
        GenerationTask::Section {
            index,
            total,
            slice,
        } => format!(
            "克隆这个网站: {url}\n\n{context}\n\n页面被拆分为 {total} 个部分并行生成，你负责第 {index} 部分。\n\
             要求：\n\
             - 只为这一部分生成组件，每个顶层区块一个文件，直接放在 `components/` 下\n\
             - 文件名必须以 `S{index}` 开头，例如 `components/S{index}Hero.tsx`\n\
             - 辅助组件放在 `components/s{index}/` 目录下\n\
             - 不要生成 `app/page.tsx`，页面入口会自动组合所有部分\n\n\
             这一部分的 HTML:\n\n{slice}",
            url = request.context.url,
            context = context,
            total = total,
            index = index,
            slice = slice
        ),
        GenerationTask::Repair {
            path,
            content,
            error,
        } => format!(
            "下面的文件在 Next.js 开发服务器中报错，请修复。\n\n报错信息:\n{}\n\n文件 `{}`:\n\n{}\n\n\
             只返回修复后的文件（可以同时返回需要新增的文件），保持 `=== FILE: <路径> ===` 格式。",
            error, path, content
        ),
    };

    (user_message, SYSTEM_PROMPT.to_string())
}

/// 所有调用共享的页面信息
fn page_context_block(context: &PageContext) -> String {
    let mut block = String::new();
    block.push_str(&format!("页面标题: {}\n", context.title));
    if !context.description.is_empty() {
        block.push_str(&format!("页面描述: {}\n", context.description));
    }
    if !context.outline.is_empty() {
        block.push_str(&format!("页面整体结构: {}\n", context.outline.join(" → ")));
    }
    if !context.image_urls.is_empty() {
        let images: Vec<&str> = context
            .image_urls
            .iter()
            .take(30)
            .map(String::as_str)
            .collect();
        block.push_str(&format!("页面图片:\n{}\n", images.join("\n")));
    }
    if !context.css.is_empty() {
        block.push_str(&format!(
            "页面内联样式:\n{}\n",
            truncate_text(&context.css, 20_000)
        ));
    }
    block
}

/// 去掉模型输出外层的 Markdown 代码块
pub fn strip_code_fences(content: &str) -> String {
    let mut content = content.trim();
    if content.starts_with("```") {
        content = match content.find('\n') {
            Some(idx) => &content[idx + 1..],
            None => "",
        };
    }
    if let Some(stripped) = content.trim_end().strip_suffix("```") {
        content = stripped;
    }
    content.trim().to_string()
}

/// 解析模型输出中的文件
///
/// 没有 `=== FILE: ... ===` 标记时，整段输出作为 `default_path` 的内容；
/// 同一路径出现多次时以最后一次为准
pub fn parse_generated_files(raw: &str, default_path: Option<&str>) -> Vec<GeneratedFile> {
    let mut blocks: Vec<(String, Vec<&str>)> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if let Some(path) = parse_file_marker(line) {
            blocks.push((path, Vec::new()));
            continue;
        }
        match blocks.last_mut() {
            Some((_, lines)) => lines.push(line),
            None => preamble.push(line),
        }
    }

    if blocks.is_empty() {
        let content = strip_code_fences(&preamble.join("\n"));
        return match default_path {
            Some(path) if !content.is_empty() => vec![GeneratedFile::new(path, content)],
            _ => Vec::new(),
        };
    }

    let mut files: Vec<GeneratedFile> = Vec::new();
    for (path, lines) in blocks {
        let Some(path) = normalize_file_path(&path) else {
            warn!("忽略不安全的文件路径: {}", path);
            continue;
        };
        let content = strip_code_fences(&lines.join("\n"));
        if content.is_empty() {
            continue;
        }
        files.retain(|f| f.path != path);
        files.push(GeneratedFile::new(path, content));
    }
    files
}

fn parse_file_marker(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(FILE_MARKER_PREFIX)?;
    let path = rest.trim().strip_suffix(FILE_MARKER_SUFFIX)?.trim();
    if path.is_empty() {
        return None;
    }
    Some(path.trim_matches('`').to_string())
}

/// 统一为项目内相对路径，拒绝跳出项目目录的路径
fn normalize_file_path(path: &str) -> Option<String> {
    let path = path.trim().trim_start_matches("./").trim_start_matches('/');
    if path.is_empty() || path.split('/').any(|part| part == "..") {
        return None;
    }
    Some(path.to_string())
}

fn model_error(err: impl std::fmt::Display) -> GenerationError {
    GenerationError::Model {
        message: err.to_string(),
        billed: None,
    }
}

/// 区分频率限制和其他调用失败
fn classify_api_error(message: &str) -> GenerationError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        GenerationError::RateLimited { retry_after: None }
    } else {
        GenerationError::Model {
            message: message.to_string(),
            billed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```tsx\nconst a = 1;\n```"), "const a = 1;");
        assert_eq!(strip_code_fences("```\n<div/>\n```\n"), "<div/>");
        assert_eq!(strip_code_fences("plain"), "plain");
    }

    #[test]
    fn test_parse_multiple_files() {
        let raw = "好的，以下是文件：\n=== FILE: components/S1Hero.tsx ===\n```tsx\nexport default function S1Hero() {\n  return <div />;\n}\n```\n=== FILE: ./app/globals.css ===\nbody { margin: 0; }\n";
        let files = parse_generated_files(raw, None);

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "components/S1Hero.tsx");
        assert_eq!(files[0].lines, 3);
        assert!(!files[0].content.contains("```"));
        assert_eq!(files[1].path, "app/globals.css");
        assert_eq!(files[1].content, "body { margin: 0; }");
    }

    #[test]
    fn test_parse_without_markers_uses_default_path() {
        let files = parse_generated_files("```tsx\nexport default 1\n```", Some(ENTRY_FILE));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, ENTRY_FILE);

        assert!(parse_generated_files("no markers", None).is_empty());
        assert!(parse_generated_files("   ", Some(ENTRY_FILE)).is_empty());
    }

    #[test]
    fn test_parse_rejects_escaping_paths_and_keeps_last_duplicate() {
        let raw = "=== FILE: ../etc/passwd ===\nroot\n=== FILE: a.tsx ===\none\n=== FILE: a.tsx ===\ntwo\n";
        let files = parse_generated_files(raw, None);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "two");
    }

    #[test]
    fn test_classify_rate_limit() {
        assert!(matches!(
            classify_api_error("HTTP status 429 Too Many Requests"),
            GenerationError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_api_error("invalid api key"),
            GenerationError::Model { .. }
        ));
    }

    #[test]
    fn test_section_prompt_mentions_index() {
        let request = GenerationRequest {
            context: Arc::new(PageContext {
                url: "https://example.com".to_string(),
                title: "Example".to_string(),
                outline: vec!["header".to_string(), "footer".to_string()],
                ..PageContext::default()
            }),
            task: GenerationTask::Section {
                index: 2,
                total: 3,
                slice: "<footer></footer>".to_string(),
            },
        };
        let (user, system) = build_messages(&request);
        assert!(user.contains("第 2 部分"));
        assert!(user.contains("S2"));
        assert!(user.contains("header → footer"));
        assert!(system.contains("=== FILE:"));
    }

    /// 测试真实模型调用
    ///
    /// 运行方式：
    /// ```bash
    /// LLM_API_KEY=... cargo test test_generate_real -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_generate_real() {
        let _ = tracing_subscriber::fmt::try_init();

        let generator = LlmGenerator::new(&Config::from_env());
        let request = GenerationRequest {
            context: Arc::new(PageContext {
                url: "https://example.com".to_string(),
                title: "Example Domain".to_string(),
                ..PageContext::default()
            }),
            task: GenerationTask::Full {
                markup: "<h1>Example Domain</h1><p>This domain is for examples.</p>".to_string(),
            },
        };

        let generation = generator.generate(&request).await.unwrap();
        println!("生成 {} 个文件", generation.files.len());
        assert!(!generation.files.is_empty());
        assert!(generation.usage.output_tokens > 0);
    }
}
