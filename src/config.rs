use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppResult, ConfigError};

/// 程序配置
///
/// 读取顺序：默认值 → `CLONER_CONFIG` 指向的 TOML 文件 → 环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP 监听地址
    pub bind_addr: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,
    /// 每百万输入 token 的价格（美元）
    pub input_cost_per_mtok: f64,
    /// 每百万输出 token 的价格（美元）
    pub output_cost_per_mtok: f64,
    // --- 抓取配置 ---
    pub scrape_timeout_secs: u64,
    /// 浏览器可执行文件路径，不设置时由 chromiumoxide 自动查找
    pub browser_executable: Option<String>,
    /// 已运行浏览器的调试端口，设置后连接该浏览器而不是启动新的
    pub browser_debug_port: Option<u16>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// 发送给模型的 HTML 最大字符数
    pub max_markup_chars: usize,
    /// 截图宽高上限，超过时等比缩小
    pub max_screenshot_dim: u32,
    // --- 分段生成 ---
    /// 超过该长度的页面会被拆分为多个分段并发生成
    pub section_threshold_chars: usize,
    pub max_sections: usize,
    /// 至少成功的分段数量，低于该值视为生成失败
    pub min_successful_sections: usize,
    // --- 沙箱配置 ---
    /// 为空时不创建沙箱，使用本地预览
    pub sandbox_api_key: String,
    pub sandbox_api_url: String,
    pub sandbox_template_dir: String,
    pub sandbox_port: u16,
    pub max_repair_attempts: u32,
    /// 沙箱在完成后保留的时长
    pub sandbox_ttl_secs: u64,
    pub readiness_poll_attempts: u32,
    /// 完成后立即释放沙箱
    pub release_on_done: bool,
    // --- 事件流 ---
    pub session_timeout_secs: u64,
    pub stall_timeout_secs: u64,
    pub event_buffer: usize,
    // --- 存储 ---
    pub store_dir: String,
    // --- 访问控制 ---
    pub daily_clone_limit: u64,
    pub access_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://openrouter.ai/api/v1".to_string(),
            llm_model_name: "anthropic/claude-sonnet-4".to_string(),
            llm_max_tokens: 64000,
            llm_temperature: 0.0,
            input_cost_per_mtok: 3.0,
            output_cost_per_mtok: 15.0,
            scrape_timeout_secs: 60,
            browser_executable: None,
            browser_debug_port: None,
            viewport_width: 1280,
            viewport_height: 720,
            max_markup_chars: 100_000,
            max_screenshot_dim: 7000,
            section_threshold_chars: 40_000,
            max_sections: 4,
            min_successful_sections: 1,
            sandbox_api_key: String::new(),
            sandbox_api_url: "https://app.daytona.io/api".to_string(),
            sandbox_template_dir: "templates/nextjs".to_string(),
            sandbox_port: 3000,
            max_repair_attempts: 2,
            sandbox_ttl_secs: 30 * 60,
            readiness_poll_attempts: 25,
            release_on_done: false,
            session_timeout_secs: 15 * 60,
            stall_timeout_secs: 5 * 60,
            event_buffer: 64,
            store_dir: "clones".to_string(),
            daily_clone_limit: 100,
            access_token: None,
        }
    }
}

impl Config {
    /// 从环境变量读取配置，未设置的字段使用默认值
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 读取 `CLONER_CONFIG` 指向的 TOML 文件（如果有），再叠加环境变量
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var("CLONER_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_env_overrides())
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileParseFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            ConfigError::FileParseFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn with_env_overrides(self) -> Self {
        Self {
            bind_addr: env_or("BIND_ADDR", self.bind_addr),
            llm_api_key: env_or("LLM_API_KEY", self.llm_api_key),
            llm_api_base_url: env_or("LLM_API_BASE_URL", self.llm_api_base_url),
            llm_model_name: env_or("LLM_MODEL_NAME", self.llm_model_name),
            llm_max_tokens: env_parse_or("LLM_MAX_TOKENS", self.llm_max_tokens),
            llm_temperature: env_parse_or("LLM_TEMPERATURE", self.llm_temperature),
            input_cost_per_mtok: env_parse_or("INPUT_COST_PER_MTOK", self.input_cost_per_mtok),
            output_cost_per_mtok: env_parse_or("OUTPUT_COST_PER_MTOK", self.output_cost_per_mtok),
            scrape_timeout_secs: env_parse_or("SCRAPE_TIMEOUT_SECS", self.scrape_timeout_secs),
            browser_executable: std::env::var("BROWSER_EXECUTABLE")
                .ok()
                .or(self.browser_executable),
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(self.browser_debug_port),
            viewport_width: env_parse_or("VIEWPORT_WIDTH", self.viewport_width),
            viewport_height: env_parse_or("VIEWPORT_HEIGHT", self.viewport_height),
            max_markup_chars: env_parse_or("MAX_MARKUP_CHARS", self.max_markup_chars),
            max_screenshot_dim: env_parse_or("MAX_SCREENSHOT_DIM", self.max_screenshot_dim),
            section_threshold_chars: env_parse_or(
                "SECTION_THRESHOLD_CHARS",
                self.section_threshold_chars,
            ),
            max_sections: env_parse_or("MAX_SECTIONS", self.max_sections),
            min_successful_sections: env_parse_or(
                "MIN_SUCCESSFUL_SECTIONS",
                self.min_successful_sections,
            ),
            sandbox_api_key: env_or("SANDBOX_API_KEY", self.sandbox_api_key),
            sandbox_api_url: env_or("SANDBOX_API_URL", self.sandbox_api_url),
            sandbox_template_dir: env_or("SANDBOX_TEMPLATE_DIR", self.sandbox_template_dir),
            sandbox_port: env_parse_or("SANDBOX_PORT", self.sandbox_port),
            max_repair_attempts: env_parse_or("MAX_REPAIR_ATTEMPTS", self.max_repair_attempts),
            sandbox_ttl_secs: env_parse_or("SANDBOX_TTL_SECS", self.sandbox_ttl_secs),
            readiness_poll_attempts: env_parse_or(
                "READINESS_POLL_ATTEMPTS",
                self.readiness_poll_attempts,
            ),
            release_on_done: env_parse_or("RELEASE_ON_DONE", self.release_on_done),
            session_timeout_secs: env_parse_or("SESSION_TIMEOUT_SECS", self.session_timeout_secs),
            stall_timeout_secs: env_parse_or("STALL_TIMEOUT_SECS", self.stall_timeout_secs),
            event_buffer: env_parse_or("EVENT_BUFFER", self.event_buffer),
            store_dir: env_or("STORE_DIR", self.store_dir),
            daily_clone_limit: env_parse_or("DAILY_CLONE_LIMIT", self.daily_clone_limit),
            access_token: std::env::var("ACCESS_TOKEN").ok().or(self.access_token),
        }
    }

    /// 是否配置了沙箱服务
    pub fn sandbox_enabled(&self) -> bool {
        !self.sandbox_api_key.is_empty()
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn sandbox_ttl(&self) -> Duration {
        Duration::from_secs(self.sandbox_ttl_secs)
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
