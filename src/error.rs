use std::fmt;

use thiserror::Error;

use crate::models::CallUsage;

/// 应用程序错误类型
///
/// 每个变体对应一类失败，决定了：
/// - 是否向仍在线的调用方发送 `error` 事件（见 [`AppError::is_visible`]）
/// - 对应的 HTTP 状态码（见 [`AppError::status_code`]）
/// - 沙箱是否保留以便排查（见 [`AppError::keeps_sandbox`]）
#[derive(Debug)]
pub enum AppError {
    /// 输入的网址无效
    InvalidUrl { input: String, reason: String },
    /// 抓取阶段错误
    Scrape(ScrapeError),
    /// 代码生成阶段错误
    Generation(GenerationError),
    /// 部署阶段错误
    Deployment(DeploymentError),
    /// 事件流错误（断开、停滞、超时）
    Stream(StreamError),
    /// 鉴权 / 配额错误
    Auth(AuthError),
    /// 存储错误
    Store(StoreError),
    /// 配置错误
    Config(ConfigError),
    /// 资源不存在
    NotFound { what: String },
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidUrl { input, reason } => {
                write!(f, "网址无效 ({}): {}", input, reason)
            }
            AppError::Scrape(e) => write!(f, "抓取错误: {}", e),
            AppError::Generation(e) => write!(f, "生成错误: {}", e),
            AppError::Deployment(e) => write!(f, "部署错误: {}", e),
            AppError::Stream(e) => write!(f, "事件流错误: {}", e),
            AppError::Auth(e) => write!(f, "鉴权错误: {}", e),
            AppError::Store(e) => write!(f, "存储错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::NotFound { what } => write!(f, "未找到: {}", what),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Scrape(e) => Some(e),
            AppError::Generation(e) => Some(e),
            AppError::Deployment(e) => Some(e),
            AppError::Stream(e) => Some(e),
            AppError::Auth(e) => Some(e),
            AppError::Store(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::InvalidUrl { .. } | AppError::NotFound { .. } | AppError::Other(_) => None,
        }
    }
}

/// 抓取错误
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("无法访问 {url}: {message}")]
    Network { url: String, message: String },
    #[error("抓取 {url} 超时 ({secs} 秒)")]
    Timeout { url: String, secs: u64 },
    #[error("目标网站拒绝访问 {url}: {reason}")]
    Blocked { url: String, reason: String },
    #[error("浏览器错误: {message}")]
    Browser { message: String },
}

/// 代码生成错误
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("模型调用失败: {message}")]
    Model {
        message: String,
        billed: Option<CallUsage>,
    },
    #[error("模型请求频率限制, 建议等待: {retry_after:?}秒")]
    RateLimited { retry_after: Option<u64> },
    #[error("模型没有返回任何文件")]
    EmptyOutput { billed: Option<CallUsage> },
    #[error("分段生成成功 {succeeded}/{total}，低于要求的 {required} 段")]
    InsufficientSections {
        succeeded: usize,
        total: usize,
        required: usize,
    },
}

impl GenerationError {
    /// 失败调用已经计费的用量（如果供应商报告了）
    pub fn billed_usage(&self) -> Option<CallUsage> {
        match self {
            GenerationError::Model { billed, .. } | GenerationError::EmptyOutput { billed } => {
                *billed
            }
            _ => None,
        }
    }
}

/// 部署错误
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("沙箱创建失败: {message}")]
    Provision { message: String },
    #[error("上传 {path} 失败: {message}")]
    Upload { path: String, message: String },
    #[error("沙箱操作失败: {message}")]
    Sandbox { message: String },
    #[error("自动修复 {attempts} 次后仍然报错: {error}")]
    RepairExhausted { attempts: u32, error: String },
}

/// 事件流错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("调用方已断开连接")]
    Disconnected,
    #[error("会话已被取消")]
    Cancelled,
    #[error("{secs} 秒内没有新的事件")]
    StallTimeout { secs: u64 },
    #[error("会话超过 {secs} 秒上限")]
    SessionTimeout { secs: u64 },
    #[error("会话已经发送过终止事件")]
    AlreadyTerminated,
}

/// 鉴权 / 配额错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("今日克隆次数已达上限 ({limit})")]
    QuotaExceeded { limit: u64 },
    #[error("凭证无效")]
    InvalidCredential,
    #[error("缺少凭证")]
    MissingCredential,
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("读写 {path} 失败: {message}")]
    Io { path: String, message: String },
    #[error("记录序列化失败: {message}")]
    Serialize { message: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件解析失败
    #[error("配置文件 {path} 解析失败: {message}")]
    FileParseFailed { path: String, message: String },
}

impl AppError {
    /// HTTP 状态码映射
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidUrl { .. } => 400,
            AppError::Auth(AuthError::QuotaExceeded { .. }) => 429,
            AppError::Auth(_) => 401,
            AppError::Generation(GenerationError::RateLimited { .. }) => 429,
            AppError::NotFound { .. } => 404,
            AppError::Scrape(ScrapeError::Timeout { .. }) => 504,
            AppError::Stream(StreamError::StallTimeout { .. })
            | AppError::Stream(StreamError::SessionTimeout { .. }) => 504,
            AppError::Scrape(_) | AppError::Generation(_) | AppError::Deployment(_) => 502,
            _ => 500,
        }
    }

    /// 转发给调用方的提示文本，不包含内部细节
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidUrl { input, .. } => {
                format!("网址 '{}' 无效，请输入类似 example.com 的网址", input)
            }
            AppError::Scrape(ScrapeError::Timeout { secs, .. }) => {
                format!("抓取目标网站超时（{} 秒），请稍后重试或确认网址可以访问", secs)
            }
            AppError::Scrape(ScrapeError::Blocked { .. }) => {
                "目标网站拒绝了抓取请求，请换一个网址试试".to_string()
            }
            AppError::Scrape(_) => "无法抓取目标网站，请确认网址可以访问后重试".to_string(),
            AppError::Generation(GenerationError::RateLimited { .. }) => {
                "模型服务繁忙，请稍后重试".to_string()
            }
            AppError::Generation(GenerationError::InsufficientSections { .. }) => {
                "页面的各个部分都没能生成成功，请稍后重试".to_string()
            }
            AppError::Generation(_) => "代码生成失败，请稍后重试".to_string(),
            AppError::Deployment(DeploymentError::RepairExhausted { attempts, .. }) => format!(
                "生成的代码在沙箱中运行出错，自动修复 {} 次仍未成功；沙箱已保留以便查看",
                attempts
            ),
            AppError::Deployment(_) => "沙箱部署失败，请稍后重试".to_string(),
            AppError::Stream(StreamError::StallTimeout { .. })
            | AppError::Stream(StreamError::SessionTimeout { .. }) => {
                "克隆超时，请稍后重试".to_string()
            }
            AppError::Stream(StreamError::Cancelled) => "克隆已被取消".to_string(),
            AppError::Stream(_) => "会话已结束".to_string(),
            AppError::Auth(AuthError::QuotaExceeded { limit }) => {
                format!("今日克隆次数已用完（上限 {} 次），请明天再试", limit)
            }
            AppError::Auth(_) => "请先登录后再试".to_string(),
            AppError::NotFound { what } => format!("未找到 {}", what),
            AppError::Store(_) | AppError::Config(_) | AppError::Other(_) => {
                "服务器内部错误，请稍后重试".to_string()
            }
        }
    }

    /// 调用方已经不在，不应再发送可见的错误事件
    pub fn is_visible(&self) -> bool {
        !matches!(self, AppError::Stream(StreamError::Disconnected))
    }

    /// 修复次数用尽时保留沙箱供排查
    pub fn keeps_sandbox(&self) -> bool {
        matches!(
            self,
            AppError::Deployment(DeploymentError::RepairExhausted { .. })
        )
    }
}

// ========== 从常见错误类型转换 ==========

impl From<ScrapeError> for AppError {
    fn from(err: ScrapeError) -> Self {
        AppError::Scrape(err)
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        AppError::Generation(err)
    }
}

impl From<DeploymentError> for AppError {
    fn from(err: DeploymentError) -> Self {
        AppError::Deployment(err)
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError::Stream(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Store(StoreError::Serialize {
            message: err.to_string(),
        })
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::FileParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Store(StoreError::Io {
            path: String::new(),
            message: err.to_string(),
        })
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Other(format!("HTTP 请求失败: {}", err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let invalid = AppError::InvalidUrl {
            input: "::".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(invalid.status_code(), 400);
        assert_eq!(
            AppError::Auth(AuthError::QuotaExceeded { limit: 5 }).status_code(),
            429
        );
        assert_eq!(
            AppError::Generation(GenerationError::RateLimited { retry_after: None }).status_code(),
            429
        );
        assert_eq!(
            AppError::Scrape(ScrapeError::Network {
                url: "https://a.test".to_string(),
                message: "refused".to_string(),
            })
            .status_code(),
            502
        );
        assert_eq!(AppError::Other("x".to_string()).status_code(), 500);
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = AppError::Scrape(ScrapeError::Timeout {
            url: "https://a.test".to_string(),
            secs: 60,
        });
        assert!(err.user_message().contains("超时"));
        assert!(!err.user_message().contains("https://a.test"));
    }

    #[test]
    fn test_stream_failures_are_invisible() {
        assert!(!AppError::Stream(StreamError::Disconnected).is_visible());
        assert!(AppError::Stream(StreamError::Cancelled).is_visible());
        assert!(AppError::Stream(StreamError::SessionTimeout { secs: 1 }).is_visible());
    }

    #[test]
    fn test_only_exhausted_repairs_keep_sandbox() {
        let exhausted = AppError::Deployment(DeploymentError::RepairExhausted {
            attempts: 2,
            error: "boom".to_string(),
        });
        assert!(exhausted.keeps_sandbox());
        let upload = AppError::Deployment(DeploymentError::Upload {
            path: "app/page.tsx".to_string(),
            message: "boom".to_string(),
        });
        assert!(!upload.keeps_sandbox());
    }
}
