/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志订阅者
///
/// 日志级别由 `RUST_LOG` 控制，默认 `info`；重复初始化会被忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 网站克隆服务启动");
    info!("🌐 监听地址: {}", config.bind_addr);
    info!("🤖 模型: {}", config.llm_model_name);
    if config.sandbox_enabled() {
        info!("📦 沙箱服务: {}", config.sandbox_api_url);
    } else {
        info!("📦 沙箱服务: 未配置，使用本地预览");
    }
    info!("📊 每日克隆上限: {}", config.daily_clone_limit);
    info!("{}", "=".repeat(60));
}

/// 记录单次克隆开始
pub fn log_clone_start(short_id: &str, url: &str) {
    info!("\n{}", "=".repeat(60));
    info!("[克隆 {}] 🚀 开始克隆: {}", short_id, url);
    info!("{}", "=".repeat(60));
}

/// 记录单次克隆结束
///
/// # 参数
/// - `short_id`: 克隆短 ID
/// - `files`: 生成的文件数量
/// - `calls`: 模型调用次数
/// - `cost`: 估算费用（美元）
/// - `elapsed_ms`: 总耗时
pub fn log_clone_complete(short_id: &str, files: usize, calls: u64, cost: f64, elapsed_ms: u64) {
    info!("\n{}", "─".repeat(60));
    info!("[克隆 {}] ✅ 克隆完成", short_id);
    info!(
        "[克隆 {}] 📄 文件: {} | 🤖 调用: {} | 💰 ${:.4} | ⏱️ {:.1}s",
        short_id,
        files,
        calls,
        cost,
        elapsed_ms as f64 / 1000.0
    );
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
