//! 抓取服务 - 业务能力层
//!
//! 只负责"打开网页 → 拿到 HTML 和截图"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `chromiumoxide` 驱动无头浏览器渲染页面（避免简单 HTTP 请求被 403）
//! - 可以通过 `browser_debug_port` 连接一个已经在运行的浏览器

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::browser::{connect_to_browser, launch_headless_browser};
use crate::config::Config;
use crate::error::ScrapeError;
use crate::models::ScrapeResult;
use crate::services::html::extract_page;
use crate::services::screenshot::fit_screenshot;

/// 抓取能力
#[async_trait]
pub trait Scraper: Send + Sync {
    /// 抓取页面 HTML 和截图
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError>;
}

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 页面加载后等待前端渲染
const RENDER_SETTLE: Duration = Duration::from_secs(3);

/// 常见的反爬 / 拦截页面标题
const BLOCKED_TITLES: &[&str] = &[
    "Access Denied",
    "Attention Required",
    "Just a moment",
    "403 Forbidden",
];

/// 基于无头浏览器的抓取服务
pub struct BrowserScraper {
    config: Config,
}

impl BrowserScraper {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    async fn open_browser(&self) -> Result<(Browser, JoinHandle<()>), ScrapeError> {
        match self.config.browser_debug_port {
            Some(port) => connect_to_browser(port).await,
            None => launch_headless_browser(&self.config).await,
        }
    }

    async fn scrape_page(&self, browser: &Browser, url: &str) -> Result<ScrapeResult, ScrapeError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Browser {
                message: format!("创建页面失败: {}", e),
            })?;

        let result = self.capture(&page, url).await;

        if let Err(e) = page.close().await {
            debug!("关闭页面失败: {}", e);
        }
        result
    }

    async fn capture(&self, page: &Page, url: &str) -> Result<ScrapeResult, ScrapeError> {
        if let Err(e) = page.set_user_agent(USER_AGENT).await {
            debug!("设置 User-Agent 失败: {}", e);
        }

        page.goto(url).await.map_err(|e| ScrapeError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        debug!("已导航到: {}", url);

        sleep(RENDER_SETTLE).await;

        let html = page.content().await.map_err(|e| ScrapeError::Browser {
            message: format!("读取页面内容失败: {}", e),
        })?;

        let mut result = extract_page(url, &html, self.config.max_markup_chars);

        if let Some(blocked) = BLOCKED_TITLES
            .iter()
            .find(|t| result.title.to_lowercase().contains(&t.to_lowercase()))
        {
            return Err(ScrapeError::Blocked {
                url: url.to_string(),
                reason: format!("页面标题为 '{}'", blocked),
            });
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        match page.screenshot(params).await {
            Ok(bytes) => {
                debug!("截图大小: {} 字节", bytes.len());
                let bytes = match fit_screenshot(bytes.clone(), self.config.max_screenshot_dim) {
                    Ok(fitted) => fitted,
                    Err(e) => {
                        warn!("⚠️ 截图缩放失败，使用原图: {}", e);
                        bytes
                    }
                };
                result.screenshots.push(STANDARD.encode(bytes));
            }
            // 截图失败不影响生成，模型仍然可以只看 HTML
            Err(e) => warn!("⚠️ 截图失败: {}", e),
        }

        Ok(result)
    }
}

#[async_trait]
impl Scraper for BrowserScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapeResult, ScrapeError> {
        let limit = self.config.scrape_timeout();
        let (mut browser, handler_task) = self.open_browser().await?;

        let outcome = timeout(limit, self.scrape_page(&browser, url)).await;

        // 连接模式下不关闭别人的浏览器
        if self.config.browser_debug_port.is_none() {
            if let Err(e) = browser.close().await {
                debug!("关闭浏览器失败: {}", e);
            }
        }
        handler_task.abort();

        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScrapeError::Timeout {
                    url: url.to_string(),
                    secs: limit.as_secs(),
                })
            }
        };

        info!(
            "✓ 抓取完成: {} (HTML {} 字符, {} 张截图, {} 张图片)",
            url,
            result.markup.chars().count(),
            result.screenshots.len(),
            result.image_urls.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 需要本机安装 Chrome / Chromium
    ///
    /// 运行方式：
    /// ```bash
    /// cargo test test_scrape_real_page -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_scrape_real_page() {
        let _ = tracing_subscriber::fmt::try_init();

        let scraper = BrowserScraper::new(&Config::default());
        let result = scraper.scrape("https://example.com").await.unwrap();

        println!("标题: {}", result.title);
        assert!(result.title.contains("Example"));
        assert_eq!(result.screenshots.len(), 1);
        assert!(!result.markup.contains("<script"));
    }
}
