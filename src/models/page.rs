//! 抓取结果和生成上下文

use serde::{Deserialize, Serialize};

/// 抓取器返回的页面素材
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeResult {
    /// 清理后的 HTML（已去掉 script / noscript）
    pub markup: String,
    pub title: String,
    pub description: String,
    /// 内联 `<style>` 的内容
    pub css: String,
    /// base64 编码的 PNG 截图
    pub screenshots: Vec<String>,
    pub image_urls: Vec<String>,
}

/// 所有生成调用共享的页面上下文
///
/// 分段生成时每个分段都会拿到同一份上下文，保证视觉风格一致
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: String,
    pub title: String,
    pub description: String,
    pub css: String,
    /// 页面的顶层结构，例如 `["header", "section", "footer"]`
    pub outline: Vec<String>,
    pub screenshots: Vec<String>,
    pub image_urls: Vec<String>,
}

impl PageContext {
    pub fn from_scrape(url: &str, scrape: &ScrapeResult, outline: Vec<String>) -> Self {
        Self {
            url: url.to_string(),
            title: scrape.title.clone(),
            description: scrape.description.clone(),
            css: scrape.css.clone(),
            outline,
            screenshots: scrape.screenshots.clone(),
            image_urls: scrape.image_urls.clone(),
        }
    }
}
