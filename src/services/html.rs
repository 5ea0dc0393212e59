//! HTML 清理与元数据提取
//!
//! 浏览器拿到的是渲染后的完整 DOM，这里去掉脚本、提取标题 / 描述 / 内联样式 /
//! 图片地址，并把 HTML 截断到模型可接受的长度

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

use crate::models::ScrapeResult;

/// 截断标记
pub const TRUNCATION_MARKER: &str = "\n<!-- HTML truncated -->";

/// 页面的顶层结构标签
pub const LANDMARK_TAGS: &[&str] = &["header", "nav", "main", "section", "article", "footer"];

struct Patterns {
    script: Regex,
    noscript: Regex,
    title: Regex,
    meta: Regex,
    meta_name: Regex,
    meta_content: Regex,
    style: Regex,
    img_src: Regex,
    landmark: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        script: Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script pattern"),
        noscript: Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript\s*>").expect("noscript pattern"),
        title: Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").expect("title pattern"),
        meta: Regex::new(r"(?is)<meta\b[^>]*>").expect("meta pattern"),
        meta_name: Regex::new(r#"(?i)\bname\s*=\s*["']description["']"#).expect("meta name pattern"),
        meta_content: Regex::new(r#"(?is)\bcontent\s*=\s*"([^"]*)"|\bcontent\s*=\s*'([^']*)'"#)
            .expect("meta content pattern"),
        style: Regex::new(r"(?is)<style\b[^>]*>(.*?)</style\s*>").expect("style pattern"),
        img_src: Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("img pattern"),
        landmark: Regex::new(r"(?i)<(header|nav|main|section|article|footer)\b").expect("landmark pattern"),
    })
}

/// 从渲染后的 HTML 中提取抓取结果（不含截图）
///
/// # 参数
/// - `base_url`: 页面地址，用于把相对图片地址转换为绝对地址
/// - `html`: 浏览器返回的完整 HTML
/// - `max_markup_chars`: 清理后 HTML 的最大字符数
pub fn extract_page(base_url: &str, html: &str, max_markup_chars: usize) -> ScrapeResult {
    let p = patterns();

    let title = p
        .title
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(m.as_str()))
        .unwrap_or_default();

    let description = p
        .meta
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| p.meta_name.is_match(tag))
        .and_then(|tag| p.meta_content.captures(tag))
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let css = p
        .style
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let without_scripts = p.script.replace_all(html, "");
    let cleaned = p.noscript.replace_all(&without_scripts, "");

    let image_urls = extract_image_urls(base_url, &cleaned);

    ScrapeResult {
        markup: truncate_markup(&cleaned, max_markup_chars),
        title,
        description,
        css,
        screenshots: Vec::new(),
        image_urls,
    }
}

/// 按字符截断 HTML，截断时追加标记
pub fn truncate_markup(markup: &str, max_chars: usize) -> String {
    match markup.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &markup[..byte_idx], TRUNCATION_MARKER),
        None => markup.to_string(),
    }
}

/// 页面顶层结构，例如 `["header", "section", "footer"]`
pub fn landmark_outline(markup: &str) -> Vec<String> {
    patterns()
        .landmark
        .captures_iter(markup)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// 所有结构标签的起始位置
pub fn landmark_offsets(markup: &str) -> Vec<usize> {
    patterns()
        .landmark
        .find_iter(markup)
        .map(|m| m.start())
        .collect()
}

fn extract_image_urls(base_url: &str, html: &str) -> Vec<String> {
    let base = Url::parse(base_url).ok();
    let mut urls: Vec<String> = Vec::new();

    for caps in patterns().img_src.captures_iter(html) {
        let Some(src) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        if src.is_empty() || src.starts_with("data:") {
            continue;
        }
        let absolute = match &base {
            Some(base) => match base.join(src) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => src.to_string(),
        };
        if !urls.contains(&absolute) {
            urls.push(absolute);
        }
    }

    urls
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
