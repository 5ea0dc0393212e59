//! 目标网址规范化

use reqwest::Url;

use crate::error::{AppError, AppResult};

/// 规范化用户输入的网址
///
/// - 去掉首尾空白，没有协议时补上 `https://`
/// - 只接受带主机名的 http / https 地址
/// - 去掉末尾的 `/`
pub fn normalize_url(raw: &str) -> AppResult<String> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(invalid(raw, "网址为空"));
    }

    let lower = input.to_ascii_lowercase();
    let candidate = if lower.starts_with("http://") || lower.starts_with("https://") {
        input.to_string()
    } else if input.contains("://") {
        return Err(invalid(raw, "只支持 http / https 协议"));
    } else {
        format!("https://{}", input)
    };

    let parsed = Url::parse(&candidate).map_err(|e| invalid(raw, &e.to_string()))?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(invalid(raw, "缺少主机名")),
    }
    if input.chars().any(char::is_whitespace) {
        return Err(invalid(raw, "网址中不能包含空白字符"));
    }

    Ok(candidate.trim_end_matches('/').to_string())
}

fn invalid(input: &str, reason: &str) -> AppError {
    AppError::InvalidUrl {
        input: input.trim().to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_defaults_to_https() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_url("  example.com/docs/ ").unwrap(),
            "https://example.com/docs"
        );
    }

    #[test]
    fn test_existing_scheme_is_kept() {
        assert_eq!(normalize_url("http://example.com").unwrap(), "http://example.com");
        assert_eq!(
            normalize_url("https://example.com/a?b=1").unwrap(),
            "https://example.com/a?b=1"
        );
    }

    #[test]
    fn test_invalid_inputs() {
        for bad in ["", "   ", "ftp://example.com", "https://", "exa mple.com"] {
            let err = normalize_url(bad).unwrap_err();
            assert_eq!(err.status_code(), 400, "input: {:?}", bad);
        }
    }
}
