//! 从开发服务器日志中识别编译 / 运行错误

use std::sync::OnceLock;

use regex::Regex;

/// 日志中识别出的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    /// 出错的文件（项目内相对路径）
    pub file: Option<String>,
    /// 错误附近的日志片段
    pub error: String,
}

const ERROR_MARKERS: &[&str] = &[
    "Failed to compile",
    "Module not found",
    "SyntaxError",
    "TypeError",
    "ReferenceError",
    "Unhandled Runtime Error",
    "Error:",
];

/// 上下文行数
const CONTEXT_LINES: usize = 12;

fn file_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:\./)?((?:app|components|src|lib|styles)/[\w./\-\[\]()@]+\.(?:tsx|ts|jsx|js|css))")
            .expect("valid file pattern")
    })
}

/// 找到日志里最后一次出现的错误
///
/// 开发服务器会在修复后继续输出正常日志，所以只有最后一个错误之后没有
/// `compiled` 成功标记时才认为仍然失败
pub fn detect_build_failure(log: &str) -> Option<BuildFailure> {
    let lines: Vec<&str> = log.lines().collect();

    let last_error = lines
        .iter()
        .rposition(|line| ERROR_MARKERS.iter().any(|marker| line.contains(marker)))?;

    let recovered = lines[last_error + 1..]
        .iter()
        .any(|line| line.contains("Compiled") || line.contains("compiled successfully"));
    if recovered {
        return None;
    }

    let start = last_error.saturating_sub(2);
    let end = (last_error + CONTEXT_LINES).min(lines.len());
    let snippet = lines[start..end].join("\n");

    let file = lines[start..end]
        .iter()
        .find_map(|line| file_pattern().captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    Some(BuildFailure {
        file,
        error: snippet,
    })
}
