//! 克隆历史记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::{GeneratedFile, Usage};

/// 持久化的克隆记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneRecord {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    // TOML 要求普通字段写在表之前
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub usage: Usage,
    pub files: Vec<GeneratedFile>,
}

impl CloneRecord {
    pub fn summary(&self) -> CloneSummary {
        CloneSummary {
            id: self.id.clone(),
            url: self.url.clone(),
            preview_url: self.preview_url.clone(),
            file_count: self.files.len(),
            created_at: self.created_at,
        }
    }
}

/// 列表页展示用的摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneSummary {
    pub id: String,
    pub url: String,
    pub preview_url: Option<String>,
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClonePage {
    pub items: Vec<CloneSummary>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

impl ClonePage {
    /// 对已按时间倒序排好的记录取第 `page` 页（从 1 开始）
    pub fn slice(sorted: &[CloneRecord], page: usize, per_page: usize) -> Self {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let total = sorted.len();
        let items = sorted
            .iter()
            .skip(page.saturating_sub(1).saturating_mul(per_page))
            .take(per_page)
            .map(CloneRecord::summary)
            .collect();

        Self {
            items,
            total,
            page,
            pages: total.div_ceil(per_page),
        }
    }
}

/// 最近的记录排在前面，时间相同按 ID 排序保证分页稳定
pub fn sort_newest_first(records: &mut [CloneRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, minutes_ago: i64) -> CloneRecord {
        let now = Utc::now();
        CloneRecord {
            id: id.to_string(),
            url: format!("https://{}.test", id),
            preview_url: None,
            sandbox_id: None,
            files: vec![GeneratedFile::new("app/page.tsx", "x")],
            usage: Usage::default(),
            created_at: now - Duration::minutes(minutes_ago),
            completed_at: now,
        }
    }

    #[test]
    fn test_slice_pages() {
        let mut records: Vec<_> = (0..5).map(|i| record(&format!("r{}", i), i)).collect();
        sort_newest_first(&mut records);

        let first = ClonePage::slice(&records, 1, 2);
        assert_eq!(first.total, 5);
        assert_eq!(first.pages, 3);
        assert_eq!(first.items[0].id, "r0");

        let last = ClonePage::slice(&records, 3, 2);
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, "r4");

        let beyond = ClonePage::slice(&records, 9, 2);
        assert!(beyond.items.is_empty());
    }

    #[test]
    fn test_huge_page_is_empty() {
        let records = vec![record("a", 0)];
        let page = ClonePage::slice(&records, usize::MAX / 2, 100);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
        assert_eq!(page.pages, 1);
    }

    #[test]
    fn test_page_zero_is_first_page() {
        let records = vec![record("a", 0)];
        assert_eq!(ClonePage::slice(&records, 0, 0).page, 1);
        assert_eq!(ClonePage::slice(&records, 0, 0).items.len(), 1);
    }
}
