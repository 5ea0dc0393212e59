//! 分段规划
//!
//! 小页面一次生成；大页面按顶层结构标签切成若干连续的片段并发生成。
//! 切分只发生在标签边界上，片段按原顺序拼起来等于原 HTML。

use crate::models::SectionTask;
use crate::services::html::landmark_offsets;

/// 生成计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPlan {
    /// 一次调用生成整页
    Single { markup: String },
    /// 多个分段并发生成，`total` 在计划确定后不再变化
    Sections { tasks: Vec<SectionTask> },
}

impl SectionPlan {
    pub fn total(&self) -> usize {
        match self {
            SectionPlan::Single { .. } => 1,
            SectionPlan::Sections { tasks } => tasks.len(),
        }
    }
}

/// 根据 HTML 长度和结构决定生成方式
///
/// # 参数
/// - `markup`: 清理后的 HTML
/// - `threshold_chars`: 超过该字符数才拆分
/// - `max_sections`: 最多拆分为几段
pub fn plan_sections(markup: &str, threshold_chars: usize, max_sections: usize) -> SectionPlan {
    if max_sections < 2 || markup.chars().count() <= threshold_chars {
        return single(markup);
    }

    let mut cuts = landmark_offsets(markup);
    if cuts.len() < 2 {
        cuts = tag_boundaries(markup, max_sections);
    }

    let slices = group_slices(markup, &cuts, max_sections);
    if slices.len() < 2 {
        return single(markup);
    }

    let total = slices.len();
    let tasks = slices
        .into_iter()
        .enumerate()
        .map(|(i, slice)| SectionTask {
            index: i + 1,
            total,
            slice,
        })
        .collect();
    SectionPlan::Sections { tasks }
}

fn single(markup: &str) -> SectionPlan {
    SectionPlan::Single {
        markup: markup.to_string(),
    }
}

/// 没有结构标签时，按长度均分并对齐到最近的 `<`
fn tag_boundaries(markup: &str, parts: usize) -> Vec<usize> {
    let len = markup.len();
    let mut cuts = Vec::new();
    for i in 1..parts {
        let target = len * i / parts;
        if let Some(offset) = markup[..]
            .char_indices()
            .skip_while(|(idx, _)| *idx < target)
            .find(|(_, c)| *c == '<')
            .map(|(idx, _)| idx)
        {
            if cuts.last() != Some(&offset) {
                cuts.push(offset);
            }
        }
    }
    cuts
}

/// 把切分点之间的块按长度贪心合并为不超过 `max_sections` 个连续片段
fn group_slices(markup: &str, cuts: &[usize], max_sections: usize) -> Vec<String> {
    // 块边界：开头 + 切分点 + 结尾
    let mut bounds: Vec<usize> = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0);
    for &cut in cuts {
        if cut > *bounds.last().unwrap_or(&0) && cut < markup.len() {
            bounds.push(cut);
        }
    }
    bounds.push(markup.len());

    let blocks: Vec<&str> = bounds
        .windows(2)
        .map(|w| &markup[w[0]..w[1]])
        .filter(|b| !b.is_empty())
        .collect();

    let groups = max_sections.min(blocks.len());
    if groups == 0 {
        return Vec::new();
    }

    let target = markup.len().div_ceil(groups);
    let mut slices: Vec<String> = Vec::with_capacity(groups);
    let mut current = String::new();

    for (i, block) in blocks.iter().enumerate() {
        current.push_str(block);
        let remaining_blocks = blocks.len() - i - 1;
        let remaining_groups = groups - slices.len() - 1;
        // 剩下的块刚好够每组一块时必须切
        let must_cut = remaining_blocks == remaining_groups;
        if remaining_groups > 0 && (current.len() >= target || must_cut) {
            slices.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        slices.push(current);
    }
    slices
}
