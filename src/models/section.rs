//! 分段生成任务

use std::collections::BTreeSet;

use crate::error::{AppError, AppResult};

/// 一个并发生成的分段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTask {
    /// 从 1 开始
    pub index: usize,
    pub total: usize,
    /// 该分段负责的 HTML 片段
    pub slice: String,
}

/// 分段完成情况
///
/// `total` 在拆分后固定，所有 1..=total 的分段最终都要上报（成功或失败）
#[derive(Debug)]
pub struct SectionTracker {
    total: usize,
    succeeded: BTreeSet<usize>,
    failed: BTreeSet<usize>,
}

impl SectionTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn mark_succeeded(&mut self, index: usize) -> AppResult<()> {
        self.check_index(index)?;
        self.succeeded.insert(index);
        Ok(())
    }

    pub fn mark_failed(&mut self, index: usize) -> AppResult<()> {
        self.check_index(index)?;
        self.failed.insert(index);
        Ok(())
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().copied().collect()
    }

    /// 还没有上报的分段
    pub fn pending(&self) -> Vec<usize> {
        (1..=self.total)
            .filter(|i| !self.succeeded.contains(i) && !self.failed.contains(i))
            .collect()
    }

    /// 所有分段都已上报
    pub fn is_finished(&self) -> bool {
        self.succeeded.len() + self.failed.len() == self.total
    }

    fn check_index(&self, index: usize) -> AppResult<()> {
        if index == 0 || index > self.total {
            return Err(AppError::Other(format!(
                "分段序号 {} 超出范围 [1, {}]",
                index, self.total
            )));
        }
        if self.succeeded.contains(&index) || self.failed.contains(&index) {
            return Err(AppError::Other(format!("分段 {} 重复上报", index)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_rejects_out_of_range() {
        let mut tracker = SectionTracker::new(3);
        assert!(tracker.mark_succeeded(0).is_err());
        assert!(tracker.mark_succeeded(4).is_err());
    }

    #[test]
    fn test_tracker_finishes_with_mixed_results() {
        let mut tracker = SectionTracker::new(3);
        tracker.mark_succeeded(3).unwrap();
        tracker.mark_failed(1).unwrap();
        assert!(!tracker.is_finished());
        assert_eq!(tracker.pending(), vec![2]);
        tracker.mark_succeeded(2).unwrap();
        assert!(tracker.is_finished());
        assert_eq!(tracker.succeeded(), 2);
        assert_eq!(tracker.failed_indices(), vec![1]);
    }

    #[test]
    fn test_tracker_rejects_duplicates() {
        let mut tracker = SectionTracker::new(2);
        tracker.mark_succeeded(1).unwrap();
        assert!(tracker.mark_failed(1).is_err());
    }
}
