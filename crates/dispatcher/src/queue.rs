use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use scheduler_core::JobId;

/// 因并发闸门饱和而等待的一次执行
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub job_id: JobId,
    pub priority: i32,
    /// 入队序号，同优先级按先来先出
    pub seq: u64,
    /// 手动触发的执行不受任务禁用影响
    pub manual: bool,
    pub enqueued_at: DateTime<Utc>,
}

/// 待执行队列
///
/// 出队前按优先级排序；放不下的条目通过 [`PendingQueue::push_front`] 放回队首。
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, job_id: JobId, priority: i32, manual: bool) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(PendingEntry {
            job_id,
            priority,
            seq,
            manual,
            enqueued_at: Utc::now(),
        });
        self.entries.len()
    }

    pub fn push_front(&mut self, entry: PendingEntry) {
        self.entries.push_front(entry);
    }

    /// 优先级降序，同优先级保持入队顺序
    pub fn sort_by_priority(&mut self) {
        self.entries
            .make_contiguous()
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    pub fn pop_front(&mut self) -> Option<PendingEntry> {
        self.entries.pop_front()
    }

    pub fn remove_job(&mut self, job_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.job_id != job_id);
        before - self.entries.len()
    }

    /// 移除定时触发的条目，保留手动触发
    pub fn drop_scheduled(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.manual);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }
}
