//! Processing task model.

use chrono::{DateTime, Utc};
use core_track::Track;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Higher variants are processed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoked once with the terminal track. Never invoked for cancelled tasks.
pub type TaskCallback = Box<dyn FnOnce(Track) + Send + 'static>;

/// Progress checkpoints reported while a task moves through a worker.
pub mod progress {
    pub const QUEUED: u8 = 0;
    pub const CLAIMED: u8 = 10;
    pub const RESOLVING: u8 = 30;
    pub const RESOLVED: u8 = 90;
    pub const DONE: u8 = 100;
}

/// Snapshot of one unit of work in the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingTask {
    pub id: TaskId,
    pub track: Track,
    pub priority: Priority,
    pub status: TaskStatus,
    /// 0..=100, observability only
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    /// Submission order, the tie-break within a priority level
    pub seq: u64,
    pub last_error: Option<String>,
}

impl ProcessingTask {
    pub fn new(track: Track, priority: Priority, max_retries: u32, seq: u64) -> Self {
        Self {
            id: TaskId::new(),
            track,
            priority,
            status: TaskStatus::Queued,
            progress: progress::QUEUED,
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            seq,
            last_error: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Progress only moves forward, except when a retry resets the task.
    pub(crate) fn advance_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(progress::DONE);
        if percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    pub(crate) fn requeue(&mut self, seq: u64, error: String) {
        self.retry_count += 1;
        self.status = TaskStatus::Queued;
        self.progress = progress::QUEUED;
        self.seq = seq;
        self.last_error = Some(error);
    }
}

/// Heap entry. `BinaryHeap` is a max-heap, so the greatest entry is the
/// highest priority with the lowest sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub priority: Priority,
    pub seq: u64,
    pub task_id: TaskId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_track::{RequesterId, SessionId};
    use std::collections::BinaryHeap;

    fn task(priority: Priority, seq: u64) -> ProcessingTask {
        let track = Track::new("song", RequesterId::new("u"), SessionId::new("s")).unwrap();
        ProcessingTask::new(track, priority, 3, seq)
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_heap_orders_by_priority_then_submission() {
        let mut heap = BinaryHeap::new();
        let entries = [
            (Priority::Normal, 0),
            (Priority::Low, 1),
            (Priority::Urgent, 2),
            (Priority::Normal, 3),
            (Priority::Urgent, 4),
        ];
        for (priority, seq) in entries {
            heap.push(QueueEntry {
                priority,
                seq,
                task_id: TaskId::new(),
            });
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![2, 4, 0, 3, 1]);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut task = task(Priority::Normal, 0);
        assert!(task.advance_progress(progress::CLAIMED));
        assert!(task.advance_progress(progress::RESOLVED));
        assert!(!task.advance_progress(progress::RESOLVING));
        assert_eq!(task.progress, progress::RESOLVED);
        assert!(task.advance_progress(250));
        assert_eq!(task.progress, progress::DONE);
    }

    #[test]
    fn test_requeue_counts_retries() {
        let mut task = task(Priority::High, 0);
        task.status = TaskStatus::Processing;
        task.advance_progress(progress::RESOLVING);

        task.requeue(7, "HTTP Error 429".to_string());
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, progress::QUEUED);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.seq, 7);
        assert!(task.can_retry());

        task.requeue(8, "again".to_string());
        task.requeue(9, "again".to_string());
        assert!(!task.can_retry());
    }
}
