use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use uuid::Uuid;

use crate::models::job::Job;

/// Queue entry. Ordered so the max-heap pops the highest priority first and,
/// within a priority, the oldest job first.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub scan_id: Uuid,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Enqueue sequence, breaks ties between identical timestamps.
    seq: u64,
}

impl QueuedJob {
    fn rank(&self) -> (i32, Reverse<DateTime<Utc>>, Reverse<u64>) {
        (self.priority, Reverse(self.created_at), Reverse(self.seq))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// In-memory holding area for jobs awaiting dispatch.
///
/// Owned by the dispatcher loop; nothing else mutates it. Removal is lazy:
/// heap entries whose id is no longer a member are discarded on pop.
#[derive(Debug, Default)]
pub struct QueueManager {
    heap: BinaryHeap<QueuedJob>,
    members: HashSet<Uuid>,
    next_seq: u64,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job. Returns `false` if it is already queued.
    pub fn enqueue(&mut self, job: &Job) -> bool {
        if !self.members.insert(job.id) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob {
            job_id: job.id,
            scan_id: job.scan_id,
            priority: job.priority,
            created_at: job.created_at,
            seq,
        });
        true
    }

    /// Put a job back after a failed dispatch attempt, keeping its original place.
    pub fn requeue(&mut self, entry: QueuedJob) {
        if self.members.insert(entry.job_id) {
            self.heap.push(entry);
        }
    }

    /// Pop the highest-priority job.
    pub fn dequeue(&mut self) -> Option<QueuedJob> {
        while let Some(entry) = self.heap.pop() {
            if self.members.remove(&entry.job_id) {
                return Some(entry);
            }
        }
        None
    }

    /// Drop a job from future dispatch. Returns `true` if it was queued.
    pub fn remove(&mut self, job_id: Uuid) -> bool {
        self.members.remove(&job_id)
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.members.contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(priority: i32, age_secs: i64) -> Job {
        let mut job = Job::new(Uuid::new_v4(), priority);
        job.created_at = Utc::now() - Duration::seconds(age_secs);
        job
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = QueueManager::new();
        let low = job(1, 10);
        let high = job(5, 0);
        queue.enqueue(&low);
        queue.enqueue(&high);

        assert_eq!(queue.dequeue().unwrap().job_id, high.id);
        assert_eq!(queue.dequeue().unwrap().job_id, low.id);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut queue = QueueManager::new();
        let older = job(2, 30);
        let newer = job(2, 5);
        queue.enqueue(&newer);
        queue.enqueue(&older);

        assert_eq!(queue.dequeue().unwrap().job_id, older.id);
        assert_eq!(queue.dequeue().unwrap().job_id, newer.id);
    }

    #[test]
    fn test_same_timestamp_uses_enqueue_order() {
        let mut queue = QueueManager::new();
        let first = job(0, 0);
        let mut second = job(0, 0);
        second.created_at = first.created_at;
        queue.enqueue(&first);
        queue.enqueue(&second);

        assert_eq!(queue.dequeue().unwrap().job_id, first.id);
        assert_eq!(queue.dequeue().unwrap().job_id, second.id);
    }

    #[test]
    fn test_duplicate_enqueue_ignored() {
        let mut queue = QueueManager::new();
        let j = job(0, 0);
        assert!(queue.enqueue(&j));
        assert!(!queue.enqueue(&j));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_removed_job_is_skipped() {
        let mut queue = QueueManager::new();
        let keep = job(0, 10);
        let cancelled = job(9, 0);
        queue.enqueue(&keep);
        queue.enqueue(&cancelled);

        assert!(queue.remove(cancelled.id));
        assert!(!queue.contains(cancelled.id));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().unwrap().job_id, keep.id);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reenqueue_after_remove_yields_once() {
        let mut queue = QueueManager::new();
        let j = job(0, 0);
        queue.enqueue(&j);
        queue.remove(j.id);
        queue.enqueue(&j);

        assert_eq!(queue.dequeue().unwrap().job_id, j.id);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_requeue_restores_position() {
        let mut queue = QueueManager::new();
        let a = job(3, 0);
        let b = job(1, 0);
        queue.enqueue(&a);
        queue.enqueue(&b);

        let popped = queue.dequeue().unwrap();
        queue.requeue(popped);
        assert_eq!(queue.dequeue().unwrap().job_id, a.id);
    }
}
