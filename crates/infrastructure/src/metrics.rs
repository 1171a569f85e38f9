use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;

/// 任务队列运行指标
///
/// 原子计数器供本进程查询，同时上报到 `metrics` 门面。
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    published: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    acked: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
    requeued: Arc<AtomicU64>,
    reclaimed: Arc<AtomicU64>,
}

impl QueueMetrics {
    pub fn record_published(&self, queue: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
        counter!("feedline_task_queue_published_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn record_delivered(&self, queue: &str, count: u64) {
        self.delivered.fetch_add(count, Ordering::Relaxed);
        counter!("feedline_task_queue_delivered_total", "queue" => queue.to_string())
            .increment(count);
    }

    pub fn record_acked(&self, queue: &str) {
        self.acked.fetch_add(1, Ordering::Relaxed);
        counter!("feedline_task_queue_acked_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn record_rejected(&self, queue: &str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        counter!("feedline_task_queue_rejected_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn record_requeued(&self, queue: &str) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        counter!("feedline_task_queue_requeued_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn record_reclaimed(&self, queue: &str, count: u64) {
        self.reclaimed.fetch_add(count, Ordering::Relaxed);
        counter!("feedline_task_queue_reclaimed_total", "queue" => queue.to_string())
            .increment(count);
    }

    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub reclaimed: u64,
}
