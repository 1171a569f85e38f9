use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use feedline_domain::CounterService;
use feedline_errors::FeedResult;

#[derive(Debug, Default)]
struct Counters {
    /// 已计入的 (user_id, message_id)，重复调用不会重复计数
    counted: HashSet<(i64, i64)>,
    unread: HashMap<(i64, i64), u64>,
}

/// 进程内未读计数，按 (用户, 聊天) 统计
#[derive(Debug, Default)]
pub struct InMemoryCounterService {
    counters: Mutex<Counters>,
}

impl InMemoryCounterService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn unread(&self, user_id: i64, chat_id: i64) -> u64 {
        self.counters
            .lock()
            .await
            .unread
            .get(&(user_id, chat_id))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CounterService for InMemoryCounterService {
    async fn increment_unread(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()> {
        let mut counters = self.counters.lock().await;
        if counters.counted.insert((user_id, message_id)) {
            *counters.unread.entry((user_id, chat_id)).or_default() += 1;
        }
        Ok(())
    }

    async fn compensate_increment(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()> {
        let mut counters = self.counters.lock().await;
        if counters.counted.remove(&(user_id, message_id)) {
            if let Some(count) = counters.unread.get_mut(&(user_id, chat_id)) {
                *count = count.saturating_sub(1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compensation_undoes_single_increment() {
        let counter = InMemoryCounterService::new();
        counter.increment_unread(1, 10, 5).await.unwrap();
        counter.increment_unread(1, 10, 5).await.unwrap();
        counter.increment_unread(1, 11, 5).await.unwrap();
        assert_eq!(counter.unread(1, 5).await, 2);

        counter.compensate_increment(1, 10, 5).await.unwrap();
        counter.compensate_increment(1, 10, 5).await.unwrap();
        assert_eq!(counter.unread(1, 5).await, 1);

        // 未计入的消息补偿无效果
        counter.compensate_increment(1, 99, 5).await.unwrap();
        assert_eq!(counter.unread(1, 5).await, 1);
    }
}
