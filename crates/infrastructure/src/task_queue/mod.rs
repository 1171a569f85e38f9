//! 持久化任务队列
//!
//! 提供Redis与内存两种 [`TaskBroker`](feedline_domain::TaskBroker) 实现，
//! 以及在其上运行的消费者池和孤儿任务清理器。

pub mod cleaner;
pub mod consumer;
pub mod in_memory;
pub mod redis;

pub use cleaner::{CleanupReport, QueueCleaner};
pub use consumer::{ConsumerPool, ConsumerPoolConfig};
pub use in_memory::InMemoryTaskBroker;
pub use self::redis::RedisTaskBroker;

use feedline_errors::{FeedError, FeedResult};

/// 存储记录格式：`<delivery_id>|<payload>`
pub(crate) fn encode_record(delivery_id: &str, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(delivery_id.len() + 1 + payload.len());
    record.extend_from_slice(delivery_id.as_bytes());
    record.push(b'|');
    record.extend_from_slice(payload);
    record
}

pub(crate) fn decode_record(record: &[u8]) -> FeedResult<(String, Vec<u8>)> {
    let split = record
        .iter()
        .position(|b| *b == b'|')
        .ok_or_else(|| FeedError::task_queue("队列记录缺少投递ID"))?;
    let id = std::str::from_utf8(&record[..split])
        .map_err(|e| FeedError::task_queue(format!("投递ID不是有效的UTF-8: {e}")))?;
    Ok((id.to_string(), record[split + 1..].to_vec()))
}

/// 生成消费者名称：`<tag>-<随机后缀>`
pub(crate) fn consumer_name(tag: &str) -> String {
    use rand::distr::{Alphanumeric, SampleString};
    let suffix = Alphanumeric.sample_string(&mut rand::rng(), 6);
    format!("{tag}-{suffix}")
}
