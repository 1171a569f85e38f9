//! 动态扇出流水线
//!
//! 新动态经 `post` 队列扇出给每个关注者：为其排入缓存重建任务，并通过事件总线推送通知；
//! `feed` 队列上的任务重建单个用户的动态缓存。

pub mod feed_consumer;
pub mod feed_service;
pub mod post_consumer;
pub mod queue_service;

pub use feed_consumer::FeedConsumer;
pub use feed_service::FeedService;
pub use post_consumer::{FanoutReport, PostConsumer};
pub use queue_service::QueueService;
