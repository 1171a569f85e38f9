pub mod in_memory;
pub mod redis;

pub use in_memory::InMemoryFeedCache;
pub use self::redis::RedisFeedCache;
