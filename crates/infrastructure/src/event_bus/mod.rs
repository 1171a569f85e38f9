//! 按分片路由的事件总线

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::InMemoryEventBus;
pub use rabbitmq::{RabbitMqEventConsumer, RabbitMqEventPublisher};
