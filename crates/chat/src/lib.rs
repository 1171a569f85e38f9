//! 聊天消息发送
//!
//! 保存消息与递增未读计数是两个独立失败的步骤，由 [`Saga`] 按顺序执行，
//! 后续步骤失败时逆序调用已执行步骤的补偿。

pub mod message_saga;
pub mod saga;
pub mod service;

pub use message_saga::{IncrementUnreadStep, MessageSagaContext, SaveMessageStep, MESSAGE_SAGA};
pub use saga::{Saga, SagaStep};
pub use service::{ChatService, PostedMessage};
