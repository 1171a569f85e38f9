//! 实时推送网关
//!
//! 长连接注册表由单个actor持有，注册、注销与投递都以消息形式串行处理；
//! websocket会话只通过 [`RegistryHandle`] 与它交互。

pub mod connection;
pub mod registry;
pub mod server;

pub use connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryReport, RegistryHandle};
pub use server::GatewayServer;
