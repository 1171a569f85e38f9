//! # Feedline Testing Utils
//!
//! 工作区共享的测试工具：可注入故障的存储包装、记录调用的计数服务与事件发布端、
//! 社交关系数据构建器，以及异步条件等待。
//!
//! ```toml
//! [dev-dependencies]
//! feedline-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
