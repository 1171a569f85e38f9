pub mod entities;
pub mod events;
pub mod ports;
pub mod tasks;

pub use entities::*;
pub use events::*;
pub use feedline_errors::{FeedError, FeedResult};
pub use ports::*;
pub use tasks::*;
