pub mod messaging;
pub mod remote;
pub mod storage;

pub use messaging::*;
pub use remote::*;
pub use storage::*;
