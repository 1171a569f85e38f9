pub mod http;
pub mod in_memory;

pub use http::HttpCounterService;
pub use in_memory::InMemoryCounterService;
