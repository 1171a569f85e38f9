pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemorySocialStorage;
pub use postgres::PostgresSocialStorage;
