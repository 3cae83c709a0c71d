pub mod auth;
pub mod engine;
pub mod faults;
pub mod memory;
pub mod table;

pub use faults::Faults;
pub use memory::{MemoryStore, StoreStats};
pub use table::Table;
