pub mod cost;
pub mod db;
pub mod error;
pub mod manager;
pub mod recall;
pub mod types;

pub use cost::CostStore;
pub use error::{MemoryError, Result};
pub use manager::MemoryStore;
