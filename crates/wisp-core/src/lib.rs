pub mod config;
pub mod error;
pub mod types;

pub use config::WispConfig;
pub use error::{Result, WispError};
