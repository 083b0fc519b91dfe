// Core modules
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod indicators;
pub mod models;

// Re-export commonly used types
pub use error::BotError;
pub use exchange::Exchange;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, BotError>;
