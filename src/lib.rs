// Core modules
pub mod config;
pub mod db;
pub mod decision;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod simulation;
pub mod strategy;

// Re-export commonly used types
pub use error::EngineError;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
