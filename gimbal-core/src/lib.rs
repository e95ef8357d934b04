pub mod capture;
pub mod config;
pub mod control;
pub mod detection;
pub mod identity;
pub mod pipeline;
pub mod registry;
pub mod servo;
pub mod stores;
pub mod video;

// Re-export the top-level pipeline error type so callers only need `gimbal_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
