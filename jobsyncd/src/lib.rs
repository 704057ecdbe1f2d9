pub mod bridge;
pub mod config;
pub mod daemon;
pub mod sync;
