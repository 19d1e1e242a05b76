//! Session sources for Pitwall Replay

pub mod cache;
pub mod demo;
pub mod file;

pub use cache::MemoryCache;
pub use demo::{DemoConfig, DemoSource};
pub use file::JsonFileSource;
