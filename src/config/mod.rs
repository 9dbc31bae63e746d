mod engine;

pub use engine::{CacheConfig, DatabaseConfig, EngineConfig};
