pub use self::config::IndexerConfig;
pub use self::error::FatalError;
pub use self::indexer::Indexer;

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod indexer;
pub mod linker;
pub mod mapper;
pub mod models;
pub mod rescan;
pub mod sink;

#[cfg(any(test, feature = "test"))]
pub mod testing;
