//! 星TAP 文件索引与检索引擎：遍历分层文件存储建立内存索引，
//! 支持文件名/内容/标签检索、短期结果缓存、搜索历史和增量更新。

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fs_store;
pub mod history;
pub mod index;
pub mod indexer;
pub mod kv;
pub mod mem_store;
pub mod queue;
pub mod relevance;
pub mod searcher;
pub mod types;

pub use config::EngineConfig;
pub use engine::SearchEngine;
pub use error::{SearchError, StoreError};
pub use fs_store::{FileStore, LocalFileStore};
pub use indexer::{BuildOutcome, UpdateOutcome};
pub use kv::{KeyValueStore, MemoryKv, RedbStore};
pub use mem_store::MemoryFileStore;
pub use types::{
    IndexEntry, IndexStats, MatchField, MatchSpan, SearchOptions, SearchResponse, SearchResult,
    SortBy, TypeFilter,
};
