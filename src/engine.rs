use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{SearchError, StoreError};
use crate::fs_store::{FileStore, WatchGuard};
use crate::history::HistoryTracker;
use crate::index::IndexStore;
use crate::indexer::{BuildOutcome, Indexer, UpdateOutcome};
use crate::kv::KeyValueStore;
use crate::queue::UpdateQueue;
use crate::searcher::Searcher;
use crate::types::{ChangeEvent, IndexStats, SearchOptions, SearchResponse};

/// 对外入口：组合索引器、查询引擎和增量更新队列
pub struct SearchEngine {
    root: PathBuf,
    index: Arc<IndexStore>,
    indexer: Arc<Indexer>,
    searcher: Searcher,
    queue: Arc<UpdateQueue>,
    kv: Arc<dyn KeyValueStore>,
    watch: Mutex<Option<WatchGuard>>,
}

impl SearchEngine {
    /// 需要在 tokio 运行时内创建，增量更新任务会派发到该运行时
    pub fn new(
        root: impl Into<PathBuf>,
        config: EngineConfig,
        store: Arc<dyn FileStore>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("SearchEngine 需要在 tokio 运行时中创建")?;
        let index = Arc::new(IndexStore::new());
        let cache = ResultCache::new(config.cache_ttl(), config.cache_capacity);
        let history = HistoryTracker::load(kv.clone(), config.history_limit);
        let root: PathBuf = root.into();
        let indexer = Arc::new(Indexer::new(store, index.clone(), Arc::new(config)));
        indexer.set_root(root.clone());
        let queue = UpdateQueue::new(indexer.clone(), runtime);
        Ok(Self {
            root,
            index: index.clone(),
            indexer,
            searcher: Searcher::new(index, cache, history),
            queue,
            kv,
            watch: Mutex::new(None),
        })
    }

    /// 使用键值存储中保存的设置创建
    pub fn with_saved_settings(
        root: impl Into<PathBuf>,
        store: Arc<dyn FileStore>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let config = EngineConfig::load(kv.as_ref());
        Self::new(root, config, store, kv)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.indexer.config()
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse, SearchError> {
        let default_max = self.config().default_max_results;
        self.searcher.search(query, options, default_max)
    }

    /// 全量重建。构建期间旧索引仍可查询，完成后整体替换
    pub async fn rebuild_index(&self) -> BuildOutcome {
        self.searcher.clear_cache();
        let outcome = self.indexer.build_index(&self.root).await;
        self.searcher.clear_cache();
        outcome
    }

    pub fn cancel_build(&self) {
        self.indexer.cancel_build();
    }

    pub fn index_stats(&self) -> IndexStats {
        let cache = self.searcher.cache();
        IndexStats {
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            ..self.index.stats()
        }
    }

    pub fn recent_searches(&self, limit: usize) -> Vec<String> {
        self.searcher.history().recent(limit)
    }

    pub fn clear_history(&self) {
        self.searcher.history().clear();
    }

    /// 立即同步处理单个路径
    pub async fn update_file(&self, path: &Path) -> UpdateOutcome {
        self.indexer.update_file(path).await
    }

    /// 交给后台队列处理，立即返回
    pub fn notify_change(&self, event: ChangeEvent) {
        self.queue.enqueue(event.path);
    }

    /// 订阅根目录的变更通知，重复调用会替换旧订阅
    pub fn watch(&self) -> Result<(), StoreError> {
        let queue = self.queue.clone();
        let guard = self.indexer.store().subscribe(
            &self.root,
            Box::new(move |event: ChangeEvent| queue.enqueue(event.path)),
        )?;
        *self.watch.lock() = Some(guard);
        info!("开始监听: {}", self.root.display());
        Ok(())
    }

    pub fn unwatch(&self) {
        if self.watch.lock().take().is_some() {
            info!("停止监听: {}", self.root.display());
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// 等待已入队的增量更新处理完
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// 应用新配置。返回 true 表示资格规则有变，需要重建才能收录新符合条件的文件
    pub async fn reconfigure(&self, config: EngineConfig) -> bool {
        let previous = self.config();
        let needs_rebuild = previous.eligibility_differs(&config);
        self.searcher
            .reconfigure(config.cache_ttl(), config.cache_capacity, config.history_limit);
        self.indexer.set_config(Arc::new(config)).await;
        // set_config 可能移除了条目，清掉期间写入的缓存
        self.searcher.clear_cache();
        if needs_rebuild {
            info!("索引规则已变更，建议重建索引");
        }
        needs_rebuild
    }

    pub fn save_settings(&self) -> Result<()> {
        self.config().save(self.kv.as_ref())
    }

    /// 停止监听、中止构建并写入历史
    pub fn shutdown(&self) {
        self.unwatch();
        self.cancel_build();
        if let Err(e) = self.searcher.history().flush() {
            warn!("保存搜索历史失败: {}", e);
        }
    }
}
