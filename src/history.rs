use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::HISTORY_KEY;
use crate::kv::{self, KeyValueStore};

/// 搜索历史：最新在前、无重复、有上限，写入键值存储。
///
/// 每次变更都会写整张列表，所以上一次写入失败会在下一次变更时自然补上。
pub struct HistoryTracker {
    entries: Arc<Mutex<Vec<String>>>,
    limit: AtomicUsize,
    kv: Arc<dyn KeyValueStore>,
    // 串行化写入，保证最后落盘的是最新列表
    persist_lock: Arc<Mutex<()>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl HistoryTracker {
    /// 从键值存储加载已有历史
    pub fn load(kv: Arc<dyn KeyValueStore>, limit: usize) -> Self {
        let mut entries: Vec<String> = kv::load_or_default(kv.as_ref(), HISTORY_KEY);
        entries.truncate(limit);
        Self {
            entries: Arc::new(Mutex::new(entries)),
            limit: AtomicUsize::new(limit),
            kv,
            persist_lock: Arc::new(Mutex::new(())),
            runtime: tokio::runtime::Handle::try_current().ok(),
        }
    }

    pub fn record(&self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            return;
        }
        {
            let mut entries = self.entries.lock();
            entries.retain(|q| q != query);
            entries.insert(0, query.to_string());
            entries.truncate(self.limit.load(Ordering::Relaxed));
        }
        self.persist();
    }

    /// 最近 limit 条，最新在前
    pub fn recent(&self, limit: usize) -> Vec<String> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.persist();
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
        self.entries.lock().truncate(limit);
    }

    fn persist(&self) {
        let entries = self.entries.clone();
        let kv = self.kv.clone();
        let lock = self.persist_lock.clone();
        let job = move || {
            let _guard = lock.lock();
            // 写入时取当前最新列表
            let snapshot = entries.lock().clone();
            if let Err(e) = kv::save_json(kv.as_ref(), HISTORY_KEY, &snapshot) {
                debug!("保存搜索历史失败，下次变更时重试: {}", e);
            }
        };
        match &self.runtime {
            Some(handle) => {
                handle.spawn_blocking(job);
            }
            None => job(),
        }
    }

    /// 同步写入，供关闭前调用
    pub fn flush(&self) -> anyhow::Result<()> {
        let _guard = self.persist_lock.lock();
        let snapshot = self.entries.lock().clone();
        kv::save_json(self.kv.as_ref(), HISTORY_KEY, &snapshot)
    }
}
