use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::types::{EntryBody, IndexEntry, IndexStats};

/// 内存索引：path -> entry。
///
/// 写入只由索引器（单写者）完成，查询只在短暂的读锁内取出 Arc 句柄，
/// 打分在锁外进行，因此重建期间查询不会被阻塞太久，也不会看到半写入的条目。
#[derive(Debug, Default)]
pub struct IndexStore {
    entries: RwLock<HashMap<PathBuf, Arc<IndexEntry>>>,
    status: BuildStatus,
}

/// 构建状态，供界面展示进度
#[derive(Debug, Default)]
pub struct BuildStatus {
    indexing: AtomicBool,
    progress: AtomicU8,
    last_indexed_at: Mutex<Option<DateTime<Utc>>>,
}

impl BuildStatus {
    pub fn begin(&self) {
        self.progress.store(0, Ordering::SeqCst);
        self.indexing.store(true, Ordering::SeqCst);
    }

    /// 同一轮构建内只增不减，子目录展开时分母变大不会让进度回退
    pub fn set_progress(&self, percent: u8) {
        self.progress.fetch_max(percent.min(100), Ordering::SeqCst);
    }

    pub fn finish(&self, at: DateTime<Utc>) {
        self.progress.store(100, Ordering::SeqCst);
        *self.last_indexed_at.lock() = Some(at);
        self.indexing.store(false, Ordering::SeqCst);
    }

    /// 构建中断，不更新完成时间
    pub fn abort(&self) {
        self.indexing.store(false, Ordering::SeqCst);
    }

    pub fn touch(&self, at: DateTime<Utc>) {
        *self.last_indexed_at.lock() = Some(at);
    }

    pub fn is_indexing(&self) -> bool {
        self.indexing.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn last_indexed_at(&self) -> Option<DateTime<Utc>> {
        *self.last_indexed_at.lock()
    }
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &BuildStatus {
        &self.status
    }

    /// 按 path 插入或替换
    pub fn upsert(&self, entry: IndexEntry) {
        let entry = Arc::new(entry);
        self.entries.write().insert(entry.path.clone(), entry);
    }

    pub fn remove(&self, path: &Path) -> Option<Arc<IndexEntry>> {
        self.entries.write().remove(path)
    }

    /// 删除该路径及其下所有条目，返回删除数量
    pub fn remove_subtree(&self, path: &Path) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|p, _| !p.starts_with(path));
        before - entries.len()
    }

    pub fn retain(&self, mut keep: impl FnMut(&IndexEntry) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| keep(e));
        before - entries.len()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<IndexEntry>> {
        self.entries.read().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// 一次性替换全部条目，查询不会看到中间状态
    pub fn replace_all(&self, entries: Vec<IndexEntry>) {
        let fresh: HashMap<PathBuf, Arc<IndexEntry>> = entries
            .into_iter()
            .map(|e| (e.path.clone(), Arc::new(e)))
            .collect();
        *self.entries.write() = fresh;
    }

    /// scope 下的条目（按路径段匹配，/foo 不会命中 /foobar）。
    /// 每次调用都是对当前状态的新一轮遍历，不保证快照隔离。
    pub fn iterate(&self, scope: Option<&Path>) -> impl Iterator<Item = Arc<IndexEntry>> {
        let entries = self.entries.read();
        let picked: Vec<Arc<IndexEntry>> = match scope {
            None => entries.values().cloned().collect(),
            Some(scope) => entries
                .values()
                .filter(|e| e.path.starts_with(scope))
                .cloned()
                .collect(),
        };
        picked.into_iter()
    }

    pub fn stats(&self) -> IndexStats {
        let entries = self.entries.read();
        let mut stats = IndexStats {
            item_count: entries.len(),
            ..IndexStats::default()
        };
        for entry in entries.values() {
            match &entry.body {
                EntryBody::Folder => stats.folder_count += 1,
                EntryBody::FileMetaOnly => stats.file_count += 1,
                EntryBody::FileWithContent { .. } => {
                    stats.file_count += 1;
                    stats.content_indexed_count += 1;
                }
            }
            stats.total_size_bytes += entry.size_bytes;
        }
        drop(entries);

        stats.last_indexed_at = self.status.last_indexed_at();
        stats.is_indexing = self.status.is_indexing();
        stats.progress_percent = self.status.progress();
        stats
    }
}
