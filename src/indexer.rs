use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{self, EngineConfig, MAX_WORD_FREQ};
use crate::error::StoreError;
use crate::fs_store::FileStore;
use crate::index::IndexStore;
use crate::types::{EntryBody, EntryKind, FileItem, IndexEntry};

/// 判断路径是否应入索引，只依赖根目录、路径、类型、大小和扩展名。
/// 隐藏规则按 root 以下的每一级目录判断，root 本身所在的目录不受影响
pub fn should_index(
    config: &EngineConfig,
    root: Option<&Path>,
    path: &Path,
    kind: EntryKind,
    size: u64,
    extension: Option<&str>,
) -> bool {
    if is_excluded_folder(config, path) {
        return false;
    }
    if !config.index_hidden && is_hidden(root, path) {
        return false;
    }
    match kind {
        EntryKind::Folder => true,
        EntryKind::File => {
            if size > config.max_file_size {
                return false;
            }
            match extension {
                Some(ext) => !config
                    .excluded_extensions
                    .iter()
                    .any(|x| x.eq_ignore_ascii_case(ext)),
                None => true,
            }
        }
    }
}

pub fn should_index_item(config: &EngineConfig, root: Option<&Path>, item: &FileItem) -> bool {
    should_index(config, root, &item.path, item.kind, item.size, item.extension.as_deref())
}

/// root 以下任意一级以 '.' 开头即视为隐藏；不在 root 下的路径检查全部段
fn is_hidden(root: Option<&Path>, path: &Path) -> bool {
    let relative = root
        .and_then(|r| path.strip_prefix(r).ok())
        .unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

fn is_excluded_folder(config: &EngineConfig, path: &Path) -> bool {
    config.excluded_folders.iter().any(|excluded| {
        let excluded_path = Path::new(excluded);
        if excluded_path.components().count() > 1 || excluded_path.is_absolute() {
            // 绝对路径按段前缀匹配
            path.starts_with(excluded_path)
        } else {
            // 单个目录名匹配任意一级
            path.components()
                .any(|c| c.as_os_str() == excluded_path.as_os_str())
        }
    })
}

/// 词频统计：小写、非单词字符替换为空格、丢弃长度 <= 2 的词，保留出现最多的前 100 个
pub fn word_frequencies(text: &str) -> HashMap<String, u32> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();

    let mut counts: HashMap<&str, (u32, usize)> = HashMap::new();
    for (order, word) in normalized.split_whitespace().enumerate() {
        if word.chars().count() <= 2 {
            continue;
        }
        counts.entry(word).or_insert((0, order)).0 += 1;
    }

    let mut ranked: Vec<(&str, u32, usize)> = counts
        .into_iter()
        .map(|(w, (count, first))| (w, count, first))
        .collect();
    // 次数相同按首次出现顺序
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked
        .into_iter()
        .take(MAX_WORD_FREQ)
        .map(|(w, count, _)| (w.to_string(), count))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Completed { indexed: usize, failed_dirs: usize },
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Indexed,
    /// 包含新出现目录下的子项数量
    IndexedTree(usize),
    Removed(usize),
    /// 暂时性读取失败，等待下一次通知重试
    Skipped,
}

struct Walk {
    entries: Vec<IndexEntry>,
    failed_dirs: usize,
    cancelled: bool,
}

/// 索引器：遍历文件存储、判定资格、生成并维护条目。
/// 全量构建与增量更新共用一把写锁，保证单写者。
pub struct Indexer {
    store: Arc<dyn FileStore>,
    index: Arc<IndexStore>,
    config: RwLock<Arc<EngineConfig>>,
    // 索引根目录，隐藏规则相对它判断
    root: RwLock<Option<PathBuf>>,
    write_lock: Mutex<()>,
    cancel: AtomicBool,
}

impl Indexer {
    pub fn new(store: Arc<dyn FileStore>, index: Arc<IndexStore>, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            index,
            config: RwLock::new(config),
            root: RwLock::new(None),
            write_lock: Mutex::new(()),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.read().clone()
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.root.read().clone()
    }

    /// 设置索引根目录；build_index 也会更新它
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = Some(root.into());
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// 替换配置，并移除在新规则下不再符合条件的条目
    pub async fn set_config(&self, config: Arc<EngineConfig>) -> usize {
        let _guard = self.write_lock.lock().await;
        *self.config.write() = config.clone();
        let root = self.root();
        let removed = self.index.retain(|e| {
            should_index(
                &config,
                root.as_deref(),
                &e.path,
                e.kind(),
                e.size_bytes,
                e.extension.as_deref(),
            )
        });
        if removed > 0 {
            info!("配置变更后移除 {} 个不再符合条件的条目", removed);
        }
        removed
    }

    /// 请求中止正在进行的全量构建
    pub fn cancel_build(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 在阻塞线程池中调用文件存储
    async fn call_store<T, F>(&self, path: &Path, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FileStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StoreError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::other(e.to_string()),
            })?
    }

    /// 全量构建 root，完成后整体替换内存索引
    pub async fn build_index(&self, root: &Path) -> BuildOutcome {
        let _guard = self.write_lock.lock().await;
        self.set_root(root);
        self.cancel.store(false, Ordering::SeqCst);
        let status = self.index.status();
        status.begin();
        info!("开始构建索引: {}", root.display());

        let walk = self.walk(root, true).await;
        self.cancel.store(false, Ordering::SeqCst);
        if walk.cancelled {
            status.abort();
            info!("索引构建已取消，保留原有索引");
            return BuildOutcome::Cancelled;
        }

        let indexed = walk.entries.len();
        self.index.replace_all(walk.entries);
        status.finish(Utc::now());
        info!(
            "索引构建完成: {} 个条目，{} 个目录无法读取",
            indexed, walk.failed_dirs
        );
        BuildOutcome::Completed {
            indexed,
            failed_dirs: walk.failed_dirs,
        }
    }

    /// full_build 为 true 时汇报进度并响应取消
    async fn walk(&self, root: &Path, full_build: bool) -> Walk {
        let config = self.config();
        let index_root = self.root().unwrap_or_else(|| root.to_path_buf());
        let status = self.index.status();
        let mut walk = Walk {
            entries: Vec::new(),
            failed_dirs: 0,
            cancelled: false,
        };
        let mut discovered = 0usize;
        let mut processed = 0usize;
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            if full_build && self.cancelled() {
                walk.cancelled = true;
                return walk;
            }
            let include_hidden = config.index_hidden;
            let listed = self
                .call_store(&dir, {
                    let dir = dir.clone();
                    move |s| s.list_children(&dir, include_hidden)
                })
                .await;
            let children = match listed {
                Ok(c) => c,
                Err(e) => {
                    // 只放弃这棵子树
                    warn!("无法列举目录 {}: {}", dir.display(), e);
                    walk.failed_dirs += 1;
                    continue;
                }
            };
            discovered += children.len();

            for item in children {
                if full_build && self.cancelled() {
                    walk.cancelled = true;
                    return walk;
                }
                if should_index_item(&config, Some(&index_root), &item) {
                    if item.is_dir() {
                        stack.push(item.path.clone());
                    }
                    walk.entries.push(self.build_entry(item, &config).await);
                }
                processed += 1;
                if full_build {
                    let percent = (processed * 100 / discovered.max(1)).min(99);
                    status.set_progress(percent as u8);
                }
            }
        }
        walk
    }

    /// 为单个条目生成索引记录，内容读取失败时退化为仅元数据
    async fn build_entry(&self, item: FileItem, config: &EngineConfig) -> IndexEntry {
        let body = match item.kind {
            EntryKind::Folder => EntryBody::Folder,
            EntryKind::File => {
                let wants_content = item
                    .extension
                    .as_deref()
                    .map(config::is_text_extension)
                    .unwrap_or(false)
                    && item.size <= config.max_content_file_size;
                if wants_content {
                    let path = item.path.clone();
                    let max_chars = config.max_content_chars;
                    match self
                        .call_store(&item.path, move |s| s.read_content(&path, max_chars))
                        .await
                    {
                        Ok(text) => {
                            let word_freq = word_frequencies(&text);
                            EntryBody::FileWithContent { text, word_freq }
                        }
                        Err(e) => {
                            warn!("读取内容失败，仅索引元数据 {}: {}", item.path.display(), e);
                            EntryBody::FileMetaOnly
                        }
                    }
                } else {
                    EntryBody::FileMetaOnly
                }
            }
        };
        IndexEntry::from_item(item, body, Utc::now())
    }

    /// 增量更新单个路径
    pub async fn update_file(&self, path: &Path) -> UpdateOutcome {
        let _guard = self.write_lock.lock().await;
        let config = self.config();

        let fetched = self
            .call_store(path, {
                let path = path.to_path_buf();
                move |s| s.metadata(&path)
            })
            .await;

        let item = match fetched {
            Ok(item) => item,
            Err(e) if e.is_not_found() => {
                let removed = self.index.remove_subtree(path);
                debug!("路径已删除，移除 {} 个条目: {}", removed, path.display());
                return UpdateOutcome::Removed(removed);
            }
            Err(e) => {
                warn!("获取元数据失败，本轮跳过 {}: {}", path.display(), e);
                return UpdateOutcome::Skipped;
            }
        };

        if !should_index_item(&config, self.root().as_deref(), &item) {
            let removed = self.index.remove_subtree(path);
            debug!("路径不再符合条件，移除 {} 个条目: {}", removed, path.display());
            return UpdateOutcome::Removed(removed);
        }

        let status = self.index.status();
        if item.is_dir() && !self.index.contains(path) {
            // 新出现的目录需要连同子树一起入索引
            let dir = item.path.clone();
            let entry = self.build_entry(item, &config).await;
            self.index.upsert(entry);
            let walk = self.walk(&dir, false).await;
            let count = walk.entries.len();
            for entry in walk.entries {
                self.index.upsert(entry);
            }
            status.touch(Utc::now());
            return UpdateOutcome::IndexedTree(count);
        }

        let entry = self.build_entry(item, &config).await;
        self.index.upsert(entry);
        status.touch(Utc::now());
        UpdateOutcome::Indexed
    }
}
