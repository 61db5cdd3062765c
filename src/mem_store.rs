use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};

use crate::error::StoreError;
use crate::fs_store::{ChangeCallback, FileStore, WatchGuard};
use crate::types::{ChangeEvent, ChangeKind, EntryKind, FileItem};

struct Node {
    item: FileItem,
    content: Option<String>,
}

type Subscribers = Arc<Mutex<Vec<(u64, PathBuf, Arc<ChangeCallback>)>>>;

/// 内存文件存储，可注入读取/列举失败，供测试与非磁盘数据源使用
#[derive(Default)]
pub struct MemoryFileStore {
    nodes: Mutex<BTreeMap<PathBuf, Node>>,
    failing_lists: Mutex<HashSet<PathBuf>>,
    failing_reads: Mutex<HashSet<PathBuf>>,
    gated_lists: Mutex<HashMap<PathBuf, Arc<Barrier>>>,
    subscribers: Subscribers,
    next_id: AtomicU64,
}

struct Subscription {
    id: u64,
    subscribers: Subscribers,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.lock().retain(|(id, _, _)| *id != self.id);
    }
}

fn new_item(path: &Path, kind: EntryKind, size: u64, modified_at: DateTime<Utc>) -> FileItem {
    FileItem {
        path: path.to_path_buf(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        kind,
        extension: match kind {
            EntryKind::Folder => None,
            EntryKind::File => path
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_lowercase()),
        },
        size,
        modified_at,
        created_at: modified_at,
        parent_path: path.parent().map(Path::to_path_buf),
        owner: None,
        tags: BTreeSet::new(),
    }
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_parents(nodes: &mut BTreeMap<PathBuf, Node>, path: &Path) {
        let now = Utc::now();
        for ancestor in path.ancestors().skip(1) {
            if ancestor.parent().is_none() || ancestor.as_os_str().is_empty() {
                break;
            }
            nodes.entry(ancestor.to_path_buf()).or_insert_with(|| Node {
                item: new_item(ancestor, EntryKind::Folder, 0, now),
                content: None,
            });
        }
    }

    pub fn add_folder(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut nodes = self.nodes.lock();
        Self::ensure_parents(&mut nodes, path);
        nodes.insert(
            path.to_path_buf(),
            Node {
                item: new_item(path, EntryKind::Folder, 0, Utc::now()),
                content: None,
            },
        );
    }

    /// 新增或覆盖文件，大小取内容字节数，修改时间为当前
    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) {
        self.add_file_at(path, content, Utc::now());
    }

    pub fn add_file_at(&self, path: impl AsRef<Path>, content: &str, modified_at: DateTime<Utc>) {
        let path = path.as_ref();
        let item = new_item(path, EntryKind::File, content.len() as u64, modified_at);
        self.put(item, Some(content.to_string()));
    }

    /// 只有元数据的文件（例如二进制文件）
    pub fn add_blob(&self, path: impl AsRef<Path>, size: u64) {
        let path = path.as_ref();
        self.put(new_item(path, EntryKind::File, size, Utc::now()), None);
    }

    pub fn put(&self, item: FileItem, content: Option<String>) {
        let mut nodes = self.nodes.lock();
        Self::ensure_parents(&mut nodes, &item.path);
        nodes.insert(item.path.clone(), Node { item, content });
    }

    pub fn set_tags(&self, path: impl AsRef<Path>, tags: &[&str]) {
        if let Some(node) = self.nodes.lock().get_mut(path.as_ref()) {
            node.item.tags = tags.iter().map(|t| t.to_string()).collect();
        }
    }

    /// 删除路径及其全部子项
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.nodes.lock().retain(|p, _| !p.starts_with(path));
    }

    pub fn fail_listing(&self, path: impl AsRef<Path>) {
        self.failing_lists.lock().insert(path.as_ref().to_path_buf());
    }

    pub fn fail_reading(&self, path: impl AsRef<Path>) {
        self.failing_reads.lock().insert(path.as_ref().to_path_buf());
    }

    /// 下一次列举该目录时停住：调用方第一次 wait 表示已到达，第二次 wait 放行。
    /// 只生效一次
    pub fn gate_listing(&self, path: impl AsRef<Path>) -> Arc<Barrier> {
        let gate = Arc::new(Barrier::new(2));
        self.gated_lists
            .lock()
            .insert(path.as_ref().to_path_buf(), gate.clone());
        gate
    }

    /// 向覆盖该路径的订阅者推送通知
    pub fn emit(&self, kind: ChangeKind, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let targets: Vec<Arc<ChangeCallback>> = self
            .subscribers
            .lock()
            .iter()
            .filter(|(_, root, _)| path.starts_with(root))
            .map(|(_, _, cb)| cb.clone())
            .collect();
        for cb in targets {
            cb(ChangeEvent {
                kind,
                path: path.to_path_buf(),
            });
        }
    }
}

impl FileStore for MemoryFileStore {
    fn list_children(&self, path: &Path, include_hidden: bool) -> Result<Vec<FileItem>, StoreError> {
        let gate = self.gated_lists.lock().remove(path);
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        if self.failing_lists.lock().contains(path) {
            return Err(StoreError::PermissionDenied(path.to_path_buf()));
        }
        let nodes = self.nodes.lock();
        if let Some(node) = nodes.get(path) {
            if !node.item.is_dir() {
                return Err(StoreError::NotFound(path.to_path_buf()));
            }
        }
        let children: Vec<FileItem> = nodes
            .values()
            .filter(|n| n.item.parent_path.as_deref() == Some(path))
            .filter(|n| include_hidden || !n.item.name.starts_with('.'))
            .map(|n| n.item.clone())
            .collect();
        if children.is_empty() && !nodes.contains_key(path) {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Ok(children)
    }

    fn metadata(&self, path: &Path) -> Result<FileItem, StoreError> {
        self.nodes
            .lock()
            .get(path)
            .map(|n| n.item.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))
    }

    fn read_content(&self, path: &Path, max_chars: usize) -> Result<String, StoreError> {
        if self.failing_reads.lock().contains(path) {
            return Err(StoreError::PermissionDenied(path.to_path_buf()));
        }
        let nodes = self.nodes.lock();
        let node = nodes
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_path_buf()))?;
        Ok(node
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(max_chars)
            .collect())
    }

    fn subscribe(&self, path: &Path, callback: ChangeCallback) -> Result<WatchGuard, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .push((id, path.to_path_buf(), Arc::new(callback)));
        Ok(WatchGuard::new(Subscription {
            id,
            subscribers: self.subscribers.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_create_their_parent_folders() {
        let store = MemoryFileStore::new();
        store.add_file("/docs/a/b.txt", "hi");
        let root = store.list_children(Path::new("/"), false).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].name, "docs");
        assert!(root[0].is_dir());
        let inner = store.list_children(Path::new("/docs/a"), false).unwrap();
        assert_eq!(inner[0].extension.as_deref(), Some("txt"));
        assert_eq!(inner[0].size, 2);
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let store = MemoryFileStore::new();
        store.add_file("/x/y.txt", "data");
        store.fail_listing("/x");
        store.fail_reading("/x/y.txt");
        assert!(store.list_children(Path::new("/x"), false).is_err());
        assert!(store.read_content(Path::new("/x/y.txt"), 10).is_err());
        assert!(store.metadata(Path::new("/x/y.txt")).is_ok());
    }

    #[test]
    fn dropping_guard_stops_notifications() {
        let store = MemoryFileStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let guard = store
            .subscribe(
                Path::new("/w"),
                Box::new(move |ev| sink.lock().push(ev.path)),
            )
            .unwrap();
        store.emit(ChangeKind::Created, "/w/a.txt");
        store.emit(ChangeKind::Created, "/other/b.txt");
        drop(guard);
        store.emit(ChangeKind::Created, "/w/c.txt");
        assert_eq!(*seen.lock(), vec![PathBuf::from("/w/a.txt")]);
    }
}
