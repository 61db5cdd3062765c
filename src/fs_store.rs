use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs::{File, Metadata};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::types::{ChangeEvent, ChangeKind, EntryKind, FileItem};

pub type ChangeCallback = Box<dyn Fn(ChangeEvent) + Send + Sync + 'static>;

/// 订阅句柄，drop 即取消订阅
pub struct WatchGuard {
    _inner: Box<dyn std::any::Any + Send>,
}

impl WatchGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// 分层文件存储接口。调用可能阻塞，索引器通过 spawn_blocking 调用
pub trait FileStore: Send + Sync + 'static {
    fn list_children(&self, path: &Path, include_hidden: bool) -> Result<Vec<FileItem>, StoreError>;

    fn metadata(&self, path: &Path) -> Result<FileItem, StoreError>;

    /// 读取文本内容，最多 max_chars 个字符
    fn read_content(&self, path: &Path, max_chars: usize) -> Result<String, StoreError>;

    /// 回调必须尽快返回
    fn subscribe(&self, path: &Path, callback: ChangeCallback) -> Result<WatchGuard, StoreError>;
}

/// 本地磁盘实现
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

fn item_from_metadata(path: &Path, metadata: &Metadata) -> FileItem {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    let is_dir = metadata.is_dir();
    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    // 部分文件系统不记录创建时间
    let created_at = metadata
        .created()
        .map(DateTime::<Utc>::from)
        .unwrap_or(modified_at);

    FileItem {
        extension: if is_dir {
            None
        } else {
            path.extension()
                .and_then(|s| s.to_str())
                .map(|s| s.to_lowercase())
        },
        path: path.to_path_buf(),
        name,
        kind: if is_dir { EntryKind::Folder } else { EntryKind::File },
        size: if is_dir { 0 } else { metadata.len() },
        modified_at,
        created_at,
        parent_path: path.parent().map(Path::to_path_buf),
        owner: owner_of(metadata),
        tags: BTreeSet::new(),
    }
}

#[cfg(unix)]
fn owner_of(metadata: &Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.uid().to_string())
}

#[cfg(not(unix))]
fn owner_of(_metadata: &Metadata) -> Option<String> {
    None
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// 智能检测编码：先尝试 UTF-8，失败再按 GBK 解码
fn decode_text(mut bytes: Vec<u8>, truncated: bool) -> String {
    if truncated {
        // 截断可能切在多字节字符中间
        if let Err(e) = std::str::from_utf8(&bytes) {
            if e.error_len().is_none() {
                bytes.truncate(e.valid_up_to());
            }
        }
    }
    let (decoded_utf8, _, had_errors_utf8) = encoding_rs::UTF_8.decode(&bytes);
    if !had_errors_utf8 {
        decoded_utf8.into_owned()
    } else {
        let (decoded_gbk, _, _) = encoding_rs::GBK.decode(&bytes);
        decoded_gbk.into_owned()
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

impl FileStore for LocalFileStore {
    fn list_children(&self, path: &Path, include_hidden: bool) -> Result<Vec<FileItem>, StoreError> {
        let mut items = Vec::new();
        for entry in WalkDir::new(path).min_depth(0).max_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    // 目录本身无法读取时整棵子树放弃，单个子项失败只跳过
                    if e.depth() == 0 {
                        let kind = e.io_error().map(|io| io.kind()).unwrap_or(std::io::ErrorKind::Other);
                        return Err(StoreError::from_io(path, std::io::Error::new(kind, e.to_string())));
                    }
                    debug!("跳过无法读取的条目: {}", e);
                    continue;
                }
            };
            if entry.depth() == 0 {
                if !entry.file_type().is_dir() {
                    return Err(StoreError::Io {
                        path: path.to_path_buf(),
                        source: std::io::Error::other("不是目录"),
                    });
                }
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if !include_hidden && is_hidden(&name) {
                continue;
            }
            match entry.metadata() {
                Ok(m) => items.push(item_from_metadata(entry.path(), &m)),
                Err(e) => debug!("跳过无法获取元数据的条目 {}: {}", entry.path().display(), e),
            }
        }
        Ok(items)
    }

    fn metadata(&self, path: &Path) -> Result<FileItem, StoreError> {
        let metadata = std::fs::metadata(path).map_err(|e| StoreError::from_io(path, e))?;
        Ok(item_from_metadata(path, &metadata))
    }

    fn read_content(&self, path: &Path, max_chars: usize) -> Result<String, StoreError> {
        let file = File::open(path).map_err(|e| StoreError::from_io(path, e))?;
        // 一个字符最多 4 字节
        let limit = (max_chars as u64).saturating_mul(4);
        let mut bytes = Vec::new();
        file.take(limit)
            .read_to_end(&mut bytes)
            .map_err(|e| StoreError::from_io(path, e))?;
        let truncated = bytes.len() as u64 == limit;
        let text = decode_text(bytes, truncated);
        Ok(text.chars().take(max_chars).collect())
    }

    fn subscribe(&self, path: &Path, callback: ChangeCallback) -> Result<WatchGuard, StoreError> {
        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let Some(kind) = change_kind(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    callback(ChangeEvent { kind, path });
                }
            }
            Err(e) => warn!("文件监听出错: {}", e),
        })
        .map_err(|e| StoreError::Watch(e.to_string()))?;

        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|e| StoreError::Watch(e.to_string()))?;
        Ok(WatchGuard::new(watcher))
    }
}
