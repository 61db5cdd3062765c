use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// 文件存储返回的一条元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileItem {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
    pub extension: Option<String>,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub parent_path: Option<PathBuf>,
    pub owner: Option<String>,
    pub tags: BTreeSet<String>,
}

impl FileItem {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// 条目主体：目录 / 仅元数据文件 / 带内容文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryBody {
    Folder,
    FileMetaOnly,
    FileWithContent {
        text: String,
        word_freq: HashMap<String, u32>,
    },
}

/// 索引中的一条记录，按 path 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub name: String,
    pub extension: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub parent_path: Option<PathBuf>,
    pub owner: Option<String>,
    pub tags: BTreeSet<String>,
    pub indexed_at: DateTime<Utc>,
    pub body: EntryBody,
}

impl IndexEntry {
    pub fn from_item(item: FileItem, body: EntryBody, indexed_at: DateTime<Utc>) -> Self {
        Self {
            path: item.path,
            name: item.name,
            extension: item.extension,
            modified_at: item.modified_at,
            created_at: item.created_at,
            size_bytes: item.size,
            parent_path: item.parent_path,
            owner: item.owner,
            tags: item.tags,
            indexed_at,
            body,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self.body {
            EntryBody::Folder => EntryKind::Folder,
            _ => EntryKind::File,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Folder
    }

    pub fn content(&self) -> Option<&str> {
        match &self.body {
            EntryBody::FileWithContent { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn word_freq(&self) -> Option<&HashMap<String, u32>> {
        match &self.body {
            EntryBody::FileWithContent { word_freq, .. } => Some(word_freq),
            _ => None,
        }
    }

    /// 路径段数，根目录为 0
    pub fn depth(&self) -> usize {
        path_depth(&self.path)
    }
}

pub fn path_depth(path: &Path) -> usize {
    path.components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFilter {
    #[default]
    All,
    File,
    Folder,
}

impl TypeFilter {
    pub fn accepts(&self, kind: EntryKind) -> bool {
        match self {
            Self::All => true,
            Self::File => kind == EntryKind::File,
            Self::Folder => kind == EntryKind::Folder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Relevance,
    Name,
    Date,
    Size,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// 搜索范围，None = 整个索引
    pub scope: Option<PathBuf>,
    pub type_filter: TypeFilter,
    pub fuzzy: bool,
    /// None = 使用配置中的默认值
    pub max_results: Option<usize>,
    pub sort_by: SortBy,
    pub offset: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            scope: None,
            type_filter: TypeFilter::All,
            fuzzy: true,
            max_results: None,
            sort_by: SortBy::Relevance,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Name,
    Content,
}

/// 高亮区间，start/end 为 text 内的字符偏移（end 不含）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpan {
    pub field: MatchField,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entry: Arc<IndexEntry>,
    pub score: f64,
    pub matches: Vec<MatchSpan>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// 分页前的命中总数
    pub total: usize,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub item_count: usize,
    pub file_count: usize,
    pub folder_count: usize,
    pub total_size_bytes: u64,
    pub content_indexed_count: usize,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub is_indexing: bool,
    pub progress_percent: u8,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// 文件变更通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}
