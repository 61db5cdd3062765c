use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::kv::{self, KeyValueStore};

/// 持久化设置使用的键
pub const SETTINGS_KEY: &str = "search.settings";
pub const HISTORY_KEY: &str = "search.history";

/// 词频表保留的词数
pub const MAX_WORD_FREQ: usize = 100;

/// 内容片段左右各保留的字符数
pub const SNIPPET_CONTEXT_CHARS: usize = 40;

/// 文本文件扩展名（只有这些才抽取内容）
pub const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "rs", "py", "js", "ts", "jsx", "tsx", "html", "css", "scss",
    "json", "xml", "yaml", "yml", "toml", "md", "sh", "bat", "cmd",
    "c", "cpp", "h", "hpp", "java", "kt", "go", "rb", "php", "sql",
    "lua", "vim", "conf", "cfg", "ini", "env", "log", "csv",
    "dockerfile", "makefile", "cmake", "gradle",
    "swift", "cs", "fs", "r", "pl", "ex", "exs", "hs",
    "vue", "svelte", "astro", "prisma", "graphql", "proto",
    "gitignore", "editorconfig", "prettierrc",
];

static TEXT_EXTENSION_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| TEXT_EXTENSIONS.iter().copied().collect());

pub fn is_text_extension(ext: &str) -> bool {
    TEXT_EXTENSION_SET.contains(ext.to_lowercase().as_str())
}

/// 引擎配置，构造时传入，运行期只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 绝对路径按段前缀排除；不含分隔符的名字匹配任意一级目录
    pub excluded_folders: Vec<String>,
    pub excluded_extensions: Vec<String>,
    /// 超过此大小的文件不入索引
    pub max_file_size: u64,
    /// 超过此大小的文本文件只索引元数据
    pub max_content_file_size: u64,
    pub max_content_chars: usize,
    pub index_hidden: bool,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    pub history_limit: usize,
    pub default_max_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            excluded_folders: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
                "$RECYCLE.BIN".to_string(),
                "System Volume Information".to_string(),
            ],
            excluded_extensions: vec![
                "tmp".to_string(),
                "temp".to_string(),
                "swp".to_string(),
                "bak".to_string(),
                "lock".to_string(),
            ],
            max_file_size: 100 * 1024 * 1024,
            max_content_file_size: 1024 * 1024,
            max_content_chars: 50_000,
            index_hidden: false,
            cache_ttl_ms: 5_000,
            cache_capacity: 128,
            history_limit: 50,
            default_max_results: 100,
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// 是否改变了入索引的判定规则
    pub fn eligibility_differs(&self, other: &Self) -> bool {
        self.excluded_folders != other.excluded_folders
            || self.excluded_extensions != other.excluded_extensions
            || self.max_file_size != other.max_file_size
            || self.max_content_file_size != other.max_content_file_size
            || self.max_content_chars != other.max_content_chars
            || self.index_hidden != other.index_hidden
    }

    /// 从持久化层读取，缺失或损坏时回落到默认值
    pub fn load(store: &dyn KeyValueStore) -> Self {
        kv::load_or_default(store, SETTINGS_KEY)
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> anyhow::Result<()> {
        kv::save_json(store, SETTINGS_KEY, self)
    }
}

/// 数据保存目录
pub fn data_dir() -> PathBuf {
    let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("StarIndex");
    std::fs::create_dir_all(&p).ok();
    p
}

pub fn settings_db_path() -> PathBuf {
    data_dir().join("starindex.redb")
}
