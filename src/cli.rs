use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::{self, EngineConfig};
use crate::engine::SearchEngine;
use crate::fs_store::LocalFileStore;
use crate::indexer::BuildOutcome;
use crate::kv::{KeyValueStore, RedbStore};
use crate::types::{SearchOptions, SortBy, TypeFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TypeArg {
    All,
    File,
    Folder,
}

impl From<TypeArg> for TypeFilter {
    fn from(t: TypeArg) -> Self {
        match t {
            TypeArg::All => TypeFilter::All,
            TypeArg::File => TypeFilter::File,
            TypeArg::Folder => TypeFilter::Folder,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortArg {
    Relevance,
    Name,
    Date,
    Size,
}

impl From<SortArg> for SortBy {
    fn from(s: SortArg) -> Self {
        match s {
            SortArg::Relevance => SortBy::Relevance,
            SortArg::Name => SortBy::Name,
            SortArg::Date => SortBy::Date,
            SortArg::Size => SortBy::Size,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "星TAP 文件索引与检索（JSON 输出）", long_about = None)]
pub struct CliArgs {
    /// 要建立索引的根目录（默认=当前目录）
    #[arg(short = 'r', long = "root")]
    pub root: Option<PathBuf>,

    /// 搜索关键词
    #[arg(short = 'q', long = "query")]
    pub query: Option<String>,

    /// 只在该目录下搜索
    #[arg(short = 's', long = "scope")]
    pub scope: Option<PathBuf>,

    /// 结果类型
    #[arg(short = 't', long = "type", value_enum, default_value_t = TypeArg::All)]
    pub type_filter: TypeArg,

    /// 排序方式
    #[arg(long = "sort", value_enum, default_value_t = SortArg::Relevance)]
    pub sort: SortArg,

    /// 关闭模糊匹配
    #[arg(long = "no-fuzzy")]
    pub no_fuzzy: bool,

    /// 最大结果数（默认取配置）
    #[arg(short = 'm', long = "max-results")]
    pub max_results: Option<usize>,

    /// 跳过前 N 条结果
    #[arg(long = "offset", default_value_t = 0)]
    pub offset: usize,

    /// 输出索引统计
    #[arg(long = "stats")]
    pub stats: bool,

    /// 输出最近的搜索历史
    #[arg(long = "history")]
    pub history: bool,

    /// 常驻监听变更，并从标准输入逐行读取查询
    #[arg(short = 'w', long = "watch")]
    pub watch: bool,

    /// 单个文件大小上限（字节）
    #[arg(long = "max-file-size")]
    pub max_file_size: Option<u64>,

    /// 追加排除的目录（名称或绝对路径，可重复）
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// 追加排除的扩展名（可重复）
    #[arg(long = "exclude-ext")]
    pub exclude_ext: Vec<String>,

    /// 结果缓存有效期（毫秒）
    #[arg(long = "cache-ttl-ms")]
    pub cache_ttl_ms: Option<u64>,

    /// 保存本次生效的配置
    #[arg(long = "save-settings")]
    pub save_settings: bool,

    /// 输出调试日志
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl CliArgs {
    /// 在已保存的配置上叠加命令行参数
    pub fn apply_overrides(&self, mut config: EngineConfig) -> EngineConfig {
        if let Some(size) = self.max_file_size {
            config.max_file_size = size;
        }
        for folder in &self.exclude {
            if !config.excluded_folders.contains(folder) {
                config.excluded_folders.push(folder.clone());
            }
        }
        for ext in &self.exclude_ext {
            let ext = ext.trim_start_matches('.').to_lowercase();
            if !config.excluded_extensions.contains(&ext) {
                config.excluded_extensions.push(ext);
            }
        }
        if let Some(ttl) = self.cache_ttl_ms {
            config.cache_ttl_ms = ttl;
        }
        config
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            scope: self.scope.clone(),
            type_filter: self.type_filter.into(),
            fuzzy: !self.no_fuzzy,
            max_results: self.max_results,
            sort_by: self.sort.into(),
            offset: self.offset,
        }
    }
}

fn search_json(engine: &SearchEngine, query: &str, options: &SearchOptions) -> Value {
    match engine.search(query, options) {
        Ok(resp) => json!({
            "code": 0,
            "msg": "success",
            "query": query,
            "total": resp.total,
            "from_cache": resp.from_cache,
            "elapsed_ms": resp.elapsed_ms,
            "results": resp.results,
        }),
        Err(e) => json!({
            "code": 1,
            "msg": e.to_string(),
            "query": query,
            "results": [],
        }),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// CLI入口
pub async fn run_cli(args: CliArgs) -> Result<()> {
    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("无法获取当前目录")?,
    };
    let db_path = config::settings_db_path();
    let kv: Arc<dyn KeyValueStore> = Arc::new(RedbStore::open(&db_path)?);
    let config = args.apply_overrides(EngineConfig::load(kv.as_ref()));
    let engine = SearchEngine::new(&root, config, Arc::new(LocalFileStore::new()), kv)?;

    if args.save_settings {
        engine.save_settings()?;
        info!("配置已保存到 {}", db_path.display());
    }

    if let BuildOutcome::Completed { indexed, failed_dirs } = engine.rebuild_index().await {
        info!("已索引 {} 个条目（{} 个目录无法读取）", indexed, failed_dirs);
    }

    let options = args.search_options();
    if let Some(query) = &args.query {
        print_json(&search_json(&engine, query, &options))?;
    }
    if args.stats {
        print_json(&json!({ "code": 0, "msg": "success", "stats": engine.index_stats() }))?;
    }
    if args.history {
        print_json(&json!({ "code": 0, "msg": "success", "history": engine.recent_searches(50) }))?;
    }

    if args.watch {
        engine.watch()?;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        // 标准输入是阻塞读取，放到单独线程
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        while let Some(line) = rx.recv().await {
            let query = line.trim();
            match query {
                "" => continue,
                ":stats" => print_json(&json!({ "code": 0, "stats": engine.index_stats() }))?,
                ":history" => print_json(&json!({ "code": 0, "history": engine.recent_searches(50) }))?,
                ":quit" => break,
                _ => print_json(&search_json(&engine, query, &options))?,
            }
        }
    }

    engine.shutdown();
    Ok(())
}
