use chrono::{Duration as ChronoDuration, Utc};
use starindex::types::ChangeKind;
use starindex::{
    BuildOutcome, EngineConfig, LocalFileStore, MemoryFileStore, MemoryKv, RedbStore,
    SearchEngine, SearchOptions, UpdateOutcome,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn exact() -> SearchOptions {
    SearchOptions {
        fuzzy: false,
        ..SearchOptions::default()
    }
}

fn result_paths(engine: &SearchEngine, query: &str, options: &SearchOptions) -> Vec<String> {
    engine
        .search(query, options)
        .unwrap()
        .results
        .iter()
        .map(|r| r.entry.path.to_string_lossy().to_string())
        .collect()
}

fn docs_store() -> Arc<MemoryFileStore> {
    let store = Arc::new(MemoryFileStore::new());
    store.add_file("/docs/report.txt", "quarterly revenue growth");
    store.add_file_at(
        "/docs/old/report_old.txt",
        "nothing to see",
        Utc::now() - ChronoDuration::days(730),
    );
    store
}

fn engine_with(store: Arc<MemoryFileStore>, config: EngineConfig) -> SearchEngine {
    SearchEngine::new("/", config, store, Arc::new(MemoryKv::new())).unwrap()
}

#[tokio::test]
async fn basic_search_ranks_recent_file_first() {
    let engine = engine_with(docs_store(), EngineConfig::default());
    let outcome = engine.rebuild_index().await;
    assert_eq!(
        outcome,
        BuildOutcome::Completed {
            indexed: 4,
            failed_dirs: 0
        }
    );

    assert_eq!(
        result_paths(&engine, "report", &exact()),
        vec!["/docs/report.txt", "/docs/old/report_old.txt"]
    );
    assert_eq!(
        result_paths(&engine, "revenue", &exact()),
        vec!["/docs/report.txt"]
    );
}

#[tokio::test]
async fn excluded_extension_never_enters_index() {
    let store = docs_store();
    store.add_file("/tmp/cache.tmp", "cached");
    let engine = engine_with(store, EngineConfig::default());
    engine.rebuild_index().await;
    assert!(result_paths(&engine, "cache.tmp", &exact()).is_empty());

    let outcome = engine.update_file(Path::new("/tmp/cache.tmp")).await;
    assert_eq!(outcome, UpdateOutcome::Removed(0));
    assert!(result_paths(&engine, "cache", &SearchOptions::default()).is_empty());
}

#[tokio::test]
async fn empty_query_leaves_history_alone() {
    let engine = engine_with(docs_store(), EngineConfig::default());
    engine.rebuild_index().await;
    engine.search("report", &exact()).unwrap();

    let resp = engine.search("", &SearchOptions::default()).unwrap();
    assert!(resp.results.is_empty());
    assert_eq!(engine.recent_searches(10), vec!["report"]);
}

#[tokio::test]
async fn deleted_file_disappears_after_update() {
    let store = docs_store();
    let engine = engine_with(store.clone(), EngineConfig::default());
    engine.rebuild_index().await;
    assert_eq!(result_paths(&engine, "report.txt", &exact())[0], "/docs/report.txt");

    store.remove("/docs/report.txt");
    let outcome = engine.update_file(Path::new("/docs/report.txt")).await;
    assert_eq!(outcome, UpdateOutcome::Removed(1));

    let options = SearchOptions {
        type_filter: starindex::TypeFilter::File,
        ..exact()
    };
    let paths = result_paths(&engine, "report.txt", &options);
    assert!(!paths.contains(&"/docs/report.txt".to_string()));
}

#[tokio::test]
async fn reindexing_unchanged_file_keeps_one_entry() {
    let config = EngineConfig {
        cache_ttl_ms: 0,
        ..EngineConfig::default()
    };
    let engine = engine_with(docs_store(), config);
    engine.rebuild_index().await;
    let path = Path::new("/docs/report.txt");

    engine.update_file(path).await;
    let first = engine.search("report.txt", &exact()).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    engine.update_file(path).await;
    let second = engine.search("report.txt", &exact()).unwrap();

    assert_eq!(engine.index_stats().item_count, 4);
    let hits: Vec<_> = second
        .results
        .iter()
        .filter(|r| r.entry.path == path)
        .collect();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].entry.indexed_at > first.results[0].entry.indexed_at);
}

#[tokio::test]
async fn cache_serves_repeats_until_ttl() {
    let config = EngineConfig {
        cache_ttl_ms: 200,
        ..EngineConfig::default()
    };
    let store = docs_store();
    let engine = engine_with(store.clone(), config);
    engine.rebuild_index().await;

    let first = engine.search("report", &exact()).unwrap();
    let second = engine.search("report", &exact()).unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.total, second.total);

    // 缓存有效期内看不到增量更新，过期后重新计算
    store.add_file("/docs/report", "");
    engine.update_file(Path::new("/docs/report")).await;
    assert_eq!(engine.search("report", &exact()).unwrap().total, 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let fresh = engine.search("report", &exact()).unwrap();
    assert!(!fresh.from_cache);
    assert_eq!(fresh.total, 3);
    assert_eq!(fresh.results[0].entry.path, Path::new("/docs/report"));
}

#[tokio::test]
async fn history_is_deduplicated_most_recent_first() {
    let engine = engine_with(docs_store(), EngineConfig::default());
    for q in ["a", "b", "a"] {
        engine.search(q, &SearchOptions::default()).unwrap();
    }
    assert_eq!(engine.recent_searches(10), vec!["a", "b"]);
    engine.clear_history();
    assert!(engine.recent_searches(10).is_empty());
}

#[tokio::test]
async fn watcher_notifications_flow_through_queue() {
    let store = docs_store();
    let engine = SearchEngine::new(
        "/docs",
        EngineConfig::default(),
        store.clone(),
        Arc::new(MemoryKv::new()),
    )
    .unwrap();
    engine.rebuild_index().await;
    engine.watch().unwrap();

    store.add_folder("/docs/new");
    store.add_file("/docs/new/minutes.md", "budget meeting");
    store.emit(ChangeKind::Created, "/docs/new");
    engine.wait_idle().await;
    assert_eq!(
        result_paths(&engine, "budget", &exact()),
        vec!["/docs/new/minutes.md"]
    );

    store.remove("/docs/new");
    store.emit(ChangeKind::Deleted, "/docs/new");
    // 通知范围之外的路径不会送达
    store.add_file("/elsewhere/minutes.md", "budget");
    store.emit(ChangeKind::Created, "/elsewhere/minutes.md");
    engine.wait_idle().await;
    assert!(result_paths(&engine, "minutes", &SearchOptions::default()).is_empty());
    engine.shutdown();
}

#[tokio::test]
async fn stale_cancel_request_does_not_abort_next_build() {
    let store = docs_store();
    let engine = engine_with(store.clone(), EngineConfig::default());
    engine.rebuild_index().await;
    let before = engine.index_stats().item_count;

    store.add_file("/docs/extra.txt", "more");
    engine.cancel_build();
    // 取消标记只作用于已开始的构建，新构建会正常完成
    let outcome = engine.rebuild_index().await;
    assert!(matches!(outcome, BuildOutcome::Completed { .. }));
    assert_eq!(engine.index_stats().item_count, before + 1);
}

#[tokio::test]
async fn search_sees_previous_index_while_rebuild_runs() {
    let store = Arc::new(MemoryFileStore::new());
    store.add_file("/docs/alpha.txt", "first");
    store.add_file("/docs/beta.txt", "second");
    store.add_file("/docs/sub/gamma.txt", "third");
    let engine = Arc::new(
        SearchEngine::new(
            "/docs",
            EngineConfig::default(),
            store.clone(),
            Arc::new(MemoryKv::new()),
        )
        .unwrap(),
    );
    engine.rebuild_index().await;
    let before = engine.index_stats().item_count;

    store.add_file("/docs/sub/fresh.txt", "new arrival");
    let gate = store.gate_listing("/docs/sub");
    let rebuild = tokio::spawn({
        let engine = engine.clone();
        async move { engine.rebuild_index().await }
    });
    let arrived = gate.clone();
    tokio::task::spawn_blocking(move || arrived.wait()).await.unwrap();

    // 构建停在子目录上：状态可见，查询不被阻塞且仍读旧索引
    let stats = engine.index_stats();
    assert!(stats.is_indexing);
    assert!(stats.progress_percent > 0 && stats.progress_percent < 100);
    assert_eq!(stats.item_count, before);
    assert!(result_paths(&engine, "fresh", &exact()).is_empty());
    assert_eq!(result_paths(&engine, "alpha", &exact()), vec!["/docs/alpha.txt"]);

    let release = gate.clone();
    tokio::task::spawn_blocking(move || release.wait()).await.unwrap();
    let outcome = rebuild.await.unwrap();
    assert!(matches!(outcome, BuildOutcome::Completed { .. }));

    let stats = engine.index_stats();
    assert!(!stats.is_indexing);
    assert_eq!(stats.progress_percent, 100);
    assert_eq!(stats.item_count, before + 1);
    assert_eq!(
        result_paths(&engine, "fresh", &exact()),
        vec!["/docs/sub/fresh.txt"]
    );
}

#[tokio::test]
async fn indexes_real_directory_and_persists_history() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("tree");
    std::fs::create_dir_all(root.join("notes")).unwrap();
    std::fs::write(root.join("notes").join("todo.txt"), "buy milk and eggs").unwrap();
    std::fs::write(root.join("image.bin"), [0u8, 1, 2, 3]).unwrap();
    std::fs::write(root.join("scratch.tmp"), "temp").unwrap();
    std::fs::create_dir_all(root.join("node_modules").join("pkg")).unwrap();
    std::fs::write(root.join("node_modules").join("pkg").join("todo.js"), "x").unwrap();

    let kv = Arc::new(RedbStore::open(&dir.path().join("state.redb")).unwrap());
    {
        let engine = SearchEngine::new(
            &root,
            EngineConfig::default(),
            Arc::new(LocalFileStore::new()),
            kv.clone(),
        )
        .unwrap();
        engine.rebuild_index().await;

        let stats = engine.index_stats();
        assert_eq!(stats.item_count, 3);
        assert_eq!(stats.folder_count, 1);
        assert_eq!(stats.content_indexed_count, 1);

        let todo = result_paths(&engine, "todo", &SearchOptions::default());
        assert_eq!(todo, vec![root.join("notes").join("todo.txt").to_string_lossy().to_string()]);
        assert_eq!(result_paths(&engine, "milk", &exact()).len(), 1);
        assert!(result_paths(&engine, "scratch", &exact()).is_empty());
        engine.shutdown();
    }

    // 新实例从 redb 读回历史
    let engine =
        SearchEngine::with_saved_settings(&root, Arc::new(LocalFileStore::new()), kv).unwrap();
    assert_eq!(engine.recent_searches(10), vec!["scratch", "milk", "todo"]);
}
