use chrono::Utc;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cache::{CacheKey, ResultCache};
use crate::error::SearchError;
use crate::history::HistoryTracker;
use crate::index::IndexStore;
use crate::relevance;
use crate::types::{SearchOptions, SearchResponse, SearchResult, SortBy};

/// 查询引擎：读索引、打分、排序、分页，并维护结果缓存和搜索历史。
/// 对索引只读。
pub struct Searcher {
    index: Arc<IndexStore>,
    cache: ResultCache,
    history: HistoryTracker,
}

fn by_path(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.entry.path.cmp(&b.entry.path)
}

fn by_relevance(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| by_path(a, b))
}

impl Searcher {
    pub fn new(index: Arc<IndexStore>, cache: ResultCache, history: HistoryTracker) -> Self {
        Self {
            index,
            cache,
            history,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn reconfigure(&self, ttl: Duration, capacity: usize, history_limit: usize) {
        self.cache.reconfigure(ttl, capacity);
        self.history.set_limit(history_limit);
    }

    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
        default_max_results: usize,
    ) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let max_results = options.max_results.unwrap_or(default_max_results);
        if max_results == 0 {
            return Err(SearchError::InvalidMaxResults);
        }

        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return Ok(SearchResponse::default());
        }

        // 1. 检查缓存
        let key = CacheKey::new(
            &normalized,
            options.scope.clone(),
            options.type_filter,
            options.fuzzy,
        );
        let (ranked, from_cache) = match self.cache.get(&key) {
            Some(ranked) => (ranked, true),
            None => {
                // 2. 打分排序并写入缓存
                let ranked = Arc::new(self.rank(&normalized, options));
                self.cache.put(key, ranked.clone());
                (ranked, false)
            }
        };

        // 3. 排序方式、分页
        let total = ranked.len();
        let results: Vec<SearchResult> = match options.sort_by {
            SortBy::Relevance => ranked
                .iter()
                .skip(options.offset)
                .take(max_results)
                .cloned()
                .collect(),
            other => {
                let mut sorted: Vec<SearchResult> = ranked.as_ref().clone();
                sort_results(&mut sorted, other);
                sorted
                    .into_iter()
                    .skip(options.offset)
                    .take(max_results)
                    .collect()
            }
        };

        self.history.record(query);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(
            "查询 '{}' 命中 {} 条，返回 {} 条，缓存 {}，耗时 {}ms",
            normalized,
            total,
            results.len(),
            from_cache,
            elapsed_ms
        );
        Ok(SearchResponse {
            results,
            total,
            from_cache,
            elapsed_ms,
        })
    }

    /// 遍历范围内条目并行打分，只保留得分大于 0 的条目
    fn rank(&self, normalized: &str, options: &SearchOptions) -> Vec<SearchResult> {
        let now = Utc::now();
        let candidates: Vec<_> = self
            .index
            .iterate(options.scope.as_deref())
            .filter(|e| options.type_filter.accepts(e.kind()))
            .collect();

        let mut results: Vec<SearchResult> = candidates
            .par_iter()
            .filter_map(|entry| {
                let score = relevance::score(entry, normalized, options.fuzzy, now);
                if score <= 0.0 {
                    return None;
                }
                Some(SearchResult {
                    matches: relevance::matches(entry, normalized),
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();

        results.sort_by(by_relevance);
        results
    }
}

/// 非相关度排序完全覆盖相关度顺序
fn sort_results(results: &mut [SearchResult], sort_by: SortBy) {
    match sort_by {
        SortBy::Relevance => results.sort_by(by_relevance),
        SortBy::Name => results.sort_by(|a, b| {
            a.entry
                .name
                .to_lowercase()
                .cmp(&b.entry.name.to_lowercase())
                .then_with(|| by_path(a, b))
        }),
        SortBy::Date => results.sort_by(|a, b| {
            b.entry
                .modified_at
                .cmp(&a.entry.modified_at)
                .then_with(|| by_path(a, b))
        }),
        SortBy::Size => results.sort_by(|a, b| {
            b.entry
                .size_bytes
                .cmp(&a.entry.size_bytes)
                .then_with(|| by_path(a, b))
        }),
    }
}
