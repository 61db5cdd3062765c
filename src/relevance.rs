use chrono::{DateTime, Duration, Utc};

use crate::config::SNIPPET_CONTEXT_CHARS;
use crate::types::{IndexEntry, MatchField, MatchSpan};

// 打分常数可调，只有各档之间的相对顺序有意义
pub const EXACT_BONUS: f64 = 1000.0;
pub const PREFIX_BONUS: f64 = 500.0;
pub const SUBSTRING_BONUS: f64 = 250.0;

const FUZZY_CHAR: f64 = 10.0;
const FUZZY_CONSECUTIVE: f64 = 5.0;
const FUZZY_BOUNDARY: f64 = 10.0;
// 单字符最高 25 分，乘 4 后模糊分不超过 100，始终低于子串档
const FUZZY_SCALE: f64 = 4.0;

const CONTENT_WORD_WEIGHT: f64 = 5.0;
const TAG_BONUS: f64 = 50.0;
const DEPTH_WEIGHT: f64 = 2.0;

const RECENT_DAY_BONUS: f64 = 100.0;
const RECENT_WEEK_BONUS: f64 = 50.0;
const RECENT_MONTH_BONUS: f64 = 20.0;

/// 词边界字符：空格、'/'、'-' 之外，'_' 和 '.' 也算，
/// 文件名里它们同样用来分词（如 my_report.final）
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '/' | '-' | '_' | '.')
}

/// 子序列模糊匹配：贪心地按顺序匹配 query 中的每个字符，
/// 未能全部匹配时返回 0。name 与 query 需已小写。
pub fn fuzzy_score(name: &str, query: &str) -> f64 {
    let query: Vec<char> = query.chars().collect();
    if query.is_empty() {
        return 0.0;
    }
    let name: Vec<char> = name.chars().collect();

    let mut qi = 0;
    let mut raw = 0.0;
    let mut last_match: Option<usize> = None;
    for (i, &c) in name.iter().enumerate() {
        if qi == query.len() {
            break;
        }
        if c != query[qi] {
            continue;
        }
        raw += FUZZY_CHAR;
        if i > 0 && last_match == Some(i - 1) {
            raw += FUZZY_CONSECUTIVE;
        }
        if i == 0 || is_separator(name[i - 1]) {
            raw += FUZZY_BOUNDARY;
        }
        last_match = Some(i);
        qi += 1;
    }

    if qi < query.len() {
        return 0.0;
    }
    raw / query.len() as f64 * FUZZY_SCALE
}

fn recency_bonus(modified_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now - modified_at;
    if age < Duration::days(1) {
        RECENT_DAY_BONUS
    } else if age < Duration::weeks(1) {
        RECENT_WEEK_BONUS
    } else if age < Duration::days(30) {
        RECENT_MONTH_BONUS
    } else {
        0.0
    }
}

fn depth_bonus(depth: usize) -> f64 {
    10usize.saturating_sub(depth) as f64 * DEPTH_WEIGHT
}

/// 对单个条目打分，query 需已 trim 并小写。返回 0 表示完全不匹配。
pub fn score(entry: &IndexEntry, query: &str, fuzzy: bool, now: DateTime<Utc>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let name = entry.name.to_lowercase();

    let mut total = if name == query {
        EXACT_BONUS
    } else if name.starts_with(query) {
        PREFIX_BONUS
    } else if name.contains(query) {
        SUBSTRING_BONUS
    } else if fuzzy {
        fuzzy_score(&name, query)
    } else {
        0.0
    };

    if let Some(word_freq) = entry.word_freq() {
        for word in query.split_whitespace().filter(|w| w.chars().count() > 1) {
            if let Some(count) = word_freq.get(word) {
                total += *count as f64 * CONTENT_WORD_WEIGHT;
            }
        }
    }

    let tag_hits = entry
        .tags
        .iter()
        .filter(|t| t.to_lowercase().contains(query))
        .count();
    total += tag_hits as f64 * TAG_BONUS;

    if total <= 0.0 {
        return 0.0;
    }
    // 深度与新近度只用于区分已命中的条目
    total + depth_bonus(entry.depth()) + recency_bonus(entry.modified_at, now)
}

/// 逐字符小写，同时记录每个小写字符对应的原字符下标
fn lowered_chars(s: &str) -> (Vec<char>, Vec<usize>) {
    let mut lowered = Vec::with_capacity(s.len());
    let mut origin = Vec::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        for lc in c.to_lowercase() {
            lowered.push(lc);
            origin.push(i);
        }
    }
    (lowered, origin)
}

/// 忽略大小写查找，返回原串中的字符区间
fn find_ci(haystack: &str, needle: &str, first_only: bool) -> Vec<(usize, usize)> {
    let needle: Vec<char> = needle.to_lowercase().chars().collect();
    if needle.is_empty() {
        return Vec::new();
    }
    let (hay, origin) = lowered_chars(haystack);
    let n = needle.len();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + n <= hay.len() {
        if hay[i..i + n] == needle[..] {
            spans.push((origin[i], origin[i + n - 1] + 1));
            if first_only {
                break;
            }
            i += n;
        } else {
            i += 1;
        }
    }
    spans
}

/// 高亮区间：名称中的每一处命中，以及内容中第一处命中（前后各带 40 个字符）
pub fn matches(entry: &IndexEntry, query: &str) -> Vec<MatchSpan> {
    let mut spans: Vec<MatchSpan> = find_ci(&entry.name, query, false)
        .into_iter()
        .map(|(start, end)| MatchSpan {
            field: MatchField::Name,
            text: entry.name.clone(),
            start,
            end,
        })
        .collect();

    if let Some(content) = entry.content() {
        if let Some(&(start, end)) = find_ci(content, query, true).first() {
            let chars: Vec<char> = content.chars().collect();
            let from = start.saturating_sub(SNIPPET_CONTEXT_CHARS);
            let to = (end + SNIPPET_CONTEXT_CHARS).min(chars.len());
            spans.push(MatchSpan {
                field: MatchField::Content,
                text: chars[from..to].iter().collect(),
                start: start - from,
                end: end - from,
            });
        }
    }
    spans
}
