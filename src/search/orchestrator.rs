//! Search orchestrator / 搜索编排
//!
//! One search runs strictly in this order:
//! validate → cache lookup → rate-limit check → execute → post-process →
//! cache write → rate-limit record.
//!
//! A cache hit skips the limiter entirely. Validation and rate-limit failures
//! never reach the store.
//!
//! Every call takes a generation number when it starts. Its outcome is applied
//! to the shared [`SearchState`] only if no newer call started in between; the
//! caller still gets its own result back either way.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cache::{CacheStats, SearchCache};
use super::date_range;
use super::executor::QueryExecutor;
use super::filters::post_process;
use super::query::build_queries;
use super::rate_limit::RateLimiter;
use super::schema::{SearchConditions, SearchResultItem};
use crate::clock::Clock;
use crate::config::{EngineConfig, SearchConfig};
use crate::error::SearchError;
use crate::storage::{DocumentStore, KeyValueStore};

/// Entry point used by the caller / 搜索模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    /// Free text only, minimum length always enforced / 全文模式
    FullText,
    /// Structured filters may stand in for the text / 高级模式
    Advanced,
}

/// Result of one search call / 单次搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub items: Vec<SearchResultItem>,
    pub from_cache: bool,
    /// Served through the fallback query / 经回退查询得到
    pub degraded: bool,
}

/// Observable search state / 搜索状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchState {
    /// Current input text / 当前输入
    pub input: String,
    pub results: Vec<SearchResultItem>,
    pub loading: bool,
    /// User-facing error of the latest call / 最近一次调用的错误提示
    pub error: Option<String>,
    pub from_cache: bool,
    pub degraded: bool,
    /// Generation of the latest started call / 最新调用的代数
    pub generation: u64,
}

/// Search orchestrator / 搜索编排器
pub struct SearchOrchestrator {
    executor: QueryExecutor,
    cache: SearchCache,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    config: SearchConfig,
    state: Mutex<SearchState>,
    generation: AtomicU64,
}

impl SearchOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        owner: impl Into<String>,
        config: &EngineConfig,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let owner = owner.into();
        Self {
            // 多个用户可能共用同一个缓存存储
            cache: SearchCache::new(kv, clock.clone(), config.cache.clone()).scoped(owner.clone()),
            executor: QueryExecutor::new(store, owner, config.search.clone()),
            limiter: RateLimiter::new(clock.clone(), config.rate_limit.clone()),
            clock,
            config: config.search.clone(),
            state: Mutex::new(SearchState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Advanced search / 高级搜索
    pub async fn search(&self, conditions: SearchConditions) -> Result<SearchOutcome, SearchError> {
        self.run(conditions, SearchMode::Advanced).await
    }

    /// Full-text search / 全文搜索
    pub async fn search_text(&self, text: &str) -> Result<SearchOutcome, SearchError> {
        self.run(SearchConditions::text(text), SearchMode::FullText).await
    }

    async fn run(&self, conditions: SearchConditions, mode: SearchMode) -> Result<SearchOutcome, SearchError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock();
            state.generation = generation;
            state.loading = true;
            state.error = None;
        }

        let result = self.execute(&conditions, mode).await;
        self.apply(generation, &result);
        result
    }

    async fn execute(&self, conditions: &SearchConditions, mode: SearchMode) -> Result<SearchOutcome, SearchError> {
        self.validate(conditions, mode)?;

        let key = conditions.cache_key();
        if let Some(items) = self.cache.get(&key) {
            tracing::debug!("Search cache hit for {:?} ({} items)", key, items.len());
            return Ok(SearchOutcome { items, from_cache: true, degraded: false });
        }

        let check = self.limiter.check(&key);
        if !check.allowed {
            tracing::debug!("Search {:?} rate limited for {} ms", key, check.remaining_ms);
            return Err(SearchError::RateLimited {
                remaining_ms: check.remaining_ms,
                message: check.error.unwrap_or_default(),
            });
        }

        let range = date_range::resolve(&conditions.date_range, self.clock.now());
        let plan = build_queries(self.executor.owner(), conditions, range, &self.config);
        let report = self.executor.execute(&plan).await.map_err(|e| {
            tracing::error!("Search {:?} failed: {}", key, e);
            SearchError::Store(e)
        })?;

        let items = post_process(report.items, conditions, range);
        self.cache.set(&key, items.clone());
        self.limiter.record(&key);

        tracing::info!(
            "Search {:?}: {} results (degraded={}, title lookups={})",
            key,
            items.len(),
            report.degraded,
            report.title_lookups
        );
        Ok(SearchOutcome { items, from_cache: false, degraded: report.degraded })
    }

    fn validate(&self, conditions: &SearchConditions, mode: SearchMode) -> Result<(), SearchError> {
        let length = conditions.text.trim().chars().count();
        if length >= self.config.min_query_length {
            return Ok(());
        }
        if mode == SearchMode::Advanced && conditions.has_structured_filters() {
            return Ok(());
        }
        let message = format!("Please enter at least {} characters", self.config.min_query_length);
        tracing::debug!("Search rejected: {}", message);
        Err(SearchError::Validation(message))
    }

    /// Apply a finished call unless a newer one has started / 仅应用最新调用的结果
    fn apply(&self, generation: u64, result: &Result<SearchOutcome, SearchError>) {
        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::debug!("Discarding stale search result (generation {} < {})", generation, state.generation);
            return;
        }
        state.loading = false;
        match result {
            Ok(outcome) => {
                state.results = outcome.items.clone();
                state.from_cache = outcome.from_cache;
                state.degraded = outcome.degraded;
                state.error = None;
            }
            Err(e) => {
                // 校验与限流失败保留上次结果
                if matches!(e, SearchError::Store(_)) {
                    state.results.clear();
                    state.from_cache = false;
                    state.degraded = false;
                }
                state.error = Some(e.user_message());
            }
        }
    }

    /// Store the input text and clear any shown error / 更新输入并清除错误
    pub fn set_input(&self, text: &str) {
        let mut state = self.state.lock();
        state.input = text.to_string();
        state.error = None;
    }

    /// Clear results; in-flight calls will no longer apply / 清空结果
    pub fn clear_results(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        state.generation = generation;
        state.results.clear();
        state.loading = false;
        state.error = None;
        state.from_cache = false;
        state.degraded = false;
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Search cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop expired cache entries / 清除过期缓存
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn can_search(&self) -> bool {
        let state = self.state.lock();
        state.input.trim().chars().count() >= self.config.min_query_length && !state.loading
    }

    pub fn state(&self) -> SearchState {
        self.state.lock().clone()
    }
}
