//! Search module / 搜索模块
//!
//! Architecture / 架构：
//! - `query` builds store-native descriptors, `executor` runs them with the
//!   missing-index fallback and memo title enrichment
//! - `filters` is the pure post-processing library (filter + sort)
//! - `cache` and `rate_limit` sit in front of execution
//! - `orchestrator` wires everything in a fixed order
//!
//! Call direction: Orchestrator → Cache / RateLimiter / Executor → Store

pub mod cache;
pub mod date_range;
pub mod executor;
pub mod filters;
pub mod orchestrator;
pub mod query;
pub mod rate_limit;
pub mod schema;

pub use cache::{CacheEntry, CacheStats, SearchCache};
pub use date_range::{resolve as resolve_date_range, ResolvedRange};
pub use executor::{ExecutionReport, QueryExecutor};
pub use filters::{
    filter_by_date_range, filter_by_memo_content, filter_by_status, filter_by_tags, filter_by_text, post_process,
    sort_results,
};
pub use orchestrator::{SearchOrchestrator, SearchOutcome, SearchState};
pub use query::{build_queries, fallback_query, QueryPlan};
pub use rate_limit::{RateLimitCheck, RateLimiter};
pub use schema::{BookHit, MemoHit, SearchConditions, SearchResultItem};

pub use crate::utils::normalize_key;
