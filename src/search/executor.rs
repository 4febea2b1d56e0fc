//! Query executor / 查询执行
//!
//! Runs a [`QueryPlan`] against the store. When the store rejects a query for
//! lack of a composite index, the executor re-issues the minimal owner-only
//! query (larger limit) and leaves the filtering to the post-processor. This
//! is a best-effort degrade: on very large libraries the fallback may miss
//! documents the indexed query would have returned.
//!
//! Memo hits don't carry their book title, so each distinct parent book is
//! looked up once per execution. That is O(books referenced) extra round-trips
//! and dominates memo-heavy searches.

use std::collections::HashMap;
use std::sync::Arc;

use super::query::{fallback_query, QueryPlan};
use super::schema::{BookHit, MemoHit, SearchResultItem};
use crate::config::SearchConfig;
use crate::models::{fields, BOOKS_COLLECTION};
use crate::storage::{Document, DocumentRef, DocumentStore, QueryDescriptor, StoreError};

/// Raw execution result / 执行结果
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Books followed by memos, unfiltered / 未过滤的书籍与笔记
    pub items: Vec<SearchResultItem>,
    /// At least one query ran through the fallback path / 是否走了回退查询
    pub degraded: bool,
    /// Point lookups issued for memo titles / 书名查询次数
    pub title_lookups: usize,
}

/// Query executor / 查询执行器
pub struct QueryExecutor {
    store: Arc<dyn DocumentStore>,
    owner: String,
    config: SearchConfig,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, owner: impl Into<String>, config: SearchConfig) -> Self {
        Self { store, owner: owner.into(), config }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Execute both queries in sequence, then enrich memos / 依次执行并补全书名
    pub async fn execute(&self, plan: &QueryPlan) -> Result<ExecutionReport, StoreError> {
        let (book_docs, books_degraded) = self.run_with_fallback(&plan.books).await?;
        let (memo_docs, memos_degraded) = self.run_with_fallback(&plan.memos).await?;

        let mut items: Vec<SearchResultItem> = book_docs
            .iter()
            .map(|d| SearchResultItem::Book(BookHit::from_document(d)))
            .collect();

        let memos: Vec<MemoHit> = memo_docs.iter().map(MemoHit::from_document).collect();
        let (memos, title_lookups) = self.resolve_titles(memos).await;
        items.extend(memos.into_iter().map(SearchResultItem::Memo));

        tracing::debug!(
            "Search executed: {} books, {} memos, {} title lookups, degraded={}",
            book_docs.len(),
            memo_docs.len(),
            title_lookups,
            books_degraded || memos_degraded
        );

        Ok(ExecutionReport {
            items,
            degraded: books_degraded || memos_degraded,
            title_lookups,
        })
    }

    /// Run a query, falling back to the minimal query on a missing index / 带回退的查询
    async fn run_with_fallback(&self, query: &QueryDescriptor) -> Result<(Vec<Document>, bool), StoreError> {
        match self.store.query(query).await {
            Ok(docs) => Ok((docs, false)),
            Err(e) if e.is_missing_index() => {
                tracing::warn!(
                    "Query on {} needs a missing index, falling back to owner-only query: {}",
                    query.target.name(),
                    e
                );
                let fallback = fallback_query(query, &self.owner, self.config.fallback_limit());
                let docs = self.store.query(&fallback).await?;
                Ok((docs, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Fill `book_title` on every memo / 补全笔记所属书名
    async fn resolve_titles(&self, mut memos: Vec<MemoHit>) -> (Vec<MemoHit>, usize) {
        let mut titles: HashMap<String, String> = HashMap::new();
        let mut lookups = 0;

        for memo in memos.iter_mut() {
            if memo.book_id.is_empty() {
                memo.book_title = self.config.unknown_book_title.clone();
                continue;
            }
            if let Some(title) = titles.get(&memo.book_id) {
                memo.book_title = title.clone();
                continue;
            }

            lookups += 1;
            let reference = DocumentRef::new(BOOKS_COLLECTION, &memo.book_id);
            let title = match self.store.get(&reference).await {
                Ok(Some(doc)) => doc
                    .get_str(fields::TITLE)
                    .filter(|t| !t.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| self.config.unknown_book_title.clone()),
                Ok(None) => self.config.unknown_book_title.clone(),
                Err(e) => {
                    tracing::warn!("Failed to resolve title of {}: {}", reference, e);
                    self.config.unknown_book_title.clone()
                }
            };
            titles.insert(memo.book_id.clone(), title.clone());
            memo.book_title = title;
        }

        (memos, lookups)
    }
}
