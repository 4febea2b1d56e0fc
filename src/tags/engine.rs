//! Tag consistency engine / 标签一致性引擎
//!
//! Each operation scans the owner's books, then memos, computes the new tag
//! list for every affected document and commits the changed ones through a
//! [`BatchWriteJob`]. Atomicity is per slice only: if a slice fails, the
//! slices before it stay committed and the error carries the job so the
//! caller can resume it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::batch::{BatchWriteJob, PendingWrite};
use super::{TagOperation, TagUpdateResult, TagUsage};
use crate::config::TagConfig;
use crate::error::TagOperationError;
use crate::models::{fields, tags_from_json, BOOKS_COLLECTION, MEMOS_COLLECTION};
use crate::storage::{Document, DocumentStore, FilterOp, QueryDescriptor};
use crate::utils::{leaf_tags, same_tag_set};

/// Clears the loading flag when an operation ends / 操作结束时复位加载标志
struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tag consistency engine / 标签一致性引擎
pub struct TagConsistencyEngine {
    store: Arc<dyn DocumentStore>,
    owner: String,
    batch_size: usize,
    loading: AtomicBool,
}

impl TagConsistencyEngine {
    pub fn new(store: Arc<dyn DocumentStore>, owner: impl Into<String>, config: &TagConfig) -> Self {
        Self {
            store,
            owner: owner.into(),
            batch_size: config.batch_size,
            loading: AtomicBool::new(false),
        }
    }

    /// Effective slice size, never above the store's own limit / 实际批次大小
    pub fn batch_size(&self) -> usize {
        self.batch_size.min(self.store.max_batch_size()).max(1)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Rename a tag everywhere / 重命名标签
    pub async fn rename(&self, from: &str, to: &str) -> Result<TagUpdateResult, TagOperationError> {
        self.apply(TagOperation::Rename { from: from.to_string(), to: to.to_string() }).await
    }

    /// Remove a tag everywhere / 删除标签
    pub async fn delete(&self, tag: &str) -> Result<TagUpdateResult, TagOperationError> {
        self.apply(TagOperation::Delete { tag: tag.to_string() }).await
    }

    /// Replace every alias with the canonical tag / 合并标签
    pub async fn merge(&self, aliases: &[&str], canonical: &str) -> Result<TagUpdateResult, TagOperationError> {
        self.apply(TagOperation::Merge {
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            canonical: canonical.to_string(),
        })
        .await
    }

    /// Run any tag operation / 执行标签操作
    pub async fn apply(&self, operation: TagOperation) -> Result<TagUpdateResult, TagOperationError> {
        let Some(operation) = operation.normalized()? else {
            tracing::debug!("Tag operation is a no-op, nothing read");
            return Ok(TagUpdateResult::default());
        };
        let _loading = LoadingGuard::new(&self.loading);
        tracing::info!("Tag operation started: {}", operation.describe());

        let mut writes = Vec::new();
        for doc in self.scan().await? {
            let current = leaf_tags(&tags_from_json(doc.get(fields::TAGS)));
            if !operation.touches(&current) {
                continue;
            }
            let next = operation.rewrite(&current);
            if same_tag_set(&current, &next) {
                continue;
            }
            writes.push(PendingWrite { reference: doc.reference, tags: next });
        }

        let job = BatchWriteJob::new(writes, self.batch_size());
        tracing::info!(
            "Tag operation planned {} writes in slices of {}",
            job.len(),
            job.slice_size()
        );
        self.run_job(job).await
    }

    /// Continue a job interrupted by a write failure / 继续未完成的任务
    ///
    /// Counts in the result cover the whole job, including slices committed
    /// before the interruption. The slice size is capped to this engine's
    /// batch size, since the job may come from another store or config.
    pub async fn resume(&self, job: BatchWriteJob) -> Result<TagUpdateResult, TagOperationError> {
        let job = job.with_slice_limit(self.batch_size());
        let _loading = LoadingGuard::new(&self.loading);
        tracing::info!("Resuming tag job at {}/{}", job.committed(), job.len());
        self.run_job(job).await
    }

    /// Usage count of every tag, most used first / 标签使用统计
    pub async fn tag_usage(&self) -> Result<Vec<TagUsage>, TagOperationError> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for doc in self.scan().await? {
            let is_memo = doc.reference.parent.is_some();
            for tag in leaf_tags(&tags_from_json(doc.get(fields::TAGS))) {
                let entry = counts.entry(tag).or_default();
                if is_memo {
                    entry.1 += 1;
                } else {
                    entry.0 += 1;
                }
            }
        }

        let mut usage: Vec<TagUsage> = counts
            .into_iter()
            .map(|(tag, (books, memos))| TagUsage { tag, books, memos })
            .collect();
        usage.sort_by(|a, b| b.total().cmp(&a.total()).then_with(|| a.tag.cmp(&b.tag)));
        Ok(usage)
    }

    /// Every book, then every memo, of the owner / 读取所有书籍与笔记
    async fn scan(&self) -> Result<Vec<Document>, TagOperationError> {
        let books = QueryDescriptor::collection(BOOKS_COLLECTION).filter(fields::OWNER, FilterOp::Equal, self.owner.as_str());
        let memos =
            QueryDescriptor::collection_group(MEMOS_COLLECTION).filter(fields::OWNER, FilterOp::Equal, self.owner.as_str());

        let mut docs = self.store.query(&books).await?;
        docs.extend(self.store.query(&memos).await?);
        Ok(docs)
    }

    async fn run_job(&self, mut job: BatchWriteJob) -> Result<TagUpdateResult, TagOperationError> {
        match job.run(self.store.as_ref()).await {
            Ok(()) => {
                let (books_updated, memos_updated) = job.committed_counts();
                tracing::info!("Tag operation done: {} books, {} memos updated", books_updated, memos_updated);
                Ok(TagUpdateResult { books_updated, memos_updated })
            }
            Err(source) => {
                let (books_updated, memos_updated) = job.committed_counts();
                tracing::error!(
                    "Tag operation interrupted after {}/{} writes: {}",
                    job.committed(),
                    job.len(),
                    source
                );
                Err(TagOperationError::PartialWrite {
                    books_updated,
                    memos_updated,
                    job: Box::new(job),
                    source,
                })
            }
        }
    }
}
