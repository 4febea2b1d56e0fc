//! Sliced batch writes / 分批写入
//!
//! A job is an ordered list of tag rewrites. It is committed slice by slice,
//! each slice as one atomic store batch. The cursor counts writes already
//! committed, so a job that failed halfway can be run again and continues
//! with the first uncommitted slice.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::fields;
use crate::storage::{DocumentRef, DocumentStore, Fields, StoreError, WriteOp};

/// One planned rewrite / 待写入的标签改写
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub reference: DocumentRef,
    /// Final tag list / 最终标签
    pub tags: Vec<String>,
}

impl PendingWrite {
    pub fn is_memo(&self) -> bool {
        self.reference.parent.is_some()
    }

    fn to_op(&self) -> WriteOp {
        let mut update = Fields::new();
        update.insert(
            fields::TAGS.to_string(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        WriteOp::Update { reference: self.reference.clone(), fields: update }
    }
}

/// Resumable sliced write job / 可恢复的分批写入任务
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JobParts")]
pub struct BatchWriteJob {
    writes: Vec<PendingWrite>,
    slice_size: usize,
    /// Writes already committed / 已提交的写入数
    cursor: usize,
}

/// Unchecked form of a persisted job / 未校验的任务数据
#[derive(Deserialize)]
struct JobParts {
    writes: Vec<PendingWrite>,
    slice_size: usize,
    cursor: usize,
}

impl TryFrom<JobParts> for BatchWriteJob {
    type Error = String;

    fn try_from(parts: JobParts) -> Result<Self, Self::Error> {
        if parts.cursor > parts.writes.len() {
            return Err(format!("cursor {} is past the end of {} writes", parts.cursor, parts.writes.len()));
        }
        Ok(Self { writes: parts.writes, slice_size: parts.slice_size.max(1), cursor: parts.cursor })
    }
}

impl BatchWriteJob {
    pub fn new(writes: Vec<PendingWrite>, slice_size: usize) -> Self {
        Self { writes, slice_size: slice_size.max(1), cursor: 0 }
    }

    /// Cap the slice size, e.g. to a store's batch limit / 限制批次大小
    pub fn with_slice_limit(mut self, limit: usize) -> Self {
        self.slice_size = self.slice_size.clamp(1, limit.max(1));
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn slice_size(&self) -> usize {
        self.slice_size
    }

    pub fn committed(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.writes.len()
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    /// Next uncommitted slice / 下一批未提交的写入
    pub fn next_slice(&self) -> &[PendingWrite] {
        let end = (self.cursor + self.slice_size).min(self.writes.len());
        &self.writes[self.cursor..end]
    }

    /// Committed writes split into (books, memos) / 已提交的书籍与笔记数
    pub fn committed_counts(&self) -> (usize, usize) {
        let committed = self.cursor.min(self.writes.len());
        let memos = self.writes[..committed].iter().filter(|w| w.is_memo()).count();
        (committed - memos, memos)
    }

    /// Commit remaining slices in order, stopping at the first failure
    /// 依次提交剩余批次，遇错即停
    pub async fn run(&mut self, store: &dyn DocumentStore) -> Result<(), StoreError> {
        while !self.is_complete() {
            let slice = self.next_slice();
            let size = slice.len();
            let ops: Vec<WriteOp> = slice.iter().map(PendingWrite::to_op).collect();
            store.commit(ops).await?;
            self.cursor += size;
            tracing::debug!("Committed tag slice of {} writes ({}/{})", size, self.cursor, self.writes.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn job(store: &MemoryStore, books: usize, slice: usize) -> BatchWriteJob {
        let writes = (0..books)
            .map(|i| {
                let reference = store.insert_book(None, Fields::new());
                PendingWrite { reference, tags: vec![format!("t{}", i)] }
            })
            .collect();
        BatchWriteJob::new(writes, slice)
    }

    #[test]
    fn test_slicing() {
        let store = MemoryStore::new();
        let job = job(&store, 5, 2);
        assert_eq!(job.next_slice().len(), 2);
        assert!(!job.is_complete());
        assert_eq!(BatchWriteJob::new(Vec::new(), 0).slice_size(), 1);
        assert!(BatchWriteJob::new(Vec::new(), 10).is_complete());
    }

    #[tokio::test]
    async fn test_run_resumes_from_cursor() {
        let store = MemoryStore::new();
        let mut job = job(&store, 5, 2);
        store.fail_commits_after(1);

        assert!(job.run(&store).await.is_err());
        assert_eq!(job.committed(), 2);
        assert_eq!(job.committed_counts(), (2, 0));

        store.clear_faults();
        job.run(&store).await.unwrap();
        assert!(job.is_complete());
        assert_eq!(store.stats().commits, vec![2, 2, 1]);

        let first = &job.writes()[0];
        let doc = store.document(&first.reference).unwrap();
        assert_eq!(doc.get("tags"), Some(&json!(["t0"])));
    }

    #[tokio::test]
    async fn test_restored_job_is_checked() {
        let store = MemoryStore::new();
        let mut value = serde_json::to_value(job(&store, 3, 2)).unwrap();
        value["slice_size"] = json!(0);
        let mut restored: BatchWriteJob = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(restored.slice_size(), 1);
        restored.run(&store).await.unwrap();
        assert_eq!(store.stats().commits, vec![1, 1, 1]);

        value["cursor"] = json!(5);
        assert!(serde_json::from_value::<BatchWriteJob>(value).is_err());
    }

    #[test]
    fn test_slice_limit() {
        let store = MemoryStore::new();
        assert_eq!(job(&store, 1, 450).with_slice_limit(100).slice_size(), 100);
        assert_eq!(job(&store, 1, 50).with_slice_limit(100).slice_size(), 50);
        assert_eq!(job(&store, 1, 50).with_slice_limit(0).slice_size(), 1);
    }
}
