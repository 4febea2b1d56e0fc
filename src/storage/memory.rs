//! In-memory document store / 内存文档存储
//!
//! Behaves like the managed store the engine talks to in production:
//! - multi-field queries that combine a range / any-of filter or an ordering
//!   need a registered composite index, otherwise they fail with
//!   `failed-precondition` / 复合索引校验
//! - batches larger than the store limit are rejected / 批次上限
//! - commits are all-or-nothing / 原子提交
//!
//! Also carries fault injection and counters for tests, and JSON snapshot
//! load/save for the CLI.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{
    codes, Document, DocumentRef, DocumentStore, Fields, FilterOp, QueryDescriptor, QueryTarget,
    StoreError, WriteOp, DEFAULT_MAX_BATCH_SIZE,
};
use crate::models::{BOOKS_COLLECTION, MEMOS_COLLECTION};

/// Call counters / 调用统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub queries: usize,
    pub gets: usize,
    /// Size of every successful commit, in order / 每次成功提交的写入数
    pub commits: Vec<usize>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail the next N queries with this error / 下 N 次查询失败
    query_error: Option<(StoreError, usize)>,
    /// Point lookups of these paths fail / 这些路径的读取失败
    failing_gets: HashSet<String>,
    /// Commits after this many successful ones fail / 成功 N 次后提交失败
    fail_commit_after: Option<usize>,
}

/// Composite index key: query scope + field set / 复合索引键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    target: QueryTarget,
    fields: BTreeSet<String>,
}

/// In-memory store / 内存存储
pub struct MemoryStore {
    /// path -> document / 路径到文档
    docs: RwLock<BTreeMap<String, Document>>,
    indexes: RwLock<HashSet<IndexKey>>,
    enforce_indexes: bool,
    max_batch_size: usize,
    stats: Mutex<StoreStats>,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(HashSet::new()),
            enforce_indexes: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            stats: Mutex::new(StoreStats::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Accept any query shape (no composite index checks) / 关闭索引校验
    pub fn without_index_checks(mut self) -> Self {
        self.enforce_indexes = false;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Register a composite index / 注册复合索引
    pub fn add_index(&self, target: QueryTarget, fields: &[&str]) {
        let key = IndexKey {
            target,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        self.indexes.write().insert(key);
    }

    /// Insert a book, generating an id when none is given / 插入书籍
    pub fn insert_book(&self, id: Option<&str>, fields: Fields) -> DocumentRef {
        let id = id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let reference = DocumentRef::new(BOOKS_COLLECTION, &id);
        self.put(reference.clone(), fields);
        reference
    }

    /// Insert a memo under a book / 在书籍下插入笔记
    pub fn insert_memo(&self, book_id: &str, id: Option<&str>, fields: Fields) -> DocumentRef {
        let id = id.map(str::to_string).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let reference = DocumentRef::nested(BOOKS_COLLECTION, book_id, MEMOS_COLLECTION, &id);
        self.put(reference.clone(), fields);
        reference
    }

    fn put(&self, reference: DocumentRef, fields: Fields) {
        let path = reference.path();
        self.docs.write().insert(path, Document::new(reference, fields));
    }

    /// Synchronous read for inspection / 同步读取（用于检查）
    pub fn document(&self, reference: &DocumentRef) -> Option<Document> {
        self.docs.read().get(&reference.path()).cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    /// Fail the next `times` queries with `error` / 注入查询失败
    pub fn fail_next_queries(&self, error: StoreError, times: usize) {
        self.faults.lock().query_error = Some((error, times));
    }

    /// Make point lookups of `reference` fail / 注入读取失败
    pub fn fail_gets_for(&self, reference: &DocumentRef) {
        self.faults.lock().failing_gets.insert(reference.path());
    }

    /// Let `successful` commits through, then fail every following one / 注入提交失败
    pub fn fail_commits_after(&self, successful: usize) {
        self.faults.lock().fail_commit_after = Some(successful);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn check_index(&self, query: &QueryDescriptor) -> Result<(), StoreError> {
        if !self.enforce_indexes {
            return Ok(());
        }
        let fields = query.fields();
        let has_non_equality = query.filters.iter().any(|f| f.op != FilterOp::Equal);
        let needs_composite = fields.len() > 1 && (has_non_equality || query.order_by.is_some());
        if !needs_composite {
            return Ok(());
        }
        let key = IndexKey { target: query.target.clone(), fields };
        if self.indexes.read().contains(&key) {
            return Ok(());
        }
        let field_list: Vec<&str> = key.fields.iter().map(String::as_str).collect();
        Err(StoreError::request(
            codes::FAILED_PRECONDITION,
            format!(
                "The query requires an index on {} ({})",
                query.target.name(),
                field_list.join(", ")
            ),
        ))
    }

    fn matches_target(target: &QueryTarget, reference: &DocumentRef) -> bool {
        match target {
            QueryTarget::Collection(name) => reference.collection == *name && reference.parent.is_none(),
            QueryTarget::CollectionGroup(name) => reference.collection == *name,
        }
    }

    fn matches_filters(query: &QueryDescriptor, doc: &Document) -> bool {
        query.filters.iter().all(|filter| {
            let Some(value) = doc.get(&filter.field) else {
                return false;
            };
            match filter.op {
                FilterOp::Equal => value == &filter.value,
                FilterOp::GreaterOrEqual => {
                    matches!(compare_values(value, &filter.value), Some(Ordering::Greater | Ordering::Equal))
                }
                FilterOp::LessOrEqual => {
                    matches!(compare_values(value, &filter.value), Some(Ordering::Less | Ordering::Equal))
                }
                FilterOp::ArrayContainsAny => match (value, &filter.value) {
                    // 只匹配顶层元素，与真实存储一致
                    (Value::Array(items), Value::Array(wanted)) => items.iter().any(|i| wanted.contains(i)),
                    _ => false,
                },
            }
        })
    }

    fn apply(docs: &mut BTreeMap<String, Document>, write: WriteOp) {
        match write {
            WriteOp::Set { reference, fields } => {
                docs.insert(reference.path(), Document::new(reference, fields));
            }
            WriteOp::Update { reference, fields } => {
                if let Some(doc) = docs.get_mut(&reference.path()) {
                    for (key, value) in fields {
                        doc.fields.insert(key, value);
                    }
                }
            }
        }
    }

    /// Load books with nested memos from a snapshot / 从快照加载
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        for book in snapshot.books {
            let reference = store.insert_book(book.id.as_deref(), book.fields);
            for memo in book.memos {
                store.insert_memo(&reference.id, memo.id.as_deref(), memo.fields);
            }
        }
        store
    }

    /// Export books with nested memos / 导出快照
    pub fn snapshot(&self) -> Snapshot {
        let docs = self.docs.read();
        let mut books: Vec<SnapshotBook> = docs
            .values()
            .filter(|d| d.reference.parent.is_none() && d.reference.collection == BOOKS_COLLECTION)
            .map(|d| SnapshotBook {
                id: Some(d.reference.id.clone()),
                fields: d.fields.clone(),
                memos: Vec::new(),
            })
            .collect();
        for doc in docs.values() {
            let Some(parent_id) = doc.reference.parent_id() else {
                continue;
            };
            if let Some(book) = books.iter_mut().find(|b| b.id.as_deref() == Some(parent_id)) {
                book.memos.push(SnapshotMemo {
                    id: Some(doc.reference.id.clone()),
                    fields: doc.fields.clone(),
                });
            }
        }
        Snapshot { books }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Order two JSON scalars (numbers or strings) / 比较两个 JSON 标量
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn query(&self, query: &QueryDescriptor) -> Result<Vec<Document>, StoreError> {
        self.stats.lock().queries += 1;
        {
            let mut faults = self.faults.lock();
            if let Some((error, remaining)) = faults.query_error.take() {
                if remaining > 1 {
                    faults.query_error = Some((error.clone(), remaining - 1));
                }
                if remaining > 0 {
                    return Err(error);
                }
            }
        }
        self.check_index(query)?;

        let docs = self.docs.read();
        let mut hits: Vec<Document> = docs
            .values()
            .filter(|d| Self::matches_target(&query.target, &d.reference))
            .filter(|d| Self::matches_filters(query, d))
            .cloned()
            .collect();
        drop(docs);

        if let Some(order) = &query.order_by {
            // 缺少排序字段的文档不会出现在结果中
            hits.retain(|d| d.get(&order.field).is_some());
            hits.sort_by(|a, b| {
                let ord = match (a.get(&order.field), b.get(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                if order.descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError> {
        self.stats.lock().gets += 1;
        let path = reference.path();
        if self.faults.lock().failing_gets.contains(&path) {
            return Err(StoreError::request(codes::UNAVAILABLE, format!("lookup of {} failed", path)));
        }
        Ok(self.docs.read().get(&path).cloned())
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        if writes.len() > self.max_batch_size {
            return Err(StoreError::BatchTooLarge { size: writes.len(), limit: self.max_batch_size });
        }
        let committed = self.stats.lock().commits.len();
        if let Some(allowed) = self.faults.lock().fail_commit_after {
            if committed >= allowed {
                return Err(StoreError::request(codes::UNAVAILABLE, "batch commit failed"));
            }
        }

        let mut docs = self.docs.write();
        // 先校验再写入，保证整批原子性
        for write in &writes {
            if let WriteOp::Update { reference, .. } = write {
                if !docs.contains_key(&reference.path()) {
                    return Err(StoreError::NotFound(reference.path()));
                }
            }
        }
        let size = writes.len();
        for write in writes {
            Self::apply(&mut docs, write);
        }
        drop(docs);

        self.stats.lock().commits.push(size);
        Ok(())
    }
}

/// Serialized store contents / 存储快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub books: Vec<SnapshotBook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memos: Vec<SnapshotMemo>,
    #[serde(flatten)]
    pub fields: Fields,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMemo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: Fields,
}
