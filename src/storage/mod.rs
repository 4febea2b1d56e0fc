//! Document store contract / 文档存储接口
//!
//! The engine only consumes primitive operations from the store: query, point
//! get and atomic batch commit. / 引擎只调用存储的原语操作
//! The store may reject multi-field queries it has no composite index for;
//! that failure has to stay distinguishable (see [`StoreError::is_missing_index`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Hard per-batch operation limit of the store / 存储单批次写入上限
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Document field map / 文档字段
pub type Fields = Map<String, Value>;

/// Error codes surfaced by store clients / 存储错误码
pub mod codes {
    pub const FAILED_PRECONDITION: &str = "failed-precondition";
    pub const PERMISSION_DENIED: &str = "permission-denied";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL: &str = "internal";
}

/// Store error / 存储错误
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{code}: {message}")]
    Request { code: String, message: String },
    #[error("batch of {size} writes exceeds the store limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error("document not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn request(code: &str, message: impl Into<String>) -> Self {
        StoreError::Request { code: code.to_string(), message: message.into() }
    }

    /// Whether the store rejected the query for lack of a composite index
    /// 是否为缺少复合索引导致的查询失败
    pub fn is_missing_index(&self) -> bool {
        match self {
            StoreError::Request { code, message } => {
                code == codes::FAILED_PRECONDITION || message.to_lowercase().contains("index")
            }
            _ => false,
        }
    }
}

/// Parent document of a nested document / 父文档引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub collection: String,
    pub id: String,
}

/// Document reference / 文档引用
///
/// The parent is carried explicitly so nested documents never need path
/// inspection to find their owner record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
}

impl DocumentRef {
    pub fn new(collection: &str, id: &str) -> Self {
        Self { collection: collection.to_string(), id: id.to_string(), parent: None }
    }

    pub fn nested(parent_collection: &str, parent_id: &str, collection: &str, id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.to_string(),
            parent: Some(ParentRef {
                collection: parent_collection.to_string(),
                id: parent_id.to_string(),
            }),
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.id.as_str())
    }

    /// Full slash separated path / 完整路径
    pub fn path(&self) -> String {
        match &self.parent {
            Some(p) => format!("{}/{}/{}/{}", p.collection, p.id, self.collection, self.id),
            None => format!("{}/{}", self.collection, self.id),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Stored document snapshot / 文档快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub reference: DocumentRef,
    pub fields: Fields,
}

impl Document {
    pub fn new(reference: DocumentRef, fields: Fields) -> Self {
        Self { reference, fields }
    }

    pub fn id(&self) -> &str {
        &self.reference.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Query target / 查询目标
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryTarget {
    /// Top-level collection / 顶层集合
    Collection(String),
    /// Same-named nested collection across all parents / 跨父文档的集合组
    CollectionGroup(String),
}

impl QueryTarget {
    pub fn name(&self) -> &str {
        match self {
            QueryTarget::Collection(name) | QueryTarget::CollectionGroup(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    GreaterOrEqual,
    LessOrEqual,
    /// Array field shares at least one element with the operand array
    ArrayContainsAny,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Store-native query descriptor / 查询描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub target: QueryTarget,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl QueryDescriptor {
    pub fn collection(name: &str) -> Self {
        Self {
            target: QueryTarget::Collection(name.to_string()),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn collection_group(name: &str) -> Self {
        Self {
            target: QueryTarget::CollectionGroup(name.to_string()),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter { field: field.to_string(), op, value: value.into() });
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), descending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Every field the query touches (filters + ordering) / 查询涉及的字段
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> = self.filters.iter().map(|f| f.field.clone()).collect();
        if let Some(order) = &self.order_by {
            fields.insert(order.field.clone());
        }
        fields
    }

    pub fn has_filter(&self, field: &str) -> bool {
        self.filters.iter().any(|f| f.field == field)
    }
}

/// Single write inside an atomic batch / 批次内的单个写操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Replace the document / 覆盖文档
    Set { reference: DocumentRef, fields: Fields },
    /// Merge fields into an existing document / 合并更新
    Update { reference: DocumentRef, fields: Fields },
}

/// Document store interface (primitive operations only) / 文档存储接口
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store name / 存储名称
    fn name(&self) -> &str;

    /// Maximum writes accepted by one `commit` / 单批次最大写入数
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH_SIZE
    }

    /// Run a query / 执行查询
    async fn query(&self, query: &QueryDescriptor) -> Result<Vec<Document>, StoreError>;

    /// Point lookup / 按引用读取
    async fn get(&self, reference: &DocumentRef) -> Result<Option<Document>, StoreError>;

    /// Commit writes as one atomic unit / 原子提交一批写操作
    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError>;
}

pub mod kv;
pub mod memory;

pub use kv::{FileKvStore, KeyValueStore, KvError, MemoryKvStore};
pub use memory::{MemoryStore, Snapshot, StoreStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_index_signature() {
        let by_code = StoreError::request(codes::FAILED_PRECONDITION, "query rejected");
        assert!(by_code.is_missing_index());

        let by_message = StoreError::request(codes::INTERNAL, "The query requires an INDEX");
        assert!(by_message.is_missing_index());

        let other = StoreError::request(codes::PERMISSION_DENIED, "denied");
        assert!(!other.is_missing_index());
        assert!(!StoreError::NotFound("books/1".to_string()).is_missing_index());
    }

    #[test]
    fn test_document_ref_path() {
        let book = DocumentRef::new("books", "b1");
        assert_eq!(book.path(), "books/b1");
        assert_eq!(book.parent_id(), None);

        let memo = DocumentRef::nested("books", "b1", "memos", "m1");
        assert_eq!(memo.path(), "books/b1/memos/m1");
        assert_eq!(memo.parent_id(), Some("b1"));
    }

    #[test]
    fn test_query_fields() {
        let query = QueryDescriptor::collection("books")
            .filter("userId", FilterOp::Equal, "u1")
            .filter("status", FilterOp::Equal, "reading")
            .order_by("updatedAt", true)
            .limit(10);
        let fields: Vec<String> = query.fields().into_iter().collect();
        assert_eq!(fields, vec!["status", "updatedAt", "userId"]);
        assert!(query.has_filter("status"));
        assert!(!query.has_filter("tags"));
    }
}
