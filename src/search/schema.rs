//! Search schema definition / 搜索结构定义

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    fields, tags_from_json, BookStatus, DateRangeSpec, SortField, SortOrder, StatusFilter, TagValue,
};
use crate::storage::Document;
use crate::utils::normalize_key;

/// Book hit - snapshot of a book record / 书籍结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookHit {
    /// Book identifier / 书籍ID
    pub id: String,
    /// Always `None` for top-level records / 顶层记录无父ID
    pub parent_id: Option<String>,
    pub title: String,
    pub author: String,
    pub status: Option<BookStatus>,
    pub tags: Vec<TagValue>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Memo hit - snapshot of a reading note / 笔记结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoHit {
    /// Memo identifier / 笔记ID
    pub id: String,
    /// Parent taken from the document reference / 来自文档引用的父ID
    pub parent_id: Option<String>,
    /// Owning book / 所属书籍ID
    pub book_id: String,
    /// Owning book title, resolved at execution time / 所属书名（执行时解析）
    pub book_title: String,
    pub text: String,
    pub comment: String,
    pub page: Option<u32>,
    pub tags: Vec<TagValue>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Search result item / 搜索结果条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchResultItem {
    Book(BookHit),
    Memo(MemoHit),
}

impl SearchResultItem {
    pub fn id(&self) -> &str {
        match self {
            SearchResultItem::Book(b) => &b.id,
            SearchResultItem::Memo(m) => &m.id,
        }
    }

    /// Parent record id (books have none) / 父记录ID
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            SearchResultItem::Book(b) => b.parent_id.as_deref(),
            SearchResultItem::Memo(m) => m.parent_id.as_deref(),
        }
    }

    pub fn tags(&self) -> &[TagValue] {
        match self {
            SearchResultItem::Book(b) => &b.tags,
            SearchResultItem::Memo(m) => &m.tags,
        }
    }

    pub fn is_memo(&self) -> bool {
        matches!(self, SearchResultItem::Memo(_))
    }

    pub fn as_memo(&self) -> Option<&MemoHit> {
        match self {
            SearchResultItem::Memo(m) => Some(m),
            SearchResultItem::Book(_) => None,
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SearchResultItem::Book(b) => b.updated_at,
            SearchResultItem::Memo(m) => m.updated_at,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SearchResultItem::Book(b) => b.created_at,
            SearchResultItem::Memo(m) => m.created_at,
        }
    }
}

/// Read an epoch-millisecond timestamp field / 读取毫秒时间戳字段
fn timestamp_field(doc: &Document, field: &str) -> Option<DateTime<Utc>> {
    let millis = match doc.get(field)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        // 兼容 RFC3339 字符串
        Value::String(s) => return DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

fn string_field(doc: &Document, field: &str) -> String {
    doc.get_str(field).unwrap_or_default().to_string()
}

impl BookHit {
    /// Decode from a stored book document / 从书籍文档解析
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id().to_string(),
            parent_id: doc.reference.parent_id().map(str::to_string),
            title: string_field(doc, fields::TITLE),
            author: string_field(doc, fields::AUTHOR),
            status: doc.get_str(fields::STATUS).and_then(BookStatus::parse),
            tags: tags_from_json(doc.get(fields::TAGS)),
            created_at: timestamp_field(doc, fields::CREATED_AT),
            updated_at: timestamp_field(doc, fields::UPDATED_AT),
        }
    }
}

impl MemoHit {
    /// Decode from a stored memo document; the title is filled in later
    /// 从笔记文档解析，书名稍后补全
    pub fn from_document(doc: &Document) -> Self {
        let page = doc
            .get(fields::PAGE)
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .and_then(|p| u32::try_from(p).ok());
        let parent_id = doc.reference.parent_id().map(str::to_string);
        Self {
            id: doc.id().to_string(),
            book_id: parent_id.clone().unwrap_or_default(),
            parent_id,
            book_title: String::new(),
            text: string_field(doc, fields::TEXT),
            comment: string_field(doc, fields::COMMENT),
            page,
            tags: tags_from_json(doc.get(fields::TAGS)),
            created_at: timestamp_field(doc, fields::CREATED_AT),
            updated_at: timestamp_field(doc, fields::UPDATED_AT),
        }
    }
}

/// Search conditions / 搜索条件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConditions {
    /// Free text / 关键词
    pub text: String,
    pub status: StatusFilter,
    pub date_range: DateRangeSpec,
    pub selected_tags: Vec<TagValue>,
    /// Memo-only text filter / 仅匹配笔记内容
    pub memo_content: String,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

/// Conditions other than the text, used to build structured cache keys
#[derive(Serialize)]
struct KeyParts<'a> {
    status: StatusFilter,
    date_range: &'a DateRangeSpec,
    selected_tags: &'a [TagValue],
    memo_content: String,
    sort_by: SortField,
    sort_order: SortOrder,
}

impl SearchConditions {
    /// Full-text mode conditions / 全文模式
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    pub fn with_status(mut self, status: impl Into<StatusFilter>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_date_range(mut self, range: DateRangeSpec) -> Self {
        self.date_range = range;
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagValue>,
    {
        self.selected_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_memo_content(mut self, text: impl Into<String>) -> Self {
        self.memo_content = text.into();
        self
    }

    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.sort_order = order;
        self
    }

    /// Whether any filter besides free text is active / 是否有文本以外的筛选
    pub fn has_structured_filters(&self) -> bool {
        self.status != StatusFilter::All
            || !self.date_range.is_none()
            || !self.selected_tags.is_empty()
            || !self.memo_content.trim().is_empty()
    }

    /// Selection has no nested arrays / 标签选择为扁平列表
    pub fn has_flat_tags(&self) -> bool {
        self.selected_tags.iter().all(|t| !t.is_nested())
    }

    /// Normalized key shared by cache and rate limiter / 缓存与限流共用的键
    ///
    /// Text-only conditions key on the normalized text alone so full-text and
    /// advanced searches for the same words share one entry.
    pub fn cache_key(&self) -> String {
        let text = normalize_key(&self.text);
        if !self.has_structured_filters()
            && self.sort_by == SortField::default()
            && self.sort_order == SortOrder::default()
        {
            return text;
        }
        let parts = KeyParts {
            status: self.status,
            date_range: &self.date_range,
            selected_tags: &self.selected_tags,
            memo_content: normalize_key(&self.memo_content),
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        };
        format!("{}|{}", text, serde_json::to_string(&parts).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DocumentRef;
    use serde_json::json;

    #[test]
    fn test_decode_book() {
        let doc = Document::new(
            DocumentRef::new("books", "b1"),
            json!({"title": "Dune", "author": "Herbert", "status": "reading", "tags": ["sf"], "updatedAt": 1_700_000_000_000i64})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let book = BookHit::from_document(&doc);
        assert_eq!(book.title, "Dune");
        assert!(book.parent_id.is_none());
        assert_eq!(book.status, Some(BookStatus::Reading));
        assert_eq!(book.updated_at.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert!(book.created_at.is_none());
    }

    #[test]
    fn test_decode_memo_uses_explicit_parent() {
        let doc = Document::new(
            DocumentRef::nested("books", "b9", "memos", "m1"),
            json!({"text": "quote", "page": "12", "createdAt": "2024-03-01T00:00:00Z"}).as_object().cloned().unwrap(),
        );
        let memo = MemoHit::from_document(&doc);
        assert_eq!(memo.book_id, "b9");
        assert_eq!(memo.parent_id.as_deref(), Some("b9"));
        assert_eq!(memo.page, Some(12));
        assert!(memo.created_at.is_some());
        assert_eq!(SearchResultItem::Memo(memo).parent_id(), Some("b9"));
    }

    #[test]
    fn test_cache_key_collisions() {
        assert_eq!(SearchConditions::text("Foo ").cache_key(), "foo");
        assert_eq!(SearchConditions::text(" FOO").cache_key(), SearchConditions::text("foo").cache_key());

        let filtered = SearchConditions::text("foo").with_status(BookStatus::Reading);
        assert_ne!(filtered.cache_key(), "foo");
        assert!(filtered.cache_key().starts_with("foo|"));
        assert_eq!(
            filtered.cache_key(),
            SearchConditions::text(" Foo").with_status(BookStatus::Reading).cache_key()
        );
    }

    #[test]
    fn test_structured_filters() {
        assert!(!SearchConditions::text("x").has_structured_filters());
        assert!(SearchConditions::default().with_tags(["novel"]).has_structured_filters());
        assert!(SearchConditions::default().with_memo_content("q").has_structured_filters());
        let nested = SearchConditions::default()
            .with_tags(vec![TagValue::Nested(vec![TagValue::from("a")])]);
        assert!(!nested.has_flat_tags());
    }
}
