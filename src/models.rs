//! Domain models shared by search and tag administration / 领域模型

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level book collection / 书籍集合
pub const BOOKS_COLLECTION: &str = "books";
/// Memo collection nested under each book / 书籍下的笔记集合
pub const MEMOS_COLLECTION: &str = "memos";

/// Stored field names / 存储字段名
pub mod fields {
    pub const OWNER: &str = "userId";
    pub const TITLE: &str = "title";
    pub const AUTHOR: &str = "author";
    pub const STATUS: &str = "status";
    pub const TAGS: &str = "tags";
    pub const TEXT: &str = "text";
    pub const COMMENT: &str = "comment";
    pub const PAGE: &str = "page";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Reading status / 阅读状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Unread,
    Reading,
    Finished,
    Paused,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Unread => "unread",
            BookStatus::Reading => "reading",
            BookStatus::Finished => "finished",
            BookStatus::Paused => "paused",
        }
    }

    /// Exact stored value only, so client-side matching agrees with the
    /// store's equality filter / 仅接受存储值本身
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(BookStatus::Unread),
            "reading" => Some(BookStatus::Reading),
            "finished" => Some(BookStatus::Finished),
            "paused" => Some(BookStatus::Paused),
            _ => None,
        }
    }
}

/// Status filter: everything, or one status / 状态筛选
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Unread,
    Reading,
    Finished,
    Paused,
}

impl StatusFilter {
    pub fn status(&self) -> Option<BookStatus> {
        match self {
            StatusFilter::All => None,
            StatusFilter::Unread => Some(BookStatus::Unread),
            StatusFilter::Reading => Some(BookStatus::Reading),
            StatusFilter::Finished => Some(BookStatus::Finished),
            StatusFilter::Paused => Some(BookStatus::Paused),
        }
    }
}

impl From<BookStatus> for StatusFilter {
    fn from(status: BookStatus) -> Self {
        match status {
            BookStatus::Unread => StatusFilter::Unread,
            BookStatus::Reading => StatusFilter::Reading,
            BookStatus::Finished => StatusFilter::Finished,
            BookStatus::Paused => StatusFilter::Paused,
        }
    }
}

/// Tag field value / 标签值
///
/// Older records stored grouped tags as nested arrays, so a tag field is a
/// ragged tree of strings. / 历史数据中标签可能是嵌套数组
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Single(String),
    Nested(Vec<TagValue>),
}

impl TagValue {
    /// Lenient decoding: strings and arrays are kept, anything else dropped
    /// 宽松解析：只保留字符串与数组
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(TagValue::Single(s.clone())),
            Value::Array(items) => Some(TagValue::Nested(items.iter().filter_map(Self::from_json).collect())),
            _ => None,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, TagValue::Nested(_))
    }

    /// Append every leaf string, depth first / 深度优先展开
    pub fn flatten_into<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TagValue::Single(s) => out.push(s.as_str()),
            TagValue::Nested(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Single(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Single(s)
    }
}

/// Decode a stored `tags` field / 解析存储中的标签字段
pub fn tags_from_json(value: Option<&Value>) -> Vec<TagValue> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(TagValue::from_json).collect(),
        Some(Value::String(s)) => vec![TagValue::Single(s.clone())],
        _ => Vec::new(),
    }
}

/// Flatten a tag list to its leaf strings / 展开标签列表
pub fn flatten_tags(tags: &[TagValue]) -> Vec<&str> {
    let mut out = Vec::new();
    for tag in tags {
        tag.flatten_into(&mut out);
    }
    out
}

/// Sort field / 排序字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    UpdatedAt,
    CreatedAt,
    Title,
    Author,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Date range selector / 日期范围
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateRangeSpec {
    #[default]
    None,
    Year { year: i32 },
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u32 },
    Custom { start_date: NaiveDate, end_date: NaiveDate },
    /// The last N calendar months up to now / 最近 N 个月
    Recent { months: u32 },
}

impl DateRangeSpec {
    pub fn is_none(&self) -> bool {
        matches!(self, DateRangeSpec::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tag_value_decoding() {
        let tags = tags_from_json(Some(&json!([["Fiction", "Classic"], "Owned", 3, null])));
        assert_eq!(tags.len(), 2);
        assert!(tags[0].is_nested());
        assert_eq!(flatten_tags(&tags), vec!["Fiction", "Classic", "Owned"]);

        assert_eq!(tags_from_json(Some(&json!("solo"))), vec![TagValue::from("solo")]);
        assert!(tags_from_json(None).is_empty());
    }

    #[test]
    fn test_tag_value_serde_untagged() {
        let parsed: Vec<TagValue> = serde_json::from_value(json!(["a", ["b", ["c"]]])).unwrap();
        assert_eq!(flatten_tags(&parsed), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(BookStatus::parse("reading"), Some(BookStatus::Reading));
        assert_eq!(BookStatus::parse(BookStatus::Finished.as_str()), Some(BookStatus::Finished));
        assert_eq!(BookStatus::parse("done"), None);
        assert_eq!(BookStatus::parse(" Reading "), None);
        assert_eq!(BookStatus::parse("lost"), None);
        assert_eq!(StatusFilter::Reading.status(), Some(BookStatus::Reading));
        assert_eq!(StatusFilter::All.status(), None);
    }

    #[test]
    fn test_date_range_serde() {
        let spec: DateRangeSpec = serde_json::from_value(json!({"type": "quarter", "year": 2024, "quarter": 2})).unwrap();
        assert_eq!(spec, DateRangeSpec::Quarter { year: 2024, quarter: 2 });
        let custom: DateRangeSpec = serde_json::from_value(
            json!({"type": "custom", "start_date": "2024-01-05", "end_date": "2024-02-01"}),
        )
        .unwrap();
        assert!(matches!(custom, DateRangeSpec::Custom { .. }));
        assert!(DateRangeSpec::default().is_none());
    }
}
