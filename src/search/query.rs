//! Query builder / 查询构建
//!
//! Turns search conditions into store-native descriptors, one per logical
//! collection:
//! - books: owner + optional status equality, `updatedAt` range, tag any-of
//!   (flat selections only), ordered, limited / 书籍查询
//!   With a range the ordering must be on `updatedAt` as well; the chosen
//!   sort is then applied client-side.
//! - memos: collection group scoped to the owner, no ordering so it never needs
//!   a second composite index / 笔记查询不排序

use serde_json::Value;

use super::date_range::ResolvedRange;
use super::schema::SearchConditions;
use crate::config::SearchConfig;
use crate::models::{fields, flatten_tags, SortField, SortOrder, BOOKS_COLLECTION, MEMOS_COLLECTION};
use crate::storage::{FilterOp, QueryDescriptor, QueryTarget};

/// Descriptors for one search / 一次搜索的查询集合
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub books: QueryDescriptor,
    pub memos: QueryDescriptor,
}

/// Store field a sort maps to (page has no book-level field) / 排序对应的存储字段
fn order_field(sort_by: SortField) -> &'static str {
    match sort_by {
        SortField::UpdatedAt | SortField::Page => fields::UPDATED_AT,
        SortField::CreatedAt => fields::CREATED_AT,
        SortField::Title => fields::TITLE,
        SortField::Author => fields::AUTHOR,
    }
}

/// Build the store queries for `conditions` / 构建查询
pub fn build_queries(
    owner: &str,
    conditions: &SearchConditions,
    range: Option<ResolvedRange>,
    config: &SearchConfig,
) -> QueryPlan {
    let mut books = QueryDescriptor::collection(BOOKS_COLLECTION).filter(fields::OWNER, FilterOp::Equal, owner);

    if let Some(status) = conditions.status.status() {
        books = books.filter(fields::STATUS, FilterOp::Equal, status.as_str());
    }

    if let Some(range) = range {
        books = books
            .filter(fields::UPDATED_AT, FilterOp::GreaterOrEqual, range.start_millis())
            .filter(fields::UPDATED_AT, FilterOp::LessOrEqual, range.end_millis());
    }

    // 嵌套标签无法被存储索引，交给客户端过滤
    if !conditions.selected_tags.is_empty() && conditions.has_flat_tags() {
        let tags: Vec<Value> = flatten_tags(&conditions.selected_tags)
            .into_iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(Value::from)
            .collect();
        if !tags.is_empty() && tags.len() <= config.any_of_limit {
            books = books.filter(fields::TAGS, FilterOp::ArrayContainsAny, tags);
        }
    }

    let descending = conditions.sort_order == SortOrder::Desc;
    let books = match range {
        // 范围筛选字段必须是第一个排序字段
        Some(_) => books.order_by(fields::UPDATED_AT, true),
        None => books.order_by(order_field(conditions.sort_by), descending),
    }
    .limit(config.result_limit);

    let memos = QueryDescriptor::collection_group(MEMOS_COLLECTION)
        .filter(fields::OWNER, FilterOp::Equal, owner)
        .limit(config.result_limit);

    QueryPlan { books, memos }
}

/// Minimal owner-only query used when the full one needs a missing index
/// 缺少索引时使用的最小查询
pub fn fallback_query(original: &QueryDescriptor, owner: &str, limit: usize) -> QueryDescriptor {
    let base = match &original.target {
        QueryTarget::Collection(name) => QueryDescriptor::collection(name),
        QueryTarget::CollectionGroup(name) => QueryDescriptor::collection_group(name),
    };
    base.filter(fields::OWNER, FilterOp::Equal, owner).limit(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookStatus, TagValue};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn config() -> SearchConfig {
        SearchConfig::default()
    }

    #[test]
    fn test_plain_text_search_builds_owner_scoped_queries() {
        let plan = build_queries("u1", &SearchConditions::text("dune"), None, &config());
        assert_eq!(plan.books.filters.len(), 1);
        assert_eq!(plan.books.filters[0].value, json!("u1"));
        assert_eq!(plan.books.order_by.as_ref().unwrap().field, "updatedAt");
        assert!(plan.books.order_by.as_ref().unwrap().descending);
        assert_eq!(plan.books.limit, Some(50));

        assert_eq!(plan.memos.target, QueryTarget::CollectionGroup("memos".to_string()));
        assert!(plan.memos.order_by.is_none());
    }

    #[test]
    fn test_filters_pushed_to_store() {
        let range = ResolvedRange {
            start: Utc.timestamp_millis_opt(10).unwrap(),
            end: Utc.timestamp_millis_opt(20).unwrap(),
        };
        let conditions = SearchConditions::default()
            .with_status(BookStatus::Reading)
            .with_tags(["novel", " sf "]);
        let plan = build_queries("u1", &conditions, Some(range), &config());
        assert!(plan.books.has_filter("status"));
        let tag_filter = plan.books.filters.iter().find(|f| f.field == "tags").unwrap();
        assert_eq!(tag_filter.op, FilterOp::ArrayContainsAny);
        assert_eq!(tag_filter.value, json!(["novel", "sf"]));
        let ranges = plan.books.filters.iter().filter(|f| f.field == "updatedAt").count();
        assert_eq!(ranges, 2);
    }

    #[test]
    fn test_range_forces_updated_at_ordering() {
        let range = ResolvedRange {
            start: Utc.timestamp_millis_opt(10).unwrap(),
            end: Utc.timestamp_millis_opt(20).unwrap(),
        };
        let by_title = SearchConditions::default().sorted_by(SortField::Title, SortOrder::Asc);

        let plan = build_queries("u1", &by_title, Some(range), &config());
        let order = plan.books.order_by.as_ref().unwrap();
        assert_eq!(order.field, "updatedAt");
        assert!(order.descending);

        let plan = build_queries("u1", &by_title, None, &config());
        let order = plan.books.order_by.as_ref().unwrap();
        assert_eq!(order.field, "title");
        assert!(!order.descending);
    }

    #[test]
    fn test_nested_or_oversized_tags_stay_client_side() {
        let nested = SearchConditions::default()
            .with_tags(vec![TagValue::Nested(vec![TagValue::from("a")]), TagValue::from("b")]);
        let plan = build_queries("u1", &nested, None, &config());
        assert!(!plan.books.has_filter("tags"));

        let many = SearchConditions::default().with_tags((0..11).map(|i| format!("t{}", i)));
        let plan = build_queries("u1", &many, None, &config());
        assert!(!plan.books.has_filter("tags"));
    }

    #[test]
    fn test_fallback_query_is_minimal() {
        let plan = build_queries("u1", &SearchConditions::default().with_status(BookStatus::Paused), None, &config());
        let fallback = fallback_query(&plan.books, "u1", 100);
        assert_eq!(fallback.filters.len(), 1);
        assert!(fallback.order_by.is_none());
        assert_eq!(fallback.limit, Some(100));
        assert_eq!(fallback.target, plan.books.target);
    }
}
