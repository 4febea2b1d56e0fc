//! Client-side filtering and sorting / 客户端过滤与排序
//!
//! Pure functions over result lists. They run on every execution: on the
//! indexed path they are no-ops for filters the store already applied, on the
//! fallback path they do all the work. / 回退路径下由这里完成全部过滤

use std::cmp::Ordering;
use std::collections::HashSet;

use super::date_range::ResolvedRange;
use super::schema::{SearchConditions, SearchResultItem};
use crate::models::{flatten_tags, SortField, SortOrder, StatusFilter, TagValue};
use crate::utils::normalize_tag;

fn contains_folded(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

fn any_tag_contains(tags: &[TagValue], needle: &str) -> bool {
    flatten_tags(tags).into_iter().any(|t| contains_folded(t, needle))
}

/// Case-insensitive substring match / 不区分大小写的子串匹配
/// - book: title, author, tags
/// - memo: text, comment, tags
///
/// Empty text returns the input unchanged.
pub fn filter_by_text(items: Vec<SearchResultItem>, text: &str) -> Vec<SearchResultItem> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| match item {
            SearchResultItem::Book(b) => {
                contains_folded(&b.title, &needle)
                    || contains_folded(&b.author, &needle)
                    || any_tag_contains(&b.tags, &needle)
            }
            SearchResultItem::Memo(m) => {
                contains_folded(&m.text, &needle)
                    || contains_folded(&m.comment, &needle)
                    || any_tag_contains(&m.tags, &needle)
            }
        })
        .collect()
}

/// Tag intersection on flattened, normalized tags / 标签交集匹配
pub fn filter_by_tags(items: Vec<SearchResultItem>, selected: &[TagValue]) -> Vec<SearchResultItem> {
    let wanted: HashSet<String> = flatten_tags(selected)
        .into_iter()
        .map(normalize_tag)
        .filter(|t| !t.is_empty())
        .collect();
    if wanted.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            flatten_tags(item.tags())
                .into_iter()
                .any(|t| wanted.contains(&normalize_tag(t)))
        })
        .collect()
}

/// Substring match on memo text/comment; books pass through untouched
/// 只对笔记生效，书籍原样保留
pub fn filter_by_memo_content(items: Vec<SearchResultItem>, text: &str) -> Vec<SearchResultItem> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| match item {
            SearchResultItem::Book(_) => true,
            SearchResultItem::Memo(m) => contains_folded(&m.text, &needle) || contains_folded(&m.comment, &needle),
        })
        .collect()
}

/// Books must carry the status; memos pass / 状态筛选（仅书籍）
pub fn filter_by_status(items: Vec<SearchResultItem>, status: StatusFilter) -> Vec<SearchResultItem> {
    let Some(wanted) = status.status() else {
        return items;
    };
    items
        .into_iter()
        .filter(|item| match item {
            SearchResultItem::Book(b) => b.status == Some(wanted),
            SearchResultItem::Memo(_) => true,
        })
        .collect()
}

/// Books by `updated_at`, memos by `created_at` / 日期范围筛选
pub fn filter_by_date_range(items: Vec<SearchResultItem>, range: Option<ResolvedRange>) -> Vec<SearchResultItem> {
    let Some(range) = range else {
        return items;
    };
    items
        .into_iter()
        .filter(|item| {
            let stamp = match item {
                SearchResultItem::Book(b) => b.updated_at,
                SearchResultItem::Memo(m) => m.created_at,
            };
            stamp.is_some_and(|t| range.contains(t))
        })
        .collect()
}

/// Comparable sort key / 排序键
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Number(i64),
    Text(String),
}

fn sort_key(item: &SearchResultItem, field: SortField) -> SortKey {
    match field {
        // 缺失时间视为 0，降序时排在最后
        SortField::UpdatedAt => SortKey::Number(item.updated_at().map(|t| t.timestamp_millis()).unwrap_or(0)),
        SortField::CreatedAt => SortKey::Number(item.created_at().map(|t| t.timestamp_millis()).unwrap_or(0)),
        SortField::Title => SortKey::Text(match item {
            SearchResultItem::Book(b) => b.title.to_lowercase(),
            SearchResultItem::Memo(m) => m.book_title.to_lowercase(),
        }),
        SortField::Author => SortKey::Text(match item {
            SearchResultItem::Book(b) => b.author.to_lowercase(),
            SearchResultItem::Memo(_) => String::new(),
        }),
        SortField::Page => SortKey::Number(item.as_memo().and_then(|m| m.page).map(i64::from).unwrap_or(0)),
    }
}

/// Stable sort; descending is the base order, `Asc` inverts it / 稳定排序
pub fn sort_results(mut items: Vec<SearchResultItem>, field: SortField, order: SortOrder) -> Vec<SearchResultItem> {
    items.sort_by(|a, b| {
        let ord: Ordering = sort_key(b, field).cmp(&sort_key(a, field));
        match order {
            SortOrder::Desc => ord,
            SortOrder::Asc => ord.reverse(),
        }
    });
    items
}

/// Apply every condition to a raw result union / 对原始结果应用全部条件
pub fn post_process(
    items: Vec<SearchResultItem>,
    conditions: &SearchConditions,
    range: Option<ResolvedRange>,
) -> Vec<SearchResultItem> {
    let items = filter_by_status(items, conditions.status);
    let items = filter_by_date_range(items, range);
    let items = filter_by_tags(items, &conditions.selected_tags);
    let items = filter_by_text(items, &conditions.text);
    let items = filter_by_memo_content(items, &conditions.memo_content);
    sort_results(items, conditions.sort_by, conditions.sort_order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookStatus;
    use crate::search::schema::{BookHit, MemoHit};
    use chrono::{TimeZone, Utc};

    fn book(id: &str, title: &str, tags: Vec<TagValue>, updated: Option<i64>) -> SearchResultItem {
        SearchResultItem::Book(BookHit {
            id: id.to_string(),
            parent_id: None,
            title: title.to_string(),
            author: "Anon".to_string(),
            status: Some(BookStatus::Reading),
            tags,
            created_at: None,
            updated_at: updated.map(|ms| Utc.timestamp_millis_opt(ms).unwrap()),
        })
    }

    fn memo(id: &str, text: &str, comment: &str) -> SearchResultItem {
        SearchResultItem::Memo(MemoHit {
            id: id.to_string(),
            parent_id: Some("b1".to_string()),
            book_id: "b1".to_string(),
            book_title: "Dune".to_string(),
            text: text.to_string(),
            comment: comment.to_string(),
            page: Some(3),
            tags: vec![TagValue::from("quote")],
            created_at: Some(Utc.timestamp_millis_opt(5).unwrap()),
            updated_at: None,
        })
    }

    fn ids(items: &[SearchResultItem]) -> Vec<&str> {
        items.iter().map(|i| i.id()).collect()
    }

    #[test]
    fn test_filter_by_text() {
        let items = vec![
            book("1", "The Hobbit", vec![], None),
            book("2", "Dune", vec![TagValue::from("Hobbits")], None),
            memo("m", "nothing", "hobbit hole"),
            memo("n", "other", ""),
        ];
        assert_eq!(ids(&filter_by_text(items.clone(), "HOBBIT")), vec!["1", "2", "m"]);
        assert_eq!(filter_by_text(items.clone(), "   ").len(), items.len());
    }

    #[test]
    fn test_filter_by_tags_flattens_nested() {
        let nested = vec![
            TagValue::Nested(vec![TagValue::from("Fiction"), TagValue::from("Classic")]),
            TagValue::from("Owned"),
        ];
        let items = vec![book("1", "A", nested, None), book("2", "B", vec![TagValue::from("Poetry")], None)];
        let hits = filter_by_tags(items.clone(), &[TagValue::from("Fiction")]);
        assert_eq!(ids(&hits), vec!["1"]);

        // 大小写与空白不敏感
        let hits = filter_by_tags(items.clone(), &[TagValue::from("  poetry ")]);
        assert_eq!(ids(&hits), vec!["2"]);

        assert_eq!(filter_by_tags(items, &[]).len(), 2);
    }

    #[test]
    fn test_memo_content_leaves_books_alone() {
        let items = vec![memo("m1", "a long quote", ""), book("1", "A", vec![], None), memo("m2", "x", "y")];
        let hits = filter_by_memo_content(items, "QUOTE");
        assert_eq!(ids(&hits), vec!["m1", "1"]);
    }

    #[test]
    fn test_sort_missing_timestamp_last_in_desc() {
        let items = vec![book("a", "A", vec![], None), book("b", "B", vec![], Some(10)), book("c", "C", vec![], Some(20))];
        let desc = sort_results(items.clone(), SortField::UpdatedAt, SortOrder::Desc);
        assert_eq!(ids(&desc), vec!["c", "b", "a"]);
        let asc = sort_results(items, SortField::UpdatedAt, SortOrder::Asc);
        assert_eq!(ids(&asc), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_is_stable_and_case_folded() {
        let items = vec![
            book("1", "beta", vec![], None),
            book("2", "Alpha", vec![], None),
            book("3", "alpha", vec![], None),
        ];
        let asc = sort_results(items, SortField::Title, SortOrder::Asc);
        assert_eq!(ids(&asc), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_status_and_date_filters() {
        let mut finished = book("f", "F", vec![], Some(100));
        if let SearchResultItem::Book(b) = &mut finished {
            b.status = Some(BookStatus::Finished);
        }
        let items = vec![finished, book("r", "R", vec![], Some(100)), memo("m", "t", "")];
        assert_eq!(ids(&filter_by_status(items.clone(), StatusFilter::Reading)), vec!["r", "m"]);

        let range = ResolvedRange {
            start: Utc.timestamp_millis_opt(50).unwrap(),
            end: Utc.timestamp_millis_opt(150).unwrap(),
        };
        assert_eq!(ids(&filter_by_date_range(items, Some(range))), vec!["f", "r"]);
    }
}
