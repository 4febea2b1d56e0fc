//! Text and tag normalization helpers / 文本与标签规范化工具

use std::collections::HashSet;

use crate::models::{flatten_tags, TagValue};

/// Normalize a query string into a cache / rate-limit key / 规范化查询键
/// 1. Trim surrounding whitespace / 去掉首尾空白
/// 2. Case-fold / 转小写
///
/// Cache and rate limiter both go through this function, so they always agree
/// on whether two queries are the same.
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Normalize a tag for matching (not for storage) / 规范化标签用于匹配
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Flatten, trim, drop empties and dedupe (first occurrence wins) / 清理标签列表
pub fn clean_tags<'a, I>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if seen.insert(tag.to_string()) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Trimmed leaf tags of a stored tag field / 存储标签的叶子值
pub fn leaf_tags(tags: &[TagValue]) -> Vec<String> {
    clean_tags(flatten_tags(tags))
}

/// Order-insensitive equality of two tag lists / 忽略顺序比较标签集合
pub fn same_tag_set(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Foo "), "foo");
        assert_eq!(normalize_key(" FOO"), "foo");
        assert_eq!(normalize_key("foo"), "foo");
        // 幂等
        assert_eq!(normalize_key(&normalize_key("  MiXeD  ")), normalize_key("  MiXeD  "));
    }

    #[test]
    fn test_clean_tags() {
        assert_eq!(clean_tags(vec![" a", "b", "a ", "", "  ", "c"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_leaf_tags_flattens_nested() {
        let tags = vec![
            TagValue::Nested(vec![TagValue::from("Fiction"), TagValue::from("Classic ")]),
            TagValue::from("Owned"),
            TagValue::from("Fiction"),
        ];
        assert_eq!(leaf_tags(&tags), vec!["Fiction", "Classic", "Owned"]);
    }

    #[test]
    fn test_same_tag_set() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string(), "x".to_string()];
        let c = vec!["x".to_string()];
        assert!(same_tag_set(&a, &b));
        assert!(!same_tag_set(&a, &c));
    }
}
