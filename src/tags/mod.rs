//! Tag consistency module / 标签一致性模块
//!
//! Rename, delete and merge tags across every book and memo of one owner.
//! Rewrites are planned up front into a [`BatchWriteJob`] and committed in
//! atomic slices; see [`engine::TagConsistencyEngine`].

pub mod batch;
pub mod engine;

pub use batch::{BatchWriteJob, PendingWrite};
pub use engine::TagConsistencyEngine;

use serde::{Deserialize, Serialize};

use crate::error::TagOperationError;
use crate::utils::clean_tags;

/// Tag rewrite operation / 标签操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TagOperation {
    Rename { from: String, to: String },
    Delete { tag: String },
    Merge { aliases: Vec<String>, canonical: String },
}

impl TagOperation {
    /// Trim and validate the inputs. `Ok(None)` means nothing to do.
    /// 校验并规范化参数，`None` 表示无需操作
    pub fn normalized(self) -> Result<Option<Self>, TagOperationError> {
        match self {
            TagOperation::Rename { from, to } => {
                let (from, to) = (from.trim().to_string(), to.trim().to_string());
                if from.is_empty() || to.is_empty() {
                    return Err(TagOperationError::InvalidInput("tag names must not be empty".to_string()));
                }
                if from == to {
                    return Ok(None);
                }
                Ok(Some(TagOperation::Rename { from, to }))
            }
            TagOperation::Delete { tag } => {
                let tag = tag.trim().to_string();
                if tag.is_empty() {
                    return Err(TagOperationError::InvalidInput("tag name must not be empty".to_string()));
                }
                Ok(Some(TagOperation::Delete { tag }))
            }
            TagOperation::Merge { aliases, canonical } => {
                let canonical = canonical.trim().to_string();
                if canonical.is_empty() {
                    return Err(TagOperationError::InvalidInput("target tag must not be empty".to_string()));
                }
                let aliases = clean_tags(aliases.iter().map(String::as_str));
                if aliases.is_empty() {
                    return Err(TagOperationError::InvalidInput("no tags to merge".to_string()));
                }
                if aliases.contains(&canonical) {
                    return Err(TagOperationError::InvalidInput(format!(
                        "target tag {:?} is also listed as a source",
                        canonical
                    )));
                }
                Ok(Some(TagOperation::Merge { aliases, canonical }))
            }
        }
    }

    /// Whether a document carrying `tags` is affected / 是否涉及该文档
    pub fn touches(&self, tags: &[String]) -> bool {
        match self {
            TagOperation::Rename { from, .. } => tags.contains(from),
            TagOperation::Delete { tag } => tags.contains(tag),
            TagOperation::Merge { aliases, .. } => tags.iter().any(|t| aliases.contains(t)),
        }
    }

    /// Rewritten tag list: replaced in place, then deduped / 改写后的标签列表
    pub fn rewrite(&self, tags: &[String]) -> Vec<String> {
        let rewritten: Vec<&str> = match self {
            TagOperation::Rename { from, to } => tags
                .iter()
                .map(|t| if t == from { to.as_str() } else { t.as_str() })
                .collect(),
            TagOperation::Delete { tag } => tags.iter().filter(|t| *t != tag).map(String::as_str).collect(),
            TagOperation::Merge { aliases, canonical } => tags
                .iter()
                .map(|t| if aliases.contains(t) { canonical.as_str() } else { t.as_str() })
                .collect(),
        };
        clean_tags(rewritten)
    }

    pub fn describe(&self) -> String {
        match self {
            TagOperation::Rename { from, to } => format!("rename {:?} -> {:?}", from, to),
            TagOperation::Delete { tag } => format!("delete {:?}", tag),
            TagOperation::Merge { aliases, canonical } => format!("merge {:?} -> {:?}", aliases, canonical),
        }
    }
}

/// Documents rewritten by one operation / 更新结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUpdateResult {
    pub books_updated: usize,
    pub memos_updated: usize,
}

/// How often a tag is used / 标签使用统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUsage {
    pub tag: String,
    pub books: usize,
    pub memos: usize,
}

impl TagUsage {
    pub fn total(&self) -> usize {
        self.books + self.memos
    }
}
