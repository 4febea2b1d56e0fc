//! Engine error types / 引擎错误类型
//!
//! Library errors carry the underlying cause for diagnostics; `user_message`
//! gives the sanitized text a presentation layer may show. / 对外展示用脱敏信息

use thiserror::Error;

use crate::storage::StoreError;
use crate::tags::BatchWriteJob;

/// Generic text shown for store failures / 存储失败时的通用提示
pub const SEARCH_FAILED_MESSAGE: &str = "Search failed. Please try again later.";
pub const TAG_UPDATE_FAILED_MESSAGE: &str = "Updating tags failed. Some documents may already be updated.";

/// Search error / 搜索错误
#[derive(Debug, Error)]
pub enum SearchError {
    /// Input rejected before touching the store / 输入校验失败
    #[error("{0}")]
    Validation(String),
    /// Same query repeated inside the cooldown / 触发限流
    #[error("{message}")]
    RateLimited { remaining_ms: i64, message: String },
    #[error("search failed: {0}")]
    Store(#[from] StoreError),
}

impl SearchError {
    pub fn user_message(&self) -> String {
        match self {
            SearchError::Validation(msg) => msg.clone(),
            SearchError::RateLimited { message, .. } => message.clone(),
            SearchError::Store(_) => SEARCH_FAILED_MESSAGE.to_string(),
        }
    }

    /// Whether the user can fix this by editing input or waiting / 是否可由用户恢复
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SearchError::Store(_))
    }
}

/// Tag operation error / 标签操作错误
#[derive(Debug, Error)]
pub enum TagOperationError {
    /// Rejected before any read / 读取前即拒绝
    #[error("invalid tag operation: {0}")]
    InvalidInput(String),
    /// Scanning failed, nothing written / 扫描失败，未写入
    #[error("failed to read tagged documents: {0}")]
    Store(#[from] StoreError),
    /// Some slices committed, the rest aborted / 部分批次已提交
    #[error("tag update interrupted after {} of {} writes: {source}", .job.committed(), .job.len())]
    PartialWrite {
        books_updated: usize,
        memos_updated: usize,
        job: Box<BatchWriteJob>,
        #[source]
        source: StoreError,
    },
}

impl TagOperationError {
    pub fn user_message(&self) -> String {
        match self {
            TagOperationError::InvalidInput(msg) => msg.clone(),
            TagOperationError::Store(_) => TAG_UPDATE_FAILED_MESSAGE.to_string(),
            TagOperationError::PartialWrite { books_updated, memos_updated, .. } => format!(
                "{} ({} books and {} memos were updated before the failure)",
                TAG_UPDATE_FAILED_MESSAGE, books_updated, memos_updated
            ),
        }
    }
}
