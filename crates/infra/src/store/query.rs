//! Pagination for list reads.

use serde::{Deserialize, Serialize};

/// Pagination parameters for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of records to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of records matching the query (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let seen = u64::from(pagination.offset) + items.len() as u64;
        Self {
            items,
            total,
            pagination,
            has_more: seen < total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(Pagination::new(Some(0), None).limit, 1);
        assert_eq!(Pagination::new(Some(5_000), None).limit, Pagination::MAX_LIMIT);
        assert_eq!(Pagination::default().limit, Pagination::DEFAULT_LIMIT);
    }

    #[test]
    fn has_more_tracks_remaining_records() {
        let page = Page::new(vec![1, 2], 5, Pagination::new(Some(2), Some(2)));
        assert!(page.has_more);
        let last = Page::new(vec![5], 5, Pagination::new(Some(2), Some(4)));
        assert!(!last.has_more);
    }
}
