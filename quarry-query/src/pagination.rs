//! Page-based pagination and capped counting.
//!
//! ```rust
//! use quarry_query::Pagination;
//!
//! let page_3 = Pagination::page(3, 25);
//! assert_eq!(page_3.offset(), 50);
//! assert_eq!(page_3.limit(), 25);
//! ```
//!
//! Counting a paginated result never scans past [`COUNT_CAP`] rows beyond the
//! page offset, so the reported count is a lower bound whenever `more` is set.

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Maximum number of rows counted beyond the page offset.
pub const COUNT_CAP: u64 = 1000;

/// Default page size.
pub const DEFAULT_ITEMS_PER_PAGE: u64 = 1000;

/// A page request. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number, starting at 1.
    pub page: u64,
    /// Rows per page.
    pub items_per_page: u64,
}

impl Pagination {
    /// Create a page request.
    pub fn page(page: u64, items_per_page: u64) -> Self {
        Self {
            page,
            items_per_page,
        }
    }

    /// Check that the page and size are positive.
    pub fn validate(&self) -> QueryResult<()> {
        if self.page == 0 {
            return Err(QueryError::invalid_parameter("page must be at least 1"));
        }
        if self.items_per_page == 0 {
            return Err(QueryError::invalid_parameter("items_per_page must be at least 1"));
        }
        Ok(())
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.items_per_page)
    }

    /// Rows on this page.
    pub fn limit(&self) -> u64 {
        self.items_per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::page(1, DEFAULT_ITEMS_PER_PAGE)
    }
}

/// Count information returned alongside an index.
///
/// Serializes to `{"count": n, "more": bool}` for paginated counts,
/// `{"count": n}` for exact counts and `{}` when counting was disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMetadata {
    /// Number of matching rows (a lower bound when `more` is true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Whether rows exist beyond the counted window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub more: Option<bool>,
}

impl CountMetadata {
    /// No count was requested.
    pub fn none() -> Self {
        Self::default()
    }

    /// An exact, uncapped count.
    pub fn exact(count: u64) -> Self {
        Self {
            count: Some(count),
            more: None,
        }
    }

    /// Build the capped count from the number of rows seen past `offset`.
    ///
    /// `counted` comes from a scan limited to `COUNT_CAP + 1` rows, so seeing
    /// more than the cap means rows remain beyond it.
    pub fn capped(offset: u64, counted: u64) -> Self {
        Self {
            count: Some(offset + counted.min(COUNT_CAP)),
            more: Some(counted > COUNT_CAP),
        }
    }

    /// Check if counting was disabled.
    pub fn is_empty(&self) -> bool {
        self.count.is_none() && self.more.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_offsets() {
        assert_eq!(Pagination::page(1, 10).offset(), 0);
        assert_eq!(Pagination::page(4, 10).offset(), 30);
        assert_eq!(Pagination::default().limit(), 1000);
    }

    #[test]
    fn test_validate() {
        assert!(Pagination::page(0, 10).validate().is_err());
        assert!(Pagination::page(1, 0).validate().is_err());
        assert!(Pagination::page(2, 5).validate().is_ok());
    }

    #[test]
    fn test_capped_counts() {
        assert_eq!(CountMetadata::capped(0, 3), CountMetadata { count: Some(3), more: Some(false) });
        assert_eq!(
            CountMetadata::capped(20, 1000),
            CountMetadata { count: Some(1020), more: Some(false) }
        );
        assert_eq!(
            CountMetadata::capped(20, 1001),
            CountMetadata { count: Some(1020), more: Some(true) }
        );
    }

    #[test]
    fn test_serialized_shapes() {
        assert_eq!(
            serde_json::to_value(CountMetadata::capped(0, 2)).unwrap(),
            serde_json::json!({"count": 2, "more": false})
        );
        assert_eq!(
            serde_json::to_value(CountMetadata::exact(7)).unwrap(),
            serde_json::json!({"count": 7})
        );
        assert_eq!(serde_json::to_value(CountMetadata::none()).unwrap(), serde_json::json!({}));
    }
}
