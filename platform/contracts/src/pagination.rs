//! Page metadata for list endpoints.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page: i64,
    pub limit: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

/// Clamp raw query parameters into a valid (page, limit) pair.
pub fn sanitize(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let page = page.filter(|p| *p >= 1).unwrap_or(DEFAULT_PAGE);
    let limit = limit
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT);
    (page, limit)
}

pub fn calculate(total_items: i64, page: i64, limit: i64) -> PageMetadata {
    let total_pages = if total_items == 0 {
        0
    } else {
        (total_items + limit - 1) / limit
    };
    PageMetadata {
        page,
        limit,
        total_items,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_applies_defaults_and_cap() {
        assert_eq!(sanitize(None, None), (1, 10));
        assert_eq!(sanitize(Some(0), Some(-5)), (1, 10));
        assert_eq!(sanitize(Some(3), Some(25)), (3, 25));
        assert_eq!(sanitize(Some(2), Some(500)), (2, 100));
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(calculate(0, 1, 10).total_pages, 0);
        assert_eq!(calculate(10, 1, 10).total_pages, 1);
        assert_eq!(calculate(11, 1, 10).total_pages, 2);
        assert_eq!(calculate(99, 2, 25).total_pages, 4);
    }
}
