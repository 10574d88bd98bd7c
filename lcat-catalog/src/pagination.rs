//! Pagination utilities for catalog listings
//!
//! Listings are fetched with one row of lookahead (`PAGE_SIZE + 1`) so a
//! page knows whether another follows without a separate count query,
//! which the REST proxy cannot answer cheaply.

use serde::Serialize;

/// Page size constant for all listings
pub const PAGE_SIZE: u32 = 50;

/// Highest page accepted; keeps the offset within `u32`
pub const MAX_PAGE: u32 = 10_000;

/// Window to fetch for a requested page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: u32,
    /// Offset for the query
    pub offset: u32,
    /// Rows to request (one more than a page)
    pub limit: u32,
}

/// Calculate the fetch window for a requested page
///
/// Missing, zero or negative pages read as page 1; very large pages are
/// clamped to [`MAX_PAGE`].
///
/// # Examples
/// ```
/// use lcat_catalog::pagination::{calculate_pagination, PAGE_SIZE};
///
/// let p = calculate_pagination(Some(3));
/// assert_eq!(p.page, 3);
/// assert_eq!(p.offset, 2 * PAGE_SIZE);
/// assert_eq!(p.limit, PAGE_SIZE + 1);
///
/// assert_eq!(calculate_pagination(None).page, 1);
/// ```
pub fn calculate_pagination(requested_page: Option<i64>) -> Pagination {
    let page = requested_page.unwrap_or(1).clamp(1, MAX_PAGE as i64) as u32;

    Pagination {
        page,
        offset: (page - 1) * PAGE_SIZE,
        limit: PAGE_SIZE + 1,
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    /// Whether a further page exists
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from a lookahead fetch, dropping the extra row
    pub fn from_lookahead(mut items: Vec<T>, pagination: Pagination) -> Self {
        let has_more = items.len() > PAGE_SIZE as usize;
        items.truncate(PAGE_SIZE as usize);
        Self {
            items,
            page: pagination.page,
            page_size: PAGE_SIZE,
            has_more,
        }
    }
}
