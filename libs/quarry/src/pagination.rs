//! Page/limit arithmetic.
//!
//! Out-of-range input is clamped, never rejected: `page < 1` becomes 1 and
//! `limit` is forced into `[1, MAX_LIMIT]`.

use crate::config::MAX_LIMIT;
use crate::models::{PaginatedResult, QueryMetadata};
use serde_json::Value as JsonValue;

/// Backend offset window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetWindow {
    pub skip: u64,
    pub take: u32,
}

pub fn clamp_page(page: i64) -> u32 {
    page.clamp(1, u32::MAX as i64) as u32
}

pub fn clamp_limit(limit: i64) -> u32 {
    limit.clamp(1, MAX_LIMIT as i64) as u32
}

/// Resolve optional caller values against a default limit.
pub fn page_and_limit(page: Option<i64>, limit: Option<i64>, default_limit: u32) -> (u32, u32) {
    let page = clamp_page(page.unwrap_or(1));
    let limit = clamp_limit(limit.unwrap_or(default_limit as i64));
    (page, limit)
}

pub fn to_offset_window(page: u32, limit: u32) -> OffsetWindow {
    let page = page.max(1);
    let take = limit.clamp(1, MAX_LIMIT);
    OffsetWindow {
        skip: (page as u64 - 1) * take as u64,
        take,
    }
}

/// Result-side pagination fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageShape {
    pub total: Option<u64>,
    pub total_pages: Option<u64>,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Shape a page when the total is known.
pub fn shape(total: u64, page: u32, limit: u32) -> PageShape {
    let limit = limit.clamp(1, MAX_LIMIT) as u64;
    let page = page.max(1) as u64;
    PageShape {
        total: Some(total),
        total_pages: Some(total.div_ceil(limit)),
        has_next: page * limit < total,
        has_prev: total > 0 && page > 1,
    }
}

/// Shape a page fetched without counting; `has_more` says whether a row
/// past the window was seen.
pub fn shape_without_total(page: u32, has_more: bool) -> PageShape {
    PageShape {
        total: None,
        total_pages: None,
        has_next: has_more,
        has_prev: page > 1,
    }
}

impl PageShape {
    pub fn into_result(
        self,
        items: Vec<JsonValue>,
        page: u32,
        limit: u32,
        metadata: QueryMetadata,
    ) -> PaginatedResult {
        PaginatedResult {
            items,
            total: self.total,
            page,
            limit,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
            metadata,
        }
    }
}
