use serde::Serialize;

use super::Job;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A page request with out-of-range values already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Clamps raw paging input: `page < 1` becomes 1, a page size outside
    /// `1..=100` becomes the default of 20.
    pub fn new(page: i64, per_page: i64) -> Self {
        let page = if page < 1 {
            1
        } else {
            u32::try_from(page).unwrap_or(u32::MAX)
        };
        let per_page = if (1..=MAX_PAGE_SIZE as i64).contains(&per_page) {
            per_page as u32
        } else {
            DEFAULT_PAGE_SIZE
        };
        Self { page, per_page }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total: u64) -> Self {
        let total_pages = total.div_ceil(request.per_page as u64);
        Self {
            page: request.page,
            per_page: request.per_page,
            total,
            total_pages,
            has_next: (request.page as u64) < total_pages,
            has_prev: request.page > 1,
        }
    }
}

/// One page of a user's jobs.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub items: Vec<Job>,
    pub pagination: Pagination,
}
