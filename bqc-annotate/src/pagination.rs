//! Pagination for the item list view

/// Pagination metadata calculated from total items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Current page number (1-indexed)
    pub page: usize,
    /// Total number of pages
    pub total_pages: usize,
    /// Index of the first item on the page
    pub offset: usize,
    pub page_size: usize,
}

impl Pagination {
    /// Item index range of the current page, clamped to `total`
    pub fn range(&self, total: usize) -> std::ops::Range<usize> {
        let start = self.offset.min(total);
        start..(start + self.page_size).min(total)
    }
}

/// Calculate pagination metadata from total items and requested page
///
/// Out-of-range pages are clamped to `[1, total_pages]`.
///
/// ```
/// use bqc_annotate::pagination::calculate_pagination;
///
/// let p = calculate_pagination(120, 2, 50);
/// assert_eq!(p.page, 2);
/// assert_eq!(p.total_pages, 3);
/// assert_eq!(p.offset, 50);
/// ```
pub fn calculate_pagination(total: usize, requested_page: usize, page_size: usize) -> Pagination {
    let page_size = page_size.max(1);
    let total_pages = total.div_ceil(page_size);
    let page = requested_page.max(1).min(total_pages.max(1));
    Pagination {
        page,
        total_pages,
        offset: (page - 1) * page_size,
        page_size,
    }
}
