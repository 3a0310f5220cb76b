use serde::{Deserialize, Serialize};

/// One window of a server-side paginated collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Entries of this window, in server order.
    pub content: Vec<T>,
    /// Number of pages the full collection spans under the same filter.
    #[serde(default)]
    pub total_pages: u32,
    /// Number of entries across all pages.
    #[serde(default)]
    pub total_elements: u64,
    /// Zero-based index of this window.
    #[serde(default)]
    pub number: u32,
    /// Requested window size.
    #[serde(default)]
    pub size: u32,
}

impl<T> Page<T> {
    /// True on the final page.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.number.saturating_add(1) >= self.total_pages
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            content: Vec::new(),
            total_pages: 0,
            total_elements: 0,
            number: 0,
            size: 0,
        }
    }
}
