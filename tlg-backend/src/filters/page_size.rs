//! Short articles

use std::sync::Arc;

use crate::collaborators::{PageId, PageRecord, NS_MAIN};
use crate::engine::queue::ActionQueue;

use super::{FilterInfo, FlawFilter, PageCheckAction};

/// Articles shorter than this many bytes are reported
pub const MIN_ARTICLE_BYTES: u64 = 2000;

/// Flags main-namespace pages below [`MIN_ARTICLE_BYTES`]; shortest first
pub struct PageSizeFilter {
    info: Arc<FilterInfo>,
}

impl PageSizeFilter {
    pub fn new() -> Self {
        Self {
            info: Arc::new(FilterInfo::new(
                "PageSize",
                "Short article",
                format!("Articles with less than {} bytes of text", MIN_ARTICLE_BYTES),
                "Size",
            )),
        }
    }
}

impl Default for PageSizeFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn check(page: &PageRecord) -> Option<(String, f64)> {
    if page.page_namespace == NS_MAIN && page.page_len < MIN_ARTICLE_BYTES {
        Some((format!("{} bytes", page.page_len), page.page_len as f64))
    } else {
        None
    }
}

impl FlawFilter for PageSizeFilter {
    fn info(&self) -> &Arc<FilterInfo> {
        &self.info
    }

    fn create_actions(&self, wiki: &str, batch: &[PageId], queue: &ActionQueue) {
        queue.push(Box::new(PageCheckAction::new(
            self.info.clone(),
            wiki,
            batch,
            check,
        )));
    }
}
