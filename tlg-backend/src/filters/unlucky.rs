//! Pages with an unlucky id. Cheap and deterministic; handy for load tests.

use std::sync::Arc;

use crate::collaborators::{PageId, PageRecord};
use crate::engine::queue::ActionQueue;

use super::{FilterInfo, FlawFilter, PageCheckAction};

pub struct UnluckyFilter {
    info: Arc<FilterInfo>,
}

impl UnluckyFilter {
    pub fn new() -> Self {
        Self {
            info: Arc::new(FilterInfo::new(
                "Unlucky",
                "Unlucky page id",
                "Pages whose id is a multiple of 13",
                "Test",
            )),
        }
    }
}

impl Default for UnluckyFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn check(page: &PageRecord) -> Option<(String, f64)> {
    (page.page_id % 13 == 0).then(|| {
        (
            format!("page id {} = 13 x {}", page.page_id, page.page_id / 13),
            page.page_id as f64,
        )
    })
}

impl FlawFilter for UnluckyFilter {
    fn info(&self) -> &Arc<FilterInfo> {
        &self.info
    }

    fn preferred_batch_size(&self) -> usize {
        50
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
