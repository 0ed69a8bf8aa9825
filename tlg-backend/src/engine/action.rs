//! Units of work and their outcomes
//!
//! An [`Action`] pairs one filter with a batch of pages. Actions are created
//! by filters, owned by the [`ActionQueue`](super::queue::ActionQueue) until a
//! worker claims one, and consumed by [`Action::execute`].

use std::sync::Arc;

use crate::collaborators::{database_name, PageConnection, PageRecord};
use crate::error::{Fault, Result};
use crate::filters::FilterInfo;

use super::connections::ConnectionCache;

/// One (page batch, filter) unit of work
pub trait Action: Send {
    /// Short name of the owning filter, shown as the worker's current task
    fn subject(&self) -> &str;

    /// Whether the action can run now. Actions that are not ready are
    /// returned to the tail of the queue.
    fn is_ready(&self) -> bool {
        true
    }

    /// Run the check. Consumes the action, so it executes at most once.
    fn execute(self: Box<Self>, ctx: &mut WorkerContext) -> Result<Vec<Finding>>;
}

/// A single filter match on a page
#[derive(Debug, Clone)]
pub struct Finding {
    pub filter: Arc<FilterInfo>,
    /// Wiki the page belongs to, e.g. "dewiki"
    pub wiki: String,
    pub page: PageRecord,
    /// Human-readable explanation
    pub infotext: String,
    /// Filter-specific ranking key; lower sorts first
    pub sort_key: f64,
    /// Suppressed ("marked as done") findings are kept but flagged
    pub hidden: bool,
}

impl Finding {
    pub fn new(
        filter: Arc<FilterInfo>,
        wiki: impl Into<String>,
        page: PageRecord,
        infotext: impl Into<String>,
        sort_key: f64,
    ) -> Self {
        Self {
            filter,
            wiki: wiki.into(),
            page,
            infotext: infotext.into(),
            sort_key,
            hidden: false,
        }
    }

    /// Short name of the filter that produced this finding
    pub fn filter_name(&self) -> &str {
        &self.filter.shortname
    }
}

/// What a worker posts to the result queue
#[derive(Debug)]
pub enum WorkerOutcome {
    Finding(Finding),
    Fault(Fault),
}

/// Resources owned by one worker and lent to each action it executes
pub struct WorkerContext {
    worker_id: usize,
    connections: ConnectionCache,
}

impl WorkerContext {
    pub fn new(worker_id: usize, connections: ConnectionCache) -> Self {
        Self {
            worker_id,
            connections,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Page database connection for `wiki`, reused across actions
    pub fn connection(&mut self, wiki: &str) -> Result<&mut dyn PageConnection> {
        self.connections.get(&database_name(wiki))
    }

    pub(crate) fn connections_mut(&mut self) -> &mut ConnectionCache {
        &mut self.connections
    }
}
