//! Flaw filters
//!
//! A filter turns batches of page ids into actions. Filters are registered
//! explicitly in a [`FilterRegistry`] at startup and selected per run by
//! short name.

pub mod page_size;
pub mod unlucky;

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::collaborators::{PageId, PageRecord};
use crate::engine::action::{Action, Finding, WorkerContext};
use crate::engine::queue::ActionQueue;
use crate::error::{Error, Result};

pub use page_size::PageSizeFilter;
pub use unlucky::UnluckyFilter;

/// Keyword selecting every registered filter
pub const ALL_FILTERS: &str = "ALL";

/// Static description of a filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterInfo {
    /// Unique identifier used in requests, e.g. "PageSize"
    pub shortname: String,
    /// Display name used in result events
    pub label: String,
    pub description: String,
    /// Menu group the filter is listed under
    pub group: String,
}

impl FilterInfo {
    pub fn new(
        shortname: impl Into<String>,
        label: impl Into<String>,
        description: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            shortname: shortname.into(),
            label: label.into(),
            description: description.into(),
            group: group.into(),
        }
    }
}

/// A pluggable page check
pub trait FlawFilter: Send + Sync {
    fn info(&self) -> &Arc<FilterInfo>;

    /// Upper bound on pages per action
    fn preferred_batch_size(&self) -> usize {
        100
    }

    /// Enqueue actions covering `batch`
    fn create_actions(&self, wiki: &str, batch: &[PageId], queue: &ActionQueue);
}

/// Per-page predicate used by [`PageCheckAction`]: returns the infotext and
/// sort key when the page is flawed
pub type PageCheck = fn(&PageRecord) -> Option<(String, f64)>;

/// Loads a batch of pages through the worker's connection and applies a
/// per-page check
pub struct PageCheckAction {
    filter: Arc<FilterInfo>,
    wiki: String,
    pages: Vec<PageId>,
    check: PageCheck,
}

impl PageCheckAction {
    pub fn new(filter: Arc<FilterInfo>, wiki: &str, pages: &[PageId], check: PageCheck) -> Self {
        Self {
            filter,
            wiki: wiki.to_string(),
            pages: pages.to_vec(),
            check,
        }
    }
}

impl Action for PageCheckAction {
    fn subject(&self) -> &str {
        &self.filter.shortname
    }

    fn execute(self: Box<Self>, ctx: &mut WorkerContext) -> Result<Vec<Finding>> {
        let records = ctx.connection(&self.wiki)?.fetch_pages(&self.pages)?;
        let check = self.check;
        Ok(records
            .into_iter()
            .filter_map(|page| {
                check(&page).map(|(infotext, sort_key)| {
                    Finding::new(self.filter.clone(), self.wiki.as_str(), page, infotext, sort_key)
                })
            })
            .collect())
    }
}

/// Registry of available filters keyed by short name
#[derive(Default)]
pub struct FilterRegistry {
    filters: BTreeMap<String, Arc<dyn FlawFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in filter
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PageSizeFilter::new()));
        registry.register(Arc::new(UnluckyFilter::new()));
        registry
    }

    /// Add a filter, replacing any filter with the same short name
    pub fn register(&mut self, filter: Arc<dyn FlawFilter>) {
        let name = filter.info().shortname.clone();
        debug!("registering flaw filter {}", name);
        self.filters.insert(name, filter);
    }

    pub fn get(&self, shortname: &str) -> Option<&Arc<dyn FlawFilter>> {
        self.filters.get(shortname)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    /// Resolve a whitespace-separated list of short names. `ALL` selects
    /// every registered filter. Requested order is kept, repeats removed.
    pub fn select(&self, flaws: &str) -> Result<Vec<Arc<dyn FlawFilter>>> {
        let mut selected: Vec<Arc<dyn FlawFilter>> = Vec::new();
        for name in flaws.split_whitespace() {
            if name == ALL_FILTERS {
                for filter in self.filters.values() {
                    if !contains(&selected, filter) {
                        selected.push(filter.clone());
                    }
                }
                continue;
            }
            let filter = self
                .get(name)
                .ok_or_else(|| Error::validation(format!("Unknown flaw {}", name)))?;
            if !contains(&selected, filter) {
                selected.push(filter.clone());
            }
        }
        Ok(selected)
    }

    /// `{shortname: {group, label, description}}` for every filter
    pub fn describe_json(&self) -> Value {
        let mut out = Map::new();
        for (name, filter) in &self.filters {
            let info = filter.info();
            out.insert(
                name.clone(),
                json!({
                    "group": info.group,
                    "label": info.label,
                    "description": info.description,
                }),
            );
        }
        Value::Object(out)
    }
}

fn contains(selected: &[Arc<dyn FlawFilter>], filter: &Arc<dyn FlawFilter>) -> bool {
    selected
        .iter()
        .any(|f| f.info().shortname == filter.info().shortname)
}
