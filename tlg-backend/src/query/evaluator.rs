//! Query evaluation against the collaborators

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::collaborators::{
    CategoryGraph, Collaborators, GraphLocator, PageId, WatchlistEntry, NS_MAIN,
};
use crate::error::{Error, Result};

use super::parser::{BooleanQuery, GeoAnchor, QueryTerm, SetOp};
use super::{MAX_RESULTS, MEMBERSHIP_BATCH, TERM_LIMIT};

/// The graph a run evaluates categories against
#[derive(Clone)]
pub struct GraphHandle {
    graph: Arc<dyn CategoryGraph>,
    /// Graph contains leaf pages; otherwise categories must be expanded
    leaves: bool,
}

impl GraphHandle {
    /// Prefer the full graph `{wiki}`, fall back to the category-only graph
    /// `{wiki}_ns14`
    pub fn locate(locator: &dyn GraphLocator, wiki: &str) -> Result<Self> {
        if let Some(graph) = locator.locate(wiki) {
            return Ok(Self { graph, leaves: true });
        }
        let category_only = format!("{}_ns14", wiki);
        if let Some(graph) = locator.locate(&category_only) {
            debug!("using category-only graph {}", category_only);
            return Ok(Self {
                graph,
                leaves: false,
            });
        }
        Err(Error::BackendUnavailable(wiki.to_string()))
    }

    pub fn has_leaves(&self) -> bool {
        self.leaves
    }

    pub fn graph_name(&self) -> &str {
        self.graph.graph_name()
    }
}

/// Evaluates a [`BooleanQuery`] for one wiki
pub struct QueryEvaluator<'a> {
    wiki: &'a str,
    graph: &'a GraphHandle,
    collaborators: &'a Collaborators,
    max_results: usize,
    term_limit: usize,
    membership_batch: usize,
}

impl<'a> QueryEvaluator<'a> {
    pub fn new(wiki: &'a str, graph: &'a GraphHandle, collaborators: &'a Collaborators) -> Self {
        Self {
            wiki,
            graph,
            collaborators,
            max_results: MAX_RESULTS,
            term_limit: TERM_LIMIT,
            membership_batch: MEMBERSHIP_BATCH,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_term_limit(mut self, term_limit: usize) -> Self {
        self.term_limit = term_limit;
        self
    }

    pub fn with_membership_batch(mut self, batch: usize) -> Self {
        self.membership_batch = batch.max(1);
        self
    }

    /// Page ids matching `query`, ascending, at most `max_results`
    pub fn evaluate(&self, query: &BooleanQuery) -> Result<Vec<PageId>> {
        let mut result: HashSet<PageId> = HashSet::new();

        for (n, clause) in query.clauses.iter().enumerate() {
            let Some(op) = clause.set_op(n == 0) else {
                debug!(" - {} ignored as first term", clause.term);
                continue;
            };
            let ids = self.resolve(&clause.term)?;
            debug!(" {:?} {} ({} ids)", op, clause.term, ids.len());
            match op {
                SetOp::Union => result.extend(ids),
                SetOp::Intersect => {
                    let other: HashSet<PageId> = ids.into_iter().collect();
                    result.retain(|id| other.contains(id));
                }
                SetOp::Difference => {
                    for id in ids {
                        result.remove(&id);
                    }
                }
            }
        }

        let mut ids: Vec<PageId> = result.into_iter().collect();
        ids.sort_unstable();
        if ids.len() > self.max_results {
            info!("capping result set of {} ids to {}", ids.len(), self.max_results);
            ids.truncate(self.max_results);
        }
        Ok(ids)
    }

    /// Ids for a single term; may contain duplicates
    pub fn resolve(&self, term: &QueryTerm) -> Result<Vec<PageId>> {
        match term {
            QueryTerm::Category { name, depth } => self.resolve_category(name, *depth),
            QueryTerm::Title { title } => {
                let id = self
                    .collaborators
                    .titles
                    .page_id_by_title(self.wiki, &title.replace(' ', "_"), NS_MAIN)?
                    .ok_or_else(|| {
                        Error::validation(format!("Page not found in mainspace: {}", title))
                    })?;
                Ok(vec![id])
            }
            QueryTerm::Watchlist { user, token } => {
                let entries = self.collaborators.watchlists.fetch(self.wiki, user, token)?;
                Ok(watchlist_pages(&entries))
            }
            QueryTerm::GeoBox { anchor, radius_km } => {
                let (lat, lon) = self.anchor_coordinate(anchor)?;
                debug!(
                    "looking for pages in {} at {},{} with max distance {} km",
                    self.wiki, lat, lon, radius_km
                );
                self.collaborators
                    .geo
                    .pages_in_bounding_box(self.wiki, lat, lon, *radius_km)
            }
        }
    }

    fn resolve_category(&self, name: &str, depth: u32) -> Result<Vec<PageId>> {
        if self.graph.has_leaves() {
            return self
                .graph
                .graph
                .pages_in_category(name, depth, Some(self.term_limit));
        }

        // category-only graphs list subcategories one level short of `depth`;
        // depth 0 matches nothing, as on a leaf graph
        let categories = self
            .graph
            .graph
            .pages_in_category(name, depth.saturating_sub(1), None)?;
        if depth == 0 {
            return Ok(Vec::new());
        }

        let mut pages = Vec::new();
        for chunk in categories.chunks(self.membership_batch) {
            pages.extend(self.collaborators.membership.expand_to_pages(self.wiki, chunk)?);
            debug!("expanded '{}' to {} pages", name, pages.len());
            if pages.len() > self.term_limit {
                debug!("stopping expansion of '{}'", name);
                break;
            }
        }
        Ok(pages)
    }

    fn anchor_coordinate(&self, anchor: &GeoAnchor) -> Result<(f64, f64)> {
        match anchor {
            GeoAnchor::Point { lat, lon } => Ok((*lat, *lon)),
            GeoAnchor::Page { title } => {
                let id = self
                    .collaborators
                    .titles
                    .page_id_by_title(self.wiki, &title.replace(' ', "_"), NS_MAIN)?
                    .ok_or_else(|| Error::validation(format!("Page not found: {}", title)))?;
                self.collaborators
                    .geo
                    .coordinate_of(self.wiki, id)?
                    .ok_or_else(|| Error::validation(format!("No geocoords found for '{}'", title)))
            }
        }
    }
}

/// Main-namespace ids from watchlist rows, one per page (newest row wins)
pub fn watchlist_pages(entries: &[WatchlistEntry]) -> Vec<PageId> {
    let mut newest: HashMap<PageId, DateTime<Utc>> = HashMap::new();
    for entry in entries {
        if entry.namespace != NS_MAIN || entry.page_id == 0 {
            continue;
        }
        newest
            .entry(entry.page_id)
            .and_modify(|ts| {
                if entry.timestamp > *ts {
                    *ts = entry.timestamp;
                }
            })
            .or_insert(entry.timestamp);
    }
    let mut ids: Vec<PageId> = newest.into_keys().collect();
    ids.sort_unstable();
    ids
}
