//! External collaborator contracts
//!
//! The category graph service, the wiki API (watchlists), the geo index and
//! the page database are all outside this crate. The engine only talks to them
//! through the traits below; [`crate::fixture::FixtureBackend`] provides an
//! in-memory implementation of every trait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// Page identifier
pub type PageId = u64;

/// Identifier of a category page (namespace 14)
pub type CategoryId = u64;

/// Article namespace
pub const NS_MAIN: i32 = 0;
/// File namespace; titles are prefixed with "File:" in results
pub const NS_FILE: i32 = 6;
/// Category namespace
pub const NS_CATEGORY: i32 = 14;

/// Page row as returned by the page database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_id: PageId,
    pub page_namespace: i32,
    /// Title in database form (underscores, no namespace prefix)
    pub page_title: String,
    /// Latest revision id
    pub page_latest: u64,
    /// Page length in bytes
    #[serde(default)]
    pub page_len: u64,
}

/// One watchlist row (one per revision; the same page may appear many times)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub page_id: PageId,
    #[serde(default)]
    pub namespace: i32,
    pub timestamp: DateTime<Utc>,
}

/// Database name for a wiki, e.g. "dewiki" -> "dewiki_p"
pub fn database_name(wiki: &str) -> String {
    format!("{}_p", wiki)
}

/// Category graph service for one graph (e.g. "dewiki" or "dewiki_ns14")
pub trait CategoryGraph: Send + Sync {
    fn graph_name(&self) -> &str;

    /// All nodes reachable from `category` within `depth` levels.
    ///
    /// A leaf-inclusive graph returns page ids; a category-only graph returns
    /// category ids. Unknown categories are a validation error.
    fn pages_in_category(
        &self,
        category: &str,
        depth: u32,
        max: Option<usize>,
    ) -> Result<Vec<PageId>>;
}

/// Finds the graph service hosting a named graph
pub trait GraphLocator: Send + Sync {
    fn locate(&self, graph_name: &str) -> Option<Arc<dyn CategoryGraph>>;
}

/// Expands category ids to the ids of their member pages
pub trait MembershipLookup: Send + Sync {
    fn expand_to_pages(&self, wiki: &str, categories: &[CategoryId]) -> Result<Vec<PageId>>;
}

/// Exact title lookup
pub trait TitleLookup: Send + Sync {
    fn page_id_by_title(&self, wiki: &str, title: &str, namespace: i32) -> Result<Option<PageId>>;
}

/// Public watchlist access (owner + watchlist token)
pub trait WatchlistLookup: Send + Sync {
    fn fetch(&self, wiki: &str, user: &str, token: &str) -> Result<Vec<WatchlistEntry>>;
}

/// Geotag index
pub trait GeoLookup: Send + Sync {
    fn coordinate_of(&self, wiki: &str, page_id: PageId) -> Result<Option<(f64, f64)>>;

    /// Pages whose coordinate lies inside the box approximating `radius_km`
    /// around (`lat`, `lon`). Only box containment is checked.
    fn pages_in_bounding_box(
        &self,
        wiki: &str,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<PageId>>;
}

/// An open connection to the page database, owned by a single worker
pub trait PageConnection: Send {
    fn fetch_pages(&mut self, ids: &[PageId]) -> Result<Vec<PageRecord>>;

    fn close(&mut self) {}
}

/// Opens page database connections
pub trait PageSource: Send + Sync {
    fn connect(&self, database: &str) -> Result<Box<dyn PageConnection>>;
}

/// Every collaborator a run needs
#[derive(Clone)]
pub struct Collaborators {
    pub graphs: Arc<dyn GraphLocator>,
    pub membership: Arc<dyn MembershipLookup>,
    pub titles: Arc<dyn TitleLookup>,
    pub watchlists: Arc<dyn WatchlistLookup>,
    pub geo: Arc<dyn GeoLookup>,
    pub pages: Arc<dyn PageSource>,
}

impl Collaborators {
    /// Use one backend object for every role
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: GraphLocator
            + MembershipLookup
            + TitleLookup
            + WatchlistLookup
            + GeoLookup
            + PageSource
            + 'static,
    {
        Self {
            graphs: backend.clone(),
            membership: backend.clone(),
            titles: backend.clone(),
            watchlists: backend.clone(),
            geo: backend.clone(),
            pages: backend,
        }
    }
}
