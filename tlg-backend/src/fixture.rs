//! In-memory collaborator backend
//!
//! Loads wikis, categories, pages, coordinates and watchlists from a JSON
//! dataset and implements every collaborator trait on top of it. Used by the
//! CLI (`--dataset`) and by tests.
//!
//! ```json
//! {"wikis": {"dewiki": {
//!     "leaves": true,
//!     "categories": [{"id": 100, "name": "Physics", "parents": []}],
//!     "pages": [{"page_id": 1, "page_namespace": 0, "page_title": "Atom",
//!                "page_latest": 11, "page_len": 900,
//!                "categories": ["Physics"], "coordinates": [52.5, 13.4]}],
//!     "watchlists": [{"user": "Alice", "token": "t0k3n", "entries": []}]
//! }}}
//! ```
//!
//! A wiki with `"leaves": true` is served as graph `{wiki}`; otherwise as the
//! category-only graph `{wiki}_ns14`.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::collaborators::{
    CategoryGraph, CategoryId, GeoLookup, GraphLocator, MembershipLookup, PageConnection, PageId,
    PageRecord, PageSource, TitleLookup, WatchlistEntry, WatchlistLookup, NS_CATEGORY,
};
use crate::error::{Error, Result};

/// Kilometers per degree of latitude
const KM_PER_DEGREE: f64 = 111.32;

#[derive(Debug, Deserialize)]
struct Dataset {
    #[serde(default)]
    wikis: BTreeMap<String, WikiDataset>,
}

fn default_leaves() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WikiDataset {
    #[serde(default = "default_leaves")]
    leaves: bool,
    #[serde(default)]
    categories: Vec<CategoryDef>,
    #[serde(default)]
    pages: Vec<PageDef>,
    #[serde(default)]
    watchlists: Vec<WatchlistDef>,
}

#[derive(Debug, Deserialize)]
struct CategoryDef {
    id: CategoryId,
    name: String,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PageDef {
    #[serde(flatten)]
    record: PageRecord,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    coordinates: Option<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
struct WatchlistDef {
    user: String,
    token: String,
    #[serde(default)]
    entries: Vec<WatchlistEntry>,
}

fn normalize(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// Indexed data of one wiki
#[derive(Debug, Default)]
struct WikiData {
    leaves: bool,
    category_ids: HashMap<String, CategoryId>,
    category_names: HashMap<CategoryId, String>,
    /// Parent name -> child category names
    children: HashMap<String, Vec<String>>,
    /// Category name -> member page ids (non-category pages)
    members: HashMap<String, Vec<PageId>>,
    pages: HashMap<PageId, PageRecord>,
    titles: HashMap<(i32, String), PageId>,
    coordinates: HashMap<PageId, (f64, f64)>,
    watchlists: HashMap<String, (String, Vec<WatchlistEntry>)>,
}

impl WikiData {
    fn build(data: WikiDataset) -> Self {
        let mut wiki = WikiData {
            leaves: data.leaves,
            ..Default::default()
        };

        for category in data.categories {
            let name = normalize(&category.name);
            for parent in &category.parents {
                wiki.children
                    .entry(normalize(parent))
                    .or_default()
                    .push(name.clone());
            }
            wiki.category_ids.insert(name.clone(), category.id);
            wiki.category_names.insert(category.id, name);
        }

        for page in data.pages {
            let id = page.record.page_id;
            if page.record.page_namespace != NS_CATEGORY {
                for category in &page.categories {
                    wiki.members.entry(normalize(category)).or_default().push(id);
                }
            }
            if let Some(coordinate) = page.coordinates {
                wiki.coordinates.insert(id, coordinate);
            }
            wiki.titles.insert(
                (page.record.page_namespace, page.record.page_title.clone()),
                id,
            );
            wiki.pages.insert(id, page.record);
        }

        for watchlist in data.watchlists {
            wiki.watchlists
                .insert(watchlist.user, (watchlist.token, watchlist.entries));
        }
        wiki
    }

    /// Categories at most `depth` levels below `root` (root included)
    fn categories_within(&self, root: &str, depth: u32) -> Result<Vec<String>> {
        if !self.category_ids.contains_key(root) {
            return Err(Error::validation(format!("Category not found: {}", root)));
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        let mut frontier = VecDeque::from([(root.to_string(), 0u32)]);
        seen.insert(root.to_string());

        while let Some((name, level)) = frontier.pop_front() {
            if level < depth {
                for child in self.children.get(&name).into_iter().flatten() {
                    if seen.insert(child.clone()) {
                        frontier.push_back((child.clone(), level + 1));
                    }
                }
            }
            out.push(name);
        }
        Ok(out)
    }
}

/// One graph served by the fixture
struct FixtureGraph {
    name: String,
    wiki: Arc<WikiData>,
}

impl CategoryGraph for FixtureGraph {
    fn graph_name(&self) -> &str {
        &self.name
    }

    fn pages_in_category(&self, category: &str, depth: u32, max: Option<usize>) -> Result<Vec<PageId>> {
        let category = normalize(category);
        let mut ids: Vec<PageId> = if self.wiki.leaves {
            // pages directly in a category that is less than `depth` below the root
            if depth == 0 {
                self.wiki.categories_within(&category, 0)?;
                Vec::new()
            } else {
                let mut ids: Vec<PageId> = self
                    .wiki
                    .categories_within(&category, depth - 1)?
                    .iter()
                    .flat_map(|name| self.wiki.members.get(name).into_iter().flatten().copied())
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                ids
            }
        } else {
            self.wiki
                .categories_within(&category, depth)?
                .iter()
                .filter_map(|name| self.wiki.category_ids.get(name).copied())
                .collect()
        };

        if let Some(max) = max {
            ids.truncate(max);
        }
        debug!("{}: '{}' depth {} -> {} ids", self.name, category, depth, ids.len());
        Ok(ids)
    }
}

/// Collaborator backend over an in-memory dataset
#[derive(Default)]
pub struct FixtureBackend {
    wikis: HashMap<String, Arc<WikiData>>,
}

impl FixtureBackend {
    /// Load a dataset file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let backend = Self::from_json(&text)?;
        info!("Loaded fixture dataset {} ({} wikis)", path.display(), backend.wikis.len());
        Ok(backend)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let dataset: Dataset = serde_json::from_str(text)?;
        Ok(Self::from_dataset(dataset))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let dataset: Dataset = serde_json::from_value(value)?;
        Ok(Self::from_dataset(dataset))
    }

    fn from_dataset(dataset: Dataset) -> Self {
        Self {
            wikis: dataset
                .wikis
                .into_iter()
                .map(|(name, data)| (name, Arc::new(WikiData::build(data))))
                .collect(),
        }
    }

    pub fn wiki_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.wikis.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn wiki(&self, wiki: &str) -> Result<&Arc<WikiData>> {
        self.wikis
            .get(wiki)
            .ok_or_else(|| Error::Common(tlg_common::Error::NotFound(format!("wiki '{}'", wiki))))
    }
}

impl GraphLocator for FixtureBackend {
    fn locate(&self, graph_name: &str) -> Option<Arc<dyn CategoryGraph>> {
        let (wiki, leaves) = match graph_name.strip_suffix("_ns14") {
            Some(wiki) => (wiki, false),
            None => (graph_name, true),
        };
        let data = self.wikis.get(wiki).filter(|data| data.leaves == leaves)?;
        Some(Arc::new(FixtureGraph {
            name: graph_name.to_string(),
            wiki: Arc::clone(data),
        }))
    }
}

impl MembershipLookup for FixtureBackend {
    fn expand_to_pages(&self, wiki: &str, categories: &[CategoryId]) -> Result<Vec<PageId>> {
        let data = self.wiki(wiki)?;
        Ok(categories
            .iter()
            .filter_map(|id| data.category_names.get(id))
            .flat_map(|name| data.members.get(name).into_iter().flatten().copied())
            .collect())
    }
}

impl TitleLookup for FixtureBackend {
    fn page_id_by_title(&self, wiki: &str, title: &str, namespace: i32) -> Result<Option<PageId>> {
        Ok(self
            .wiki(wiki)?
            .titles
            .get(&(namespace, title.to_string()))
            .copied())
    }
}

impl WatchlistLookup for FixtureBackend {
    fn fetch(&self, wiki: &str, user: &str, token: &str) -> Result<Vec<WatchlistEntry>> {
        match self.wiki(wiki)?.watchlists.get(user) {
            Some((expected, entries)) if expected == token => Ok(entries.clone()),
            _ => Err(Error::validation(format!(
                "Could not read watchlist of user {}: bad user name or token",
                user
            ))),
        }
    }
}

impl GeoLookup for FixtureBackend {
    fn coordinate_of(&self, wiki: &str, page_id: PageId) -> Result<Option<(f64, f64)>> {
        Ok(self.wiki(wiki)?.coordinates.get(&page_id).copied())
    }

    fn pages_in_bounding_box(&self, wiki: &str, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<PageId>> {
        // Flat-earth approximation, adequate for test data
        let dlat = radius_km / KM_PER_DEGREE;
        let dlon = radius_km / (KM_PER_DEGREE * lat.to_radians().cos().abs().max(1e-6));
        let mut ids: Vec<PageId> = self
            .wiki(wiki)?
            .coordinates
            .iter()
            .filter(|(_, (plat, plon))| (plat - lat).abs() <= dlat && (plon - lon).abs() <= dlon)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// Page database connection into the fixture
pub struct FixtureConnection {
    wiki: Arc<WikiData>,
}

impl PageConnection for FixtureConnection {
    fn fetch_pages(&mut self, ids: &[PageId]) -> Result<Vec<PageRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.wiki.pages.get(id).cloned())
            .collect())
    }
}

impl PageSource for FixtureBackend {
    fn connect(&self, database: &str) -> Result<Box<dyn PageConnection>> {
        let wiki = database.strip_suffix("_p").unwrap_or(database);
        Ok(Box::new(FixtureConnection {
            wiki: Arc::clone(self.wiki(wiki)?),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(leaves: bool) -> FixtureBackend {
        FixtureBackend::from_value(json!({"wikis": {"dewiki": {
            "leaves": leaves,
            "categories": [
                {"id": 100, "name": "Science"},
                {"id": 101, "name": "Physics", "parents": ["Science"]},
                {"id": 102, "name": "Quantum physics", "parents": ["Physics"]}
            ],
            "pages": [
                {"page_id": 1, "page_namespace": 0, "page_title": "Science", "page_latest": 1, "categories": ["Science"]},
                {"page_id": 2, "page_namespace": 0, "page_title": "Atom", "page_latest": 2, "categories": ["Physics"], "coordinates": [52.5, 13.4]},
                {"page_id": 3, "page_namespace": 0, "page_title": "Qubit", "page_latest": 3, "categories": ["Quantum_physics"], "coordinates": [48.1, 11.6]},
                {"page_id": 101, "page_namespace": 14, "page_title": "Physics", "page_latest": 4, "categories": ["Science"]}
            ]
        }}}))
        .unwrap()
    }

    #[test]
    fn test_leaf_graph_depths() {
        let backend = backend(true);
        let graph = backend.locate("dewiki").unwrap();
        assert!(backend.locate("dewiki_ns14").is_none());
        assert_eq!(graph.pages_in_category("Science", 1, None).unwrap(), vec![1]);
        assert_eq!(graph.pages_in_category("Science", 2, None).unwrap(), vec![1, 2]);
        assert_eq!(graph.pages_in_category("Science", 3, None).unwrap(), vec![1, 2, 3]);
        assert_eq!(graph.pages_in_category("Science", 3, Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_category_only_graph_matches_leaf_graph_after_expansion() {
        let backend = backend(false);
        assert!(backend.locate("dewiki").is_none());
        let graph = backend.locate("dewiki_ns14").unwrap();

        let categories = graph.pages_in_category("Science", 1, None).unwrap();
        assert_eq!(categories, vec![100, 101]);
        let mut pages = backend.expand_to_pages("dewiki", &categories).unwrap();
        pages.sort_unstable();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn test_unknown_category() {
        let backend = backend(true);
        let graph = backend.locate("dewiki").unwrap();
        let err = graph.pages_in_category("Nope", 2, None).unwrap_err();
        assert_eq!(err.to_string(), "Category not found: Nope");
    }

    #[test]
    fn test_bounding_box() {
        let backend = backend(true);
        assert_eq!(backend.pages_in_bounding_box("dewiki", 52.5, 13.4, 10.0).unwrap(), vec![2]);
        assert!(backend.pages_in_bounding_box("dewiki", 0.0, 0.0, 10.0).unwrap().is_empty());
    }

    #[test]
    fn test_connection_fetches_known_pages() {
        let backend = backend(true);
        let mut conn = backend.connect("dewiki_p").unwrap();
        let pages = conn.fetch_pages(&[2, 999]).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_title, "Atom");
    }

    #[test]
    fn test_unknown_wiki_is_not_found() {
        let backend = backend(true);
        let err = backend.connect("frwiki_p").err().unwrap();
        assert!(matches!(err, Error::Common(tlg_common::Error::NotFound(_))));
        assert_eq!(err.to_string(), "Not found: wiki 'frwiki'");
        assert!(backend.pages_in_bounding_box("frwiki", 0.0, 0.0, 1.0).is_err());
    }
}
