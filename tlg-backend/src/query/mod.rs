//! Boolean category queries
//!
//! Turns a query string such as `"Physics; +Living people; -title#Foo"` into
//! a sorted set of page ids.

pub mod evaluator;
pub mod parser;

pub use evaluator::{watchlist_pages, GraphHandle, QueryEvaluator};
pub use parser::{BooleanQuery, GeoAnchor, Operator, QueryClause, QueryTerm, SetOp};

/// Largest page-id set a query may produce; the tail is discarded
pub const MAX_RESULTS: usize = 1_500_000;

/// Per-term cap passed to the graph service
pub const TERM_LIMIT: usize = 1_000_000;

/// Category ids per membership lookup round trip
pub const MEMBERSHIP_BATCH: usize = 500;
