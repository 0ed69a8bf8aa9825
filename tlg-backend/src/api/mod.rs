//! HTTP API handlers for tlg-backend

pub mod flaws;
pub mod health;
pub mod query;

pub use flaws::list_flaws;
pub use health::health_routes;
pub use query::{run_query, QueryParams};
