//! Concurrent action engine
//!
//! Filters fill the [`ActionQueue`]; a [`WorkerPool`] drains it and sends
//! [`WorkerOutcome`]s to the [`ResultAggregator`]. The [`Orchestrator`] runs
//! the whole pipeline for one query.

pub mod action;
pub mod aggregator;
pub mod connections;
pub mod orchestrator;
pub mod queue;
pub mod worker;

pub use action::{Action, Finding, WorkerContext, WorkerOutcome};
pub use aggregator::{MergedPage, ResultAggregator};
pub use connections::ConnectionCache;
pub use orchestrator::{EngineConfig, Orchestrator, QueryRun, RunRequest};
pub use queue::{ActionQueue, QueuedAction};
pub use worker::{PoolConfig, WorkerPool};
