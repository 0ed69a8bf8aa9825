//! Query run orchestration
//!
//! A [`QueryRun`] is a lazy iterator of [`TlgEvent`]s. Each call to `next`
//! advances the run just far enough to produce the next event:
//!
//! ```text
//! Validate -> Evaluate -> Dispatch -> Poll (repeated) -> Finish -> Done
//! ```
//!
//! Any error ends the run with a single error event. Results are only emitted
//! from `Finish`, so an aborted run never yields partial results.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tlg_common::TlgEvent;

use crate::collaborators::{Collaborators, PageId};
use crate::error::{Error, Result};
use crate::filters::{FilterRegistry, FlawFilter};
use crate::query::{BooleanQuery, GraphHandle, QueryEvaluator, MAX_RESULTS};

use super::action::WorkerOutcome;
use super::aggregator::ResultAggregator;
use super::queue::ActionQueue;
use super::worker::{PoolConfig, WorkerPool};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub worker_threads: usize,
    /// Sleep between progress polls
    pub poll_interval: Duration,
    /// Time spent draining results per poll
    pub drain_budget: Duration,
    /// Time allowed for the drain after all workers have exited
    pub final_drain_budget: Duration,
    /// Idle page connections are closed after this
    pub idle_timeout: Duration,
    /// Deadline for not-ready actions, `None` for no deadline
    pub ready_timeout: Option<Duration>,
    pub max_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 10,
            poll_interval: Duration::from_millis(250),
            drain_budget: Duration::from_secs(2),
            final_drain_budget: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(3),
            ready_timeout: Some(Duration::from_secs(600)),
            max_results: MAX_RESULTS,
        }
    }
}

/// Parameters of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Language code, e.g. "de"
    pub lang: String,
    pub query: String,
    pub depth: u32,
    /// Whitespace-separated filter short names, or "ALL"
    pub flaws: String,
}

impl RunRequest {
    pub fn wiki(&self) -> String {
        format!("{}wiki", self.lang)
    }
}

/// Entry point for query runs
pub struct Orchestrator {
    collaborators: Collaborators,
    registry: Arc<FilterRegistry>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, registry: Arc<FilterRegistry>, config: EngineConfig) -> Self {
        Self {
            collaborators,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a run. Nothing happens until the returned iterator is polled.
    pub fn run(&self, request: RunRequest) -> QueryRun {
        QueryRun::new(
            request,
            self.collaborators.clone(),
            Arc::clone(&self.registry),
            self.config.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Validate,
    Evaluate,
    Dispatch,
    Poll,
    Finish,
    Done,
}

/// One run's event sequence
pub struct QueryRun {
    run_id: Uuid,
    request: RunRequest,
    wiki: String,
    collaborators: Collaborators,
    registry: Arc<FilterRegistry>,
    config: EngineConfig,

    phase: Phase,
    pending: VecDeque<TlgEvent>,
    started: Instant,

    filters: Vec<Arc<dyn FlawFilter>>,
    graph: Option<GraphHandle>,
    pages: Vec<PageId>,

    queue: Arc<ActionQueue>,
    pool: Option<WorkerPool>,
    results: Option<Receiver<WorkerOutcome>>,
    aggregator: ResultAggregator,
    total_actions: usize,
    processed: usize,
    last_poll: Option<Instant>,
}

impl QueryRun {
    fn new(
        request: RunRequest,
        collaborators: Collaborators,
        registry: Arc<FilterRegistry>,
        config: EngineConfig,
    ) -> Self {
        let wiki = request.wiki();
        Self {
            run_id: Uuid::new_v4(),
            request,
            wiki,
            collaborators,
            registry,
            config,
            phase: Phase::Validate,
            pending: VecDeque::new(),
            started: Instant::now(),
            filters: Vec::new(),
            graph: None,
            pages: Vec::new(),
            queue: Arc::new(ActionQueue::new()),
            pool: None,
            results: None,
            aggregator: ResultAggregator::new(),
            total_actions: 0,
            processed: 0,
            last_poll: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Worker labels while the pool is running
    pub fn current_actions(&self) -> Vec<String> {
        self.pool
            .as_ref()
            .map(WorkerPool::current_actions)
            .unwrap_or_default()
    }

    fn step(&mut self) -> Result<()> {
        match self.phase {
            Phase::Validate => self.validate(),
            Phase::Evaluate => self.evaluate(),
            Phase::Dispatch => self.dispatch(),
            Phase::Poll => self.poll(),
            Phase::Finish => self.finish(),
            Phase::Done => Ok(()),
        }
    }

    fn validate(&mut self) -> Result<()> {
        info!(
            target: "tlg::stats",
            run_id = %self.run_id,
            lang = %self.request.lang,
            depth = self.request.depth,
            flaws = %self.request.flaws,
            "query run started"
        );

        if self.request.query.trim().is_empty() {
            return Err(Error::validation("Empty category search string."));
        }
        self.filters = self.registry.select(&self.request.flaws)?;
        self.graph = Some(GraphHandle::locate(
            self.collaborators.graphs.as_ref(),
            &self.wiki,
        )?);

        self.pending.push_back(TlgEvent::status(format!(
            "evaluating query string '{}' with depth {}",
            self.request.query, self.request.depth
        )));
        self.phase = Phase::Evaluate;
        Ok(())
    }

    fn evaluate(&mut self) -> Result<()> {
        let query = BooleanQuery::parse(&self.request.query, self.request.depth)?;
        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| Error::BackendUnavailable(self.wiki.clone()))?;
        debug!(run_id = %self.run_id, graph = graph.graph_name(), "evaluating {} terms", query.clauses.len());

        self.pages = QueryEvaluator::new(&self.wiki, graph, &self.collaborators)
            .with_max_results(self.config.max_results)
            .evaluate(&query)?;

        self.pending.push_back(TlgEvent::status(format!(
            "query found {} results.",
            self.pages.len()
        )));
        self.phase = Phase::Dispatch;
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let pool_config = PoolConfig {
            workers: self.config.worker_threads,
            idle_timeout: self.config.idle_timeout,
            ready_timeout: self.config.ready_timeout,
        };
        let pool = WorkerPool::spawn(
            &pool_config,
            Arc::clone(&self.queue),
            Arc::clone(&self.collaborators.pages),
            tx,
        )?;
        let workers = pool.worker_count();
        self.pool = Some(pool);
        self.results = Some(rx);

        for filter in &self.filters {
            let size = chunk_size(filter.preferred_batch_size(), self.pages.len(), workers);
            for batch in self.pages.chunks(size) {
                filter.create_actions(&self.wiki, batch, &self.queue);
            }
            debug!(
                run_id = %self.run_id,
                "{}: {} pages per action",
                filter.info().shortname,
                size
            );
        }
        self.queue.close();
        self.total_actions = self.queue.len();

        self.pending.push_back(TlgEvent::status(format!(
            "{} pages to test, {} actions to process",
            self.pages.len(),
            self.total_actions
        )));

        if let Some(pool) = &self.pool {
            pool.release();
        }
        self.phase = Phase::Poll;
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        if let Some(last) = self.last_poll {
            thread::sleep(self.config.poll_interval.saturating_sub(last.elapsed()));
        }
        self.last_poll = Some(Instant::now());

        if let Some(rx) = &self.results {
            self.aggregator.drain(rx, self.config.drain_budget)?;
        }

        let active = self.pool.as_ref().map_or(0, WorkerPool::active_workers);
        let processed = self
            .total_actions
            .saturating_sub(self.queue.len() + active);

        if processed != self.processed {
            self.processed = processed;
            self.pending
                .push_back(TlgEvent::progress(processed, self.total_actions));
            self.pending.push_back(TlgEvent::status(format!(
                "{} of {} actions processed",
                processed, self.total_actions
            )));
            let busy: Vec<String> = self
                .current_actions()
                .into_iter()
                .filter(|label| !label.is_empty())
                .collect();
            debug!(
                target: "tlg::stats",
                run_id = %self.run_id,
                busy = ?busy,
                "{} workers active",
                active
            );
        }

        if active == 0 {
            self.phase = Phase::Finish;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut pool) = self.pool.take() {
            pool.join();
        }
        if let Some(rx) = self.results.take() {
            self.aggregator.drain(&rx, self.config.final_drain_budget)?;
        }

        let aggregator = std::mem::take(&mut self.aggregator);
        let per_filter = aggregator.results_per_filter().clone();
        let result_size = aggregator.page_count();
        let sorted = aggregator.into_sorted();
        let elapsed = self.started.elapsed().as_secs_f64();

        self.pending.extend(
            sorted
                .iter()
                .map(|page| TlgEvent::Result(page.to_report())),
        );

        self.pending.push_back(TlgEvent::status(format!(
            "{} pages tested in {} actions. {} pages in result set. processing took {:.1} seconds.",
            self.pages.len(),
            self.total_actions,
            result_size,
            elapsed
        )));
        let counts = if per_filter.is_empty() {
            "none".to_string()
        } else {
            per_filter
                .iter()
                .map(|(name, count)| format!("{}: {}", name, count))
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.pending
            .push_back(TlgEvent::status(format!("matches per filter: {}", counts)));

        info!(
            target: "tlg::stats",
            run_id = %self.run_id,
            pages_tested = self.pages.len(),
            action_count = self.total_actions,
            result_size,
            processing_time = elapsed,
            results_per_filter = %counts,
            "query run finished"
        );
        self.phase = Phase::Done;
        Ok(())
    }

    fn abort(&mut self, error: Error) {
        warn!(run_id = %self.run_id, "query run aborted: {}", error);
        let dropped = self.queue.discard_pending();
        if dropped > 0 {
            debug!(run_id = %self.run_id, "discarded {} pending actions", dropped);
        }
        self.queue.close();
        if let Some(pool) = self.pool.take() {
            pool.release();
        }
        self.results = None;
        self.aggregator = ResultAggregator::new();
        self.pending.clear();
        self.pending.push_back(TlgEvent::error(error.event_text()));
        self.phase = Phase::Done;
    }
}

impl Iterator for QueryRun {
    type Item = TlgEvent;

    fn next(&mut self) -> Option<TlgEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.phase == Phase::Done {
                return None;
            }
            if let Err(e) = self.step() {
                self.abort(e);
            }
        }
    }
}

/// Pages per action: the filter's preference, spread across all workers
pub fn chunk_size(preferred: usize, total: usize, workers: usize) -> usize {
    let per_worker = total.div_ceil(workers.max(1));
    preferred.min(per_worker).max(1)
}
