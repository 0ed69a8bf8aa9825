//! End-to-end query runs over the fixture backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tlg_backend::collaborators::{Collaborators, PageId, PageRecord};
use tlg_backend::engine::{Action, Finding, WorkerContext};
use tlg_backend::engine::queue::ActionQueue;
use tlg_backend::filters::{FilterInfo, FilterRegistry, FlawFilter, PageCheck, PageCheckAction};
use tlg_backend::fixture::FixtureBackend;
use tlg_backend::{EngineConfig, Error, Orchestrator, Result, RunRequest};
use tlg_common::TlgEvent;

fn dataset(pages: u64) -> Value {
    let pages: Vec<Value> = (1..=pages)
        .map(|id| {
            json!({
                "page_id": id,
                "page_namespace": 0,
                "page_title": format!("Doc_{:03}", id),
                "page_latest": id * 100,
                "page_len": id * 10,
                "categories": ["Docs"]
            })
        })
        .collect();
    json!({"wikis": {"dewiki": {
        "categories": [{"id": 1, "name": "Docs"}],
        "pages": pages
    }}})
}

fn info(name: &str) -> Arc<FilterInfo> {
    Arc::new(FilterInfo::new(name, format!("{} label", name), "", "Test"))
}

/// Filter applying a plain per-page check
struct CheckFilter {
    info: Arc<FilterInfo>,
    check: PageCheck,
}

impl FlawFilter for CheckFilter {
    fn info(&self) -> &Arc<FilterInfo> {
        &self.info
    }

    fn create_actions(&self, wiki: &str, batch: &[PageId], queue: &ActionQueue) {
        queue.push(Box::new(PageCheckAction::new(self.info.clone(), wiki, batch, self.check)));
    }
}

/// Actions that only become ready some time after creation and emit every
/// page twice
struct LateFilter {
    info: Arc<FilterInfo>,
    executions: Arc<AtomicUsize>,
}

struct LateAction {
    info: Arc<FilterInfo>,
    wiki: String,
    pages: Vec<PageId>,
    ready_at: Instant,
    executions: Arc<AtomicUsize>,
}

impl Action for LateAction {
    fn subject(&self) -> &str {
        &self.info.shortname
    }

    fn is_ready(&self) -> bool {
        Instant::now() >= self.ready_at
    }

    fn execute(self: Box<Self>, ctx: &mut WorkerContext) -> Result<Vec<Finding>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let records = ctx.connection(&self.wiki)?.fetch_pages(&self.pages)?;
        let mut findings = Vec::new();
        for page in records {
            for _ in 0..2 {
                findings.push(Finding::new(
                    self.info.clone(),
                    self.wiki.as_str(),
                    page.clone(),
                    "late",
                    page.page_id as f64,
                ));
            }
        }
        Ok(findings)
    }
}

impl FlawFilter for LateFilter {
    fn info(&self) -> &Arc<FilterInfo> {
        &self.info
    }

    fn create_actions(&self, wiki: &str, batch: &[PageId], queue: &ActionQueue) {
        queue.push(Box::new(LateAction {
            info: self.info.clone(),
            wiki: wiki.to_string(),
            pages: batch.to_vec(),
            ready_at: Instant::now() + Duration::from_millis(100),
            executions: self.executions.clone(),
        }));
    }
}

/// Fails (or panics) on the batch containing page 42
struct BrokenFilter {
    info: Arc<FilterInfo>,
    panic: bool,
}

struct BrokenAction {
    info: Arc<FilterInfo>,
    pages: Vec<PageId>,
    panic: bool,
}

impl Action for BrokenAction {
    fn subject(&self) -> &str {
        &self.info.shortname
    }

    fn execute(self: Box<Self>, _ctx: &mut WorkerContext) -> Result<Vec<Finding>> {
        if !self.pages.contains(&42) {
            return Ok(Vec::new());
        }
        if self.panic {
            panic!("filter bug on page 42");
        }
        Err(Error::collaborator("disk on fire"))
    }
}

impl FlawFilter for BrokenFilter {
    fn info(&self) -> &Arc<FilterInfo> {
        &self.info
    }

    fn create_actions(&self, _wiki: &str, batch: &[PageId], queue: &ActionQueue) {
        queue.push(Box::new(BrokenAction {
            info: self.info.clone(),
            pages: batch.to_vec(),
            panic: self.panic,
        }));
    }
}

/// One action that parks its worker between two barriers
struct BlockingFilter {
    info: Arc<FilterInfo>,
    started: Arc<Barrier>,
    finish: Arc<Barrier>,
}

struct BlockingAction {
    info: Arc<FilterInfo>,
    started: Arc<Barrier>,
    finish: Arc<Barrier>,
}

impl Action for BlockingAction {
    fn subject(&self) -> &str {
        &self.info.shortname
    }

    fn execute(self: Box<Self>, _ctx: &mut WorkerContext) -> Result<Vec<Finding>> {
        self.started.wait();
        self.finish.wait();
        Ok(Vec::new())
    }
}

impl FlawFilter for BlockingFilter {
    fn info(&self) -> &Arc<FilterInfo> {
        &self.info
    }

    fn create_actions(&self, _wiki: &str, batch: &[PageId], queue: &ActionQueue) {
        queue.push(Box::new(BlockingAction {
            info: self.info.clone(),
            started: self.started.clone(),
            finish: self.finish.clone(),
        }));
    }
}

fn check_even(page: &PageRecord) -> Option<(String, f64)> {
    (page.page_id % 2 == 0).then(|| ("even".to_string(), 0.0))
}

fn check_tens(page: &PageRecord) -> Option<(String, f64)> {
    (page.page_id % 10 == 0).then(|| ("tens".to_string(), 0.0))
}

fn test_config() -> EngineConfig {
    EngineConfig {
        worker_threads: 10,
        poll_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

fn orchestrator(registry: FilterRegistry, pages: u64) -> Orchestrator {
    let backend = Arc::new(FixtureBackend::from_value(dataset(pages)).unwrap());
    Orchestrator::new(Collaborators::from_backend(backend), Arc::new(registry), test_config())
}

fn request(query: &str, flaws: &str) -> RunRequest {
    RunRequest {
        lang: "de".to_string(),
        query: query.to_string(),
        depth: 1,
        flaws: flaws.to_string(),
    }
}

fn results(events: &[TlgEvent]) -> Vec<&tlg_common::events::PageReport> {
    events
        .iter()
        .filter_map(|e| match e {
            TlgEvent::Result(report) => Some(report),
            _ => None,
        })
        .collect()
}

fn errors(events: &[TlgEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            TlgEvent::Error(message) => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_end_to_end_ten_workers_three_filters() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut registry = FilterRegistry::new();
    registry.register(Arc::new(CheckFilter {
        info: info("Even"),
        check: check_even,
    }));
    registry.register(Arc::new(CheckFilter {
        info: info("Tens"),
        check: check_tens,
    }));
    registry.register(Arc::new(LateFilter {
        info: info("All"),
        executions: executions.clone(),
    }));

    let events: Vec<TlgEvent> = orchestrator(registry, 100)
        .run(request("Docs", "Even Tens All"))
        .collect();

    assert_eq!(
        events[0],
        TlgEvent::status("evaluating query string 'Docs' with depth 1")
    );
    assert_eq!(events[1], TlgEvent::status("query found 100 results."));
    assert_eq!(
        events[2],
        TlgEvent::status("100 pages to test, 30 actions to process")
    );
    assert!(errors(&events).is_empty());

    let complete: Vec<&TlgEvent> = events
        .iter()
        .filter(|e| **e == TlgEvent::progress(30, 30))
        .collect();
    assert_eq!(complete.len(), 1);

    // every late action ran exactly once
    assert_eq!(executions.load(Ordering::SeqCst), 10);

    let reports = results(&events);
    assert_eq!(reports.len(), 100);
    assert_eq!(reports[0].flaws.len(), 3);
    assert_eq!(reports[0].page.page_id, 10);
    assert_eq!(reports[0].page.page_title, "Doc 010");
    let names: Vec<&str> = reports[0].flaws.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["All label", "Even label", "Tens label"]);
    assert!(reports[..10].iter().all(|r| r.flaws.len() == 3));
    assert!(reports[10..50].iter().all(|r| r.flaws.len() == 2));
    assert!(reports[50..].iter().all(|r| r.flaws.len() == 1));

    // duplicate findings from the late filter were merged
    let n = events.len();
    assert_eq!(
        events[n - 1],
        TlgEvent::status("matches per filter: All: 200, Even: 50, Tens: 10")
    );
    match &events[n - 2] {
        TlgEvent::Status(text) => {
            assert!(text.starts_with("100 pages tested in 30 actions. 100 pages in result set."))
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_current_actions_name_running_filter() {
    let started = Arc::new(Barrier::new(2));
    let finish = Arc::new(Barrier::new(2));
    let mut registry = FilterRegistry::new();
    registry.register(Arc::new(BlockingFilter {
        info: info("Slow"),
        started: started.clone(),
        finish: finish.clone(),
    }));

    let backend = Arc::new(FixtureBackend::from_value(dataset(5)).unwrap());
    let config = EngineConfig {
        worker_threads: 1,
        ..test_config()
    };
    let mut run = Orchestrator::new(Collaborators::from_backend(backend), Arc::new(registry), config)
        .run(request("Docs", "Slow"));
    assert!(run.current_actions().is_empty());

    // the pool is released once the dispatch status is out
    let mut events = Vec::new();
    for event in run.by_ref() {
        let dispatched = event == TlgEvent::status("5 pages to test, 1 actions to process");
        events.push(event);
        if dispatched {
            break;
        }
    }
    started.wait();
    assert_eq!(run.current_actions(), vec!["Slow".to_string()]);

    finish.wait();
    events.extend(run.by_ref());
    assert!(errors(&events).is_empty());
    assert!(run.current_actions().is_empty());
}

#[test]
fn test_builtin_filters_select_all() {
    let events: Vec<TlgEvent> = orchestrator(FilterRegistry::with_builtin(), 100)
        .run(request("Docs", "ALL"))
        .collect();

    assert!(errors(&events).is_empty());
    // every page is shorter than 2000 bytes
    let reports = results(&events);
    assert_eq!(reports.len(), 100);
    // 13, 26, ... carry both findings and come first
    assert_eq!(reports[0].flaws.len(), 2);
    assert_eq!(reports.iter().filter(|r| r.flaws.len() == 2).count(), 7);
}

#[test]
fn test_failing_action_aborts_run() {
    for panic in [false, true] {
        let mut registry = FilterRegistry::with_builtin();
        registry.register(Arc::new(BrokenFilter {
            info: info("Broken"),
            panic,
        }));

        let events: Vec<TlgEvent> = orchestrator(registry, 100)
            .run(request("Docs", "PageSize Broken"))
            .collect();

        assert!(results(&events).is_empty());
        let errors = errors(&events);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("failed while processing Broken"), "{}", errors[0]);
        assert_eq!(events.last().map(TlgEvent::event_type), Some("error"));
    }
}

#[test]
fn test_validation_failures_emit_single_error() {
    let orchestrator = orchestrator(FilterRegistry::with_builtin(), 10);

    let cases = [
        (request("", "ALL"), "Input validation failed:\nEmpty category search string."),
        (request("Docs", "PageSize Bogus"), "Input validation failed:\nUnknown flaw Bogus"),
        (request("Docs; Nope", "ALL"), "Input validation failed:\nCategory not found: Nope"),
        (
            RunRequest {
                lang: "xx".to_string(),
                ..request("Docs", "ALL")
            },
            "no catgraph host found for graph 'xxwiki'",
        ),
    ];

    for (req, expected) in cases {
        let events: Vec<TlgEvent> = orchestrator.run(req).collect();
        assert!(results(&events).is_empty());
        assert_eq!(errors(&events), vec![expected]);
    }
}

#[test]
fn test_empty_result_set_finishes() {
    let events: Vec<TlgEvent> = orchestrator(FilterRegistry::with_builtin(), 10)
        .run(request("Docs; -Docs", "ALL"))
        .collect();

    assert!(errors(&events).is_empty());
    assert!(results(&events).is_empty());
    assert!(events.contains(&TlgEvent::status("query found 0 results.")));
    assert!(events.contains(&TlgEvent::status("0 pages to test, 0 actions to process")));
    assert_eq!(events.last(), Some(&TlgEvent::status("matches per filter: none")));
}
