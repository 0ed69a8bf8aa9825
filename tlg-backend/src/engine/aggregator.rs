//! Result aggregation
//!
//! Drains worker outcomes, merges findings per page and produces the final
//! ranking. A single fault aborts the run; merged results are then dropped
//! with the aggregator.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use tlg_common::events::{FlawReport, PageReport, PageSummary};

use crate::collaborators::NS_FILE;
use crate::error::{Error, Result};

use super::action::{Finding, WorkerOutcome};

/// All findings for one page, ordered by filter short name
#[derive(Debug, Clone)]
pub struct MergedPage {
    /// "{wiki}:{page_id}"
    pub key: String,
    pub findings: Vec<Finding>,
}

impl MergedPage {
    fn new(key: String, finding: Finding) -> Self {
        Self {
            key,
            findings: vec![finding],
        }
    }

    /// Insert unless this filter already reported the page
    fn merge(&mut self, finding: Finding) -> bool {
        match self
            .findings
            .binary_search_by(|f| f.filter_name().cmp(finding.filter_name()))
        {
            Ok(_) => false,
            Err(pos) => {
                self.findings.insert(pos, finding);
                true
            }
        }
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.findings.iter().map(Finding::filter_name).collect()
    }

    /// Sort keys in ascending order
    pub fn sort_keys(&self) -> Vec<f64> {
        let mut keys: Vec<f64> = self.findings.iter().map(|f| f.sort_key).collect();
        keys.sort_by(f64::total_cmp);
        keys
    }

    /// Title used for ranking (with the "File:" prefix where applicable)
    pub fn title(&self) -> &str {
        self.findings
            .first()
            .map(|f| f.page.page_title.as_str())
            .unwrap_or_default()
    }

    /// Render as a result event payload
    pub fn to_report(&self) -> PageReport {
        let page = self
            .findings
            .first()
            .map(|f| PageSummary {
                page_id: f.page.page_id,
                page_namespace: f.page.page_namespace,
                page_title: f.page.page_title.replace('_', " "),
                page_latest: f.page.page_latest,
            })
            .unwrap_or_else(|| PageSummary {
                page_id: 0,
                page_namespace: 0,
                page_title: String::new(),
                page_latest: 0,
            });

        PageReport {
            page,
            flaws: self
                .findings
                .iter()
                .map(|f| FlawReport {
                    name: f.filter.label.clone(),
                    infotext: f.infotext.clone(),
                    hidden: f.hidden,
                })
                .collect(),
        }
    }
}

/// Accumulates findings during a run
#[derive(Debug, Default)]
pub struct ResultAggregator {
    /// Merged pages in first-seen order
    pages: Vec<MergedPage>,
    index: HashMap<String, usize>,
    results_per_filter: BTreeMap<String, usize>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one worker outcome into the merged set. A fault is returned as
    /// [`Error::Execution`].
    pub fn process(&mut self, outcome: WorkerOutcome) -> Result<()> {
        let mut finding = match outcome {
            WorkerOutcome::Finding(finding) => finding,
            WorkerOutcome::Fault(fault) => return Err(Error::Execution(fault)),
        };

        *self
            .results_per_filter
            .entry(finding.filter_name().to_string())
            .or_insert(0) += 1;

        if finding.page.page_namespace == NS_FILE {
            finding.page.page_title = format!("File:{}", finding.page.page_title);
        }

        let key = format!("{}:{}", finding.wiki, finding.page.page_id);
        match self.index.get(&key) {
            Some(&idx) => {
                let filter = finding.filter_name().to_string();
                if !self.pages[idx].merge(finding) {
                    trace!("omitting duplicate {} result for {}", filter, key);
                }
            }
            None => {
                self.index.insert(key.clone(), self.pages.len());
                self.pages.push(MergedPage::new(key, finding));
            }
        }
        Ok(())
    }

    /// Process whatever is waiting in the channel, for at most `budget`.
    /// Returns the number of outcomes processed.
    pub fn drain(&mut self, results: &Receiver<WorkerOutcome>, budget: Duration) -> Result<usize> {
        let start = Instant::now();
        let mut processed = 0;
        while start.elapsed() < budget {
            match results.try_recv() {
                Ok(outcome) => {
                    self.process(outcome)?;
                    processed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if processed > 0 {
            debug!("drained {} results, {} pages merged", processed, self.pages.len());
        }
        Ok(processed)
    }

    /// Number of distinct pages with at least one finding
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Findings received per filter, duplicates included
    pub fn results_per_filter(&self) -> &BTreeMap<String, usize> {
        &self.results_per_filter
    }

    /// Consume the aggregator and return pages in final order
    pub fn into_sorted(self) -> Vec<MergedPage> {
        let mut pages = self.pages;
        pages.sort_by(compare_pages);
        pages
    }
}

/// Ranking: more filters first, then filter names, sort keys and title.
/// Equal pages keep insertion order (the sort is stable).
pub fn compare_pages(a: &MergedPage, b: &MergedPage) -> Ordering {
    b.findings
        .len()
        .cmp(&a.findings.len())
        .then_with(|| a.filter_names().cmp(&b.filter_names()))
        .then_with(|| compare_keys(&a.sort_keys(), &b.sort_keys()))
        .then_with(|| a.title().cmp(b.title()))
}

fn compare_keys(a: &[f64], b: &[f64]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}
