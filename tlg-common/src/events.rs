//! Event types emitted by a query run
//!
//! A run produces a finite, ordered sequence of events. On the wire each event
//! is one JSON object per line:
//!
//! ```text
//! {"status":"query found 3 results."}
//! {"progress":"2/6"}
//! {"result":{"page":{...},"flaws":[...]}}
//! {"error":"Input validation failed:\nEmpty category name specified."}
//! ```

use crate::Result;
use serde::{Deserialize, Serialize};

/// One event of a query run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlgEvent {
    /// Human-readable status line
    Status(String),

    /// Progress as "done/total" actions
    Progress(String),

    /// One page of the final, sorted result list
    Result(PageReport),

    /// Run aborted; no further events follow
    Error(String),
}

/// Page metadata as reported to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page_id: u64,
    pub page_namespace: i32,
    /// Display title (underscores replaced by spaces)
    pub page_title: String,
    pub page_latest: u64,
}

/// One filter match on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlawReport {
    /// Filter label
    pub name: String,
    pub infotext: String,
    pub hidden: bool,
}

/// A page together with every filter that matched it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub page: PageSummary,
    pub flaws: Vec<FlawReport>,
}

impl TlgEvent {
    pub fn status(text: impl Into<String>) -> Self {
        TlgEvent::Status(text.into())
    }

    pub fn progress(done: usize, total: usize) -> Self {
        TlgEvent::Progress(format!("{}/{}", done, total))
    }

    pub fn error(text: impl Into<String>) -> Self {
        TlgEvent::Error(text.into())
    }

    /// Get event type as string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            TlgEvent::Status(_) => "status",
            TlgEvent::Progress(_) => "progress",
            TlgEvent::Result(_) => "result",
            TlgEvent::Error(_) => "error",
        }
    }

    /// Encode as a single JSON line (without trailing newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_encoding() {
        let line = TlgEvent::status("query found 3 results.").to_json_line().unwrap();
        assert_eq!(line, r#"{"status":"query found 3 results."}"#);
    }

    #[test]
    fn test_progress_encoding() {
        let event = TlgEvent::progress(2, 6);
        assert_eq!(event, TlgEvent::Progress("2/6".to_string()));
        assert_eq!(event.to_json_line().unwrap(), r#"{"progress":"2/6"}"#);
        assert_eq!(event.event_type(), "progress");
    }

    #[test]
    fn test_result_encoding() {
        let event = TlgEvent::Result(PageReport {
            page: PageSummary {
                page_id: 42,
                page_namespace: 0,
                page_title: "Red fox".to_string(),
                page_latest: 1001,
            },
            flaws: vec![FlawReport {
                name: "Short article".to_string(),
                infotext: "812 bytes".to_string(),
                hidden: false,
            }],
        });

        let json: serde_json::Value = serde_json::from_str(&event.to_json_line().unwrap()).unwrap();
        assert_eq!(json["result"]["page"]["page_id"], 42);
        assert_eq!(json["result"]["page"]["page_title"], "Red fox");
        assert_eq!(json["result"]["flaws"][0]["name"], "Short article");
        assert_eq!(json["result"]["flaws"][0]["hidden"], false);
    }

    #[test]
    fn test_error_decodes_back() {
        let line = TlgEvent::error("boom").to_json_line().unwrap();
        let decoded: TlgEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded, TlgEvent::Error("boom".to_string()));
        assert_eq!(decoded.event_type(), "error");
    }
}
