//! Streamed query runs
//!
//! The run itself is blocking (it sleeps between polls and joins worker
//! threads), so it is driven on tokio's blocking pool. Events are forwarded
//! through a bounded channel and written as JSON lines.

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tlg_common::TlgEvent;

use crate::engine::RunRequest;
use crate::AppState;

/// Events buffered between the run and the response body
const EVENT_BUFFER: usize = 64;

/// Query string of GET /query
#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub lang: String,
    pub query: String,
    pub depth: Option<u32>,
    #[serde(default)]
    pub flaws: String,
}

/// GET /query?lang=de&query=Physics&depth=2&flaws=PageSize
///
/// Responds with `application/x-ndjson`, one event per line.
pub async fn run_query(State(state): State<AppState>, Query(params): Query<QueryParams>) -> Response {
    let request = RunRequest {
        lang: params.lang,
        query: params.query,
        depth: params.depth.unwrap_or(state.default_depth),
        flaws: params.flaws,
    };
    let run = state.orchestrator.run(request);
    info!(run_id = %run.run_id(), "HTTP query run started");

    let (tx, mut rx) = mpsc::channel::<TlgEvent>(EVENT_BUFFER);
    tokio::task::spawn_blocking(move || {
        for event in run {
            if tx.blocking_send(event).is_err() {
                debug!("client disconnected, abandoning event stream");
                break;
            }
        }
    });

    let events = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    };
    let lines = events.filter_map(|event| async move {
        match event.to_json_line() {
            Ok(mut line) => {
                line.push('\n');
                Some(Ok::<String, Infallible>(line))
            }
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event.event_type(), e);
                None
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}
