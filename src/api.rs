//! API server for email-harvest.

use crate::error::Result;
use crate::models::BatchEvent;
use crate::scheduler::Scheduler;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use warp::sse::Event;
use warp::{Filter, Rejection, Reply, http::StatusCode};

/// API response structure
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_id: Option<u64>,
}

impl ApiResponse {
    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            batch_id: None,
        }
    }
}

/// Batch API request structure
#[derive(Deserialize, Debug)]
struct BatchRequest {
    urls: Vec<String>,
    concurrency: Option<usize>,
}

#[derive(Clone)]
struct ApiState {
    scheduler: Arc<Scheduler>,
    events: broadcast::Sender<BatchEvent>,
    default_concurrency: usize,
}

/// Every route, with rejections turned into JSON replies.
fn routes(
    state: ApiState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone());

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&ApiResponse::new(true, "Email Harvest API is running")));

    let batch = warp::path("batch")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::json())
        .and(state_filter.clone())
        .map(handle_batch);

    let control = warp::path!(String)
        .and(warp::post())
        .and(state_filter.clone())
        .and_then(handle_control);

    let status = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(state_filter.clone())
        .map(|state: ApiState| warp::reply::json(&state.scheduler.snapshot()));

    let events = warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(state_filter)
        .map(|state: ApiState| {
            let stream = event_stream(state.events.subscribe());
            warp::sse::reply(warp::sse::keep_alive().stream(stream))
        });

    health
        .or(batch)
        .or(status)
        .or(events)
        .or(control)
        .recover(handle_rejection)
        .with(warp::cors().allow_any_origin())
}

/// Start the API server; returns once `shutdown` resolves.
pub(crate) async fn start_api_server(
    scheduler: Arc<Scheduler>,
    events: broadcast::Sender<BatchEvent>,
    default_concurrency: usize,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = ApiState {
        scheduler,
        events,
        default_concurrency,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (bound, server) =
        warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, shutdown)?;

    tracing::info!(target: "api", "Listening on {}", bound);
    server.await;
    tracing::info!(target: "api", "API server stopped");
    Ok(())
}

/// Start a batch; supersedes whatever is running.
fn handle_batch(request: BatchRequest, state: ApiState) -> warp::reply::Json {
    let concurrency = request.concurrency.unwrap_or(state.default_concurrency);
    let count = request.urls.len();
    tracing::info!(target: "api", "Received batch of {} URL(s)", count);

    let batch_id = state.scheduler.start(request.urls, concurrency);
    warp::reply::json(&ApiResponse {
        success: true,
        message: format!("Started batch {} with {} URL(s)", batch_id, count),
        batch_id: Some(batch_id),
    })
}

/// `POST /pause`, `/resume` and `/stop`.
async fn handle_control(
    action: String,
    state: ApiState,
) -> std::result::Result<warp::reply::Json, Rejection> {
    let changed = match action.as_str() {
        "pause" => state.scheduler.pause(),
        "resume" => state.scheduler.resume(),
        "stop" => state.scheduler.stop(),
        _ => return Err(warp::reject::not_found()),
    };
    let message = if changed {
        format!("Batch {}", past_tense(&action))
    } else {
        format!("Nothing to {}", action)
    };
    Ok(warp::reply::json(&ApiResponse::new(changed, message)))
}

fn past_tense(action: &str) -> &'static str {
    match action {
        "pause" => "paused",
        "resume" => "resumed",
        _ => "stopping",
    }
}

/// Server-sent events for one subscriber. Lagging subscribers skip ahead.
fn event_stream(
    receiver: broadcast::Receiver<BatchEvent>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static {
    futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "api", "Event subscriber lagged; {} event(s) dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .map(|event| Ok(sse_event(&event)))
}

fn sse_event(event: &BatchEvent) -> Event {
    let name = match event {
        BatchEvent::Progress { .. } => "progress",
        BatchEvent::BatchComplete { .. } => "batchComplete",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            tracing::warn!(target: "api", "Failed to encode event: {}", e);
            Event::default().event("error").data(e.to_string())
        }
    }
}

/// Handle API rejections
async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::BAD_REQUEST, "Bad request")
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::new(false, message)),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScrapeResult;
    use crate::resolver::Resolve;
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoResolver;

    #[async_trait]
    impl Resolve for EchoResolver {
        async fn resolve(&self, url: &str) -> ScrapeResult {
            let mut result = ScrapeResult {
                url: url.to_string(),
                ..Default::default()
            };
            result.emails.insert("hello@echo.example".to_string());
            result
        }
    }

    fn state() -> ApiState {
        let (events, _) = broadcast::channel(64);
        let scheduler = Scheduler::new(
            Arc::new(EchoResolver),
            Arc::new(events.clone()),
            None,
            Duration::ZERO,
        );
        ApiState {
            scheduler: Arc::new(scheduler),
            events,
            default_concurrency: 2,
        }
    }

    fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> serde_json::Value {
        serde_json::from_slice(response.body()).expect("json body")
    }

    #[tokio::test]
    async fn health_reports_running() {
        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes(state()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response)["success"], true);
    }

    #[tokio::test]
    async fn batch_runs_to_completion() {
        let state = state();
        let filter = routes(state.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/batch")
            .json(&serde_json::json!({ "urls": ["https://a.example", "https://b.example"] }))
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(&response)["batchId"], 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while state.scheduler.snapshot().processed < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("batch finishes");

        let response = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&filter)
            .await;
        let status = body(&response);
        assert_eq!(status["total"], 2);
        assert_eq!(status["processed"], 2);
        assert_eq!(status["results"]["1"]["emails"][0], "hello@echo.example");
    }

    #[tokio::test]
    async fn control_without_batch_is_a_no_op() {
        let filter = routes(state());
        for action in ["pause", "resume", "stop"] {
            let response = warp::test::request()
                .method("POST")
                .path(&format!("/{action}"))
                .reply(&filter)
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body(&response)["success"], false);
        }
    }

    #[tokio::test]
    async fn malformed_batch_is_bad_request() {
        let response = warp::test::request()
            .method("POST")
            .path("/batch")
            .header("content-type", "application/json")
            .body("{\"links\": []}")
            .reply(&routes(state()))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(&response)["success"], false);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = warp::test::request()
            .method("POST")
            .path("/rewind")
            .reply(&routes(state()))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn events_are_streamed_as_sse() {
        let (sender, receiver) = broadcast::channel(8);
        let mut stream = Box::pin(event_stream(receiver));

        sender
            .send(BatchEvent::BatchComplete {
                batch_id: 1,
                processed: 0,
                total: 0,
                stopped: false,
            })
            .unwrap();
        drop(sender);

        let event = stream.next().await.expect("one event").unwrap();
        let text = event.to_string();
        assert!(text.contains("batchComplete"));
        assert!(text.contains("\"batchId\":1"));
        assert!(stream.next().await.is_none());
    }
}
