//! Bounded-concurrency batch scheduler.
//!
//! A fixed pool of workers shares one claim cursor over the batch's URLs.
//! Each worker loops: wait at the gate while paused, claim the next index,
//! resolve it, record the result and maybe emit progress. The gate is a
//! `watch` channel with three positions (open, paused, closed); its position
//! only changes under the queue lock, so no claim can slip past a pause.

use crate::models::{BatchEvent, QueueSnapshot, ScrapeRequest, ScrapeResult};
use crate::render::RenderEngine;
use crate::resolver::Resolve;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};

/// Receives progress and completion events.
pub(crate) trait EventSink: Send + Sync {
    fn emit(&self, event: BatchEvent);
}

impl EventSink for mpsc::UnboundedSender<BatchEvent> {
    fn emit(&self, event: BatchEvent) {
        let _ = self.send(event);
    }
}

impl EventSink for broadcast::Sender<BatchEvent> {
    fn emit(&self, event: BatchEvent) {
        // No subscribers is not an error: nobody is watching.
        let _ = self.send(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Paused,
    Closed,
}

struct QueueState {
    items: Vec<String>,
    cursor: usize,
    running_count: usize,
    processed: usize,
    workers: usize,
    finished: bool,
    results: HashMap<usize, ScrapeResult>,
    last_emit: Option<Instant>,
    // Most recent result the throttle swallowed; flushed on completion.
    held_back: Option<(usize, ScrapeResult)>,
}

enum Claim {
    Request(ScrapeRequest),
    Wait,
    Done,
}

struct Batch {
    id: u64,
    state: Mutex<QueueState>,
    gate: watch::Sender<Gate>,
}

impl Batch {
    fn new(id: u64, items: Vec<String>, workers: usize) -> Self {
        let (gate, _) = watch::channel(Gate::Open);
        Self {
            id,
            state: Mutex::new(QueueState {
                items,
                cursor: 0,
                running_count: 0,
                processed: 0,
                workers,
                finished: false,
                results: HashMap::new(),
                last_emit: None,
                held_back: None,
            }),
            gate,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self) -> Gate {
        *self.gate.borrow()
    }

    /// Moves the gate to `to` if it currently sits in one of `from`.
    fn shift_gate(&self, from: &[Gate], to: Gate) -> bool {
        let state = self.lock();
        let current = self.gate();
        if state.finished || !from.contains(&current) {
            return false;
        }
        self.gate.send_replace(to);
        true
    }

    fn claim(&self) -> Claim {
        let mut state = self.lock();
        match self.gate() {
            Gate::Closed => return Claim::Done,
            Gate::Paused => return Claim::Wait,
            Gate::Open => {}
        }
        if state.cursor >= state.items.len() {
            return Claim::Done;
        }
        let index = state.cursor;
        state.cursor += 1;
        state.running_count += 1;
        Claim::Request(ScrapeRequest {
            url: state.items[index].clone(),
            index,
        })
    }

    /// Stores a result and decides whether it is announced.
    fn record(
        &self,
        index: usize,
        result: ScrapeResult,
        progress_interval: Duration,
    ) -> Option<BatchEvent> {
        let mut state = self.lock();
        state.running_count -= 1;
        state.processed += 1;
        state.results.insert(index, result.clone());

        let nothing_left = state.cursor >= state.items.len() || self.gate() == Gate::Closed;
        let is_final = state.running_count == 0 && nothing_left;
        let now = Instant::now();
        let due = state
            .last_emit
            .is_none_or(|last| now.duration_since(last) > progress_interval);
        if !(due || is_final) {
            state.held_back = Some((index, result));
            return None;
        }

        state.last_emit = Some(now);
        state.held_back = None;
        Some(BatchEvent::Progress {
            batch_id: self.id,
            result,
            index,
            processed: state.processed,
            total: state.items.len(),
        })
    }

    /// When the last worker leaves, returns the closing events: any progress
    /// the throttle held back, then the completion.
    fn worker_exited(&self) -> Vec<BatchEvent> {
        let mut state = self.lock();
        state.workers -= 1;
        if state.workers > 0 || state.finished {
            return Vec::new();
        }
        state.finished = true;

        let total = state.items.len();
        let mut events = Vec::with_capacity(2);
        if let Some((index, result)) = state.held_back.take() {
            events.push(BatchEvent::Progress {
                batch_id: self.id,
                result,
                index,
                processed: state.processed,
                total,
            });
        }
        events.push(BatchEvent::BatchComplete {
            batch_id: self.id,
            processed: state.processed,
            total,
            stopped: self.gate() == Gate::Closed,
        });
        events
    }

    fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        let gate = self.gate();
        QueueSnapshot {
            batch_id: self.id,
            total: state.items.len(),
            cursor: state.cursor,
            active: !state.finished && gate != Gate::Closed,
            paused: !state.finished && gate == Gate::Paused,
            running_count: state.running_count,
            processed: state.processed,
            results: state.results.clone(),
        }
    }
}

struct Shared {
    resolver: Arc<dyn Resolve>,
    sink: Arc<dyn EventSink>,
    render_engine: Option<Arc<RenderEngine>>,
    progress_interval: Duration,
    current: Mutex<Option<Arc<Batch>>>,
}

impl Shared {
    fn current(&self) -> Option<Arc<Batch>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn complete(&self, batch: &Batch, events: Vec<BatchEvent>) {
        for event in events {
            if let BatchEvent::BatchComplete {
                batch_id,
                processed,
                total,
                stopped,
            } = &event
            {
                tracing::info!(
                    target: "scheduler",
                    "Batch {} {} ({}/{} processed)",
                    batch_id,
                    if *stopped { "stopped" } else { "drained" },
                    processed,
                    total
                );
            }
            self.sink.emit(event);
        }

        // A superseded batch shares the engine with its successor.
        let still_current = self.current().is_some_and(|current| current.id == batch.id);
        if !still_current {
            tracing::debug!(target: "scheduler", "Batch {} was superseded; leaving render engine up", batch.id);
            return;
        }
        if let Some(engine) = &self.render_engine {
            let engine = engine.clone();
            tokio::spawn(async move { engine.shutdown().await });
        }
    }
}

async fn run_worker(shared: Arc<Shared>, batch: Arc<Batch>) {
    let mut gate = batch.gate.subscribe();
    loop {
        match gate.wait_for(|position| *position != Gate::Paused).await {
            Ok(position) if *position == Gate::Closed => break,
            Ok(_) => {}
            Err(_) => break,
        }

        let request = match batch.claim() {
            Claim::Request(request) => request,
            Claim::Wait => continue,
            Claim::Done => break,
        };

        tracing::debug!(target: "scheduler", "Batch {} claimed #{}: {}", batch.id, request.index, request.url);
        let result = shared.resolver.resolve(&request.url).await;
        if let Some(event) = batch.record(request.index, result, shared.progress_interval) {
            shared.sink.emit(event);
        }
    }

    let events = batch.worker_exited();
    if !events.is_empty() {
        shared.complete(&batch, events);
    }
}

/// Drives one batch at a time; a new `start` supersedes the running batch.
pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new(
        resolver: Arc<dyn Resolve>,
        sink: Arc<dyn EventSink>,
        render_engine: Option<Arc<RenderEngine>>,
        progress_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                resolver,
                sink,
                render_engine,
                progress_interval,
                current: Mutex::new(None),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    fn current(&self) -> Option<Arc<Batch>> {
        self.shared.current()
    }

    /// Starts a new batch and returns its id. Must run inside a tokio runtime.
    pub(crate) fn start(&self, urls: Vec<String>, concurrency: usize) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let total = urls.len();
        let workers = concurrency.max(1).min(total);
        let batch = Arc::new(Batch::new(id, urls, workers));

        let previous = self
            .shared
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(batch.clone());
        if let Some(previous) = previous {
            if previous.shift_gate(&[Gate::Open, Gate::Paused], Gate::Closed) {
                tracing::info!(target: "scheduler", "Batch {} superseded by batch {}", previous.id, id);
            }
        }

        tracing::info!(target: "scheduler", "Starting batch {}: {} URL(s), {} worker(s)", id, total, workers);

        if workers == 0 {
            batch.lock().finished = true;
            self.shared.sink.emit(BatchEvent::BatchComplete {
                batch_id: id,
                processed: 0,
                total: 0,
                stopped: false,
            });
            return id;
        }

        for _ in 0..workers {
            tokio::spawn(run_worker(self.shared.clone(), batch.clone()));
        }
        id
    }

    /// Stops new claims; in-flight work finishes. Returns whether anything changed.
    pub(crate) fn pause(&self) -> bool {
        let changed = self
            .current()
            .is_some_and(|batch| batch.shift_gate(&[Gate::Open], Gate::Paused));
        if changed {
            tracing::info!(target: "scheduler", "Batch paused");
        }
        changed
    }

    pub(crate) fn resume(&self) -> bool {
        let changed = self
            .current()
            .is_some_and(|batch| batch.shift_gate(&[Gate::Paused], Gate::Open));
        if changed {
            tracing::info!(target: "scheduler", "Batch resumed");
        }
        changed
    }

    /// Ends the batch: nothing new is claimed, in-flight results are still
    /// recorded, and the render engine is released once the last worker exits.
    pub(crate) fn stop(&self) -> bool {
        let changed = self
            .current()
            .is_some_and(|batch| batch.shift_gate(&[Gate::Open, Gate::Paused], Gate::Closed));
        if changed {
            tracing::info!(target: "scheduler", "Batch stopping");
        }
        changed
    }

    pub(crate) fn snapshot(&self) -> QueueSnapshot {
        self.current()
            .map(|batch| batch.snapshot())
            .unwrap_or_default()
    }
}
