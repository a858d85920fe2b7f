//! Render engine abstraction and its shared, lease-counted lifecycle.
//!
//! One browser instance serves every worker. It is launched on the first
//! `acquire`, and `shutdown` closes it only once every outstanding
//! `RenderLease` has been dropped. A later `acquire` launches a fresh
//! generation.

use crate::error::ScrapeError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

/// A fully loaded page inside the render engine.
#[async_trait]
pub(crate) trait RenderedPage: Send + Sync {
    /// The document title.
    async fn title(&self) -> Result<String, ScrapeError>;
    /// Text content of `<body>`.
    async fn text_content(&self) -> Result<String, ScrapeError>;
    /// The full serialized DOM.
    async fn content(&self) -> Result<String, ScrapeError>;
    /// Values of `attribute` on every element matching `selector`.
    async fn attribute_values(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, ScrapeError>;
    /// Evaluates a script expression inside the page.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ScrapeError>;
    /// Closes the page's tab.
    async fn close(self: Box<Self>);
}

/// A running browser that opens one isolated page per render.
#[async_trait]
pub(crate) trait Engine: Send + Sync {
    async fn open(
        &self,
        url: &str,
        navigation_timeout: Duration,
        settle_delay: Duration,
    ) -> Result<Box<dyn RenderedPage>, ScrapeError>;
    async fn shutdown(&self);
    /// False once the connection to the browser is gone (crash, killed process).
    fn is_connected(&self) -> bool {
        true
    }
}

/// Starts browser instances on demand.
#[async_trait]
pub(crate) trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Engine>, ScrapeError>;
}

#[derive(Default)]
struct LeaseCounter {
    active: AtomicUsize,
    idle: Notify,
}

/// Keeps the engine alive while held.
pub(crate) struct RenderLease {
    engine: Arc<dyn Engine>,
    counter: Arc<LeaseCounter>,
}

impl RenderLease {
    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}

impl Drop for RenderLease {
    fn drop(&mut self) {
        if self.counter.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counter.idle.notify_waiters();
        }
    }
}

struct EngineSlot {
    engine: Option<Arc<dyn Engine>>,
    generation: u64,
}

/// Owner of the process-wide render engine.
pub(crate) struct RenderEngine {
    launcher: Arc<dyn EngineLauncher>,
    slot: Mutex<EngineSlot>,
    leases: Arc<LeaseCounter>,
}

impl RenderEngine {
    pub(crate) fn new(launcher: Arc<dyn EngineLauncher>) -> Self {
        Self {
            launcher,
            slot: Mutex::new(EngineSlot {
                engine: None,
                generation: 0,
            }),
            leases: Arc::new(LeaseCounter::default()),
        }
    }

    /// Returns a lease on the engine, launching it if none is running.
    pub(crate) async fn acquire(&self) -> Result<RenderLease, ScrapeError> {
        let mut slot = self.slot.lock().await;
        if let Some(stale) = slot.engine.take_if(|engine| !engine.is_connected()) {
            tracing::warn!(
                target: "render_task",
                "Render engine (generation {}) lost its browser connection; relaunching",
                slot.generation
            );
            stale.shutdown().await;
        }
        let engine = match &slot.engine {
            Some(engine) => engine.clone(),
            None => {
                let engine = self.launcher.launch().await?;
                slot.generation += 1;
                tracing::info!(target: "render_task", "Launched render engine (generation {})", slot.generation);
                slot.engine = Some(engine.clone());
                engine
            }
        };
        // Incremented under the slot lock so `shutdown` never sees a stale zero.
        self.leases.active.fetch_add(1, Ordering::SeqCst);
        Ok(RenderLease {
            engine,
            counter: self.leases.clone(),
        })
    }

    /// Number of renders currently holding the engine.
    pub(crate) fn active_sessions(&self) -> usize {
        self.leases.active.load(Ordering::SeqCst)
    }

    /// Closes the engine once no lease is outstanding. No-op when nothing runs.
    pub(crate) async fn shutdown(&self) {
        loop {
            let idle = self.leases.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.leases.active.load(Ordering::SeqCst) == 0 {
                let mut slot = self.slot.lock().await;
                if self.leases.active.load(Ordering::SeqCst) == 0 {
                    if let Some(engine) = slot.engine.take() {
                        engine.shutdown().await;
                        tracing::info!(target: "render_task", "Render engine (generation {}) shut down", slot.generation);
                    }
                    return;
                }
                continue;
            }

            tracing::debug!(
                target: "render_task",
                "Waiting for {} render session(s) before shutdown",
                self.active_sessions()
            );
            idle.await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn generation(&self) -> u64 {
        self.slot.lock().await.generation
    }
}
