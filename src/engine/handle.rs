//! Lifecycle of the shared engine process.
//!
//! State transitions (start, restart, shutdown) are serialized by a
//! transition lock; sessions only take a short read lock to clone the
//! current engine and never hold a lock across their page lifecycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::{Engine, Launcher};
use crate::error::RenderError;

const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Starting,
    Ready,
    Unhealthy,
    ShuttingDown,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Unhealthy => "unhealthy",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Slot {
    state: EngineState,
    engine: Option<Arc<dyn Engine>>,
}

/// An engine handed to one session.
pub struct Lease {
    pub engine: Arc<dyn Engine>,
    /// This acquisition relaunched an unhealthy engine
    pub restarted: bool,
}

/// Owner of the single engine process.
pub struct EngineHandle {
    launcher: Arc<dyn Launcher>,
    slot: RwLock<Slot>,
    transition: Mutex<()>,
}

impl EngineHandle {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            slot: RwLock::new(Slot {
                state: EngineState::Uninitialized,
                engine: None,
            }),
            transition: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> EngineState {
        self.slot.read().await.state
    }

    /// Launch eagerly so the first request doesn't pay startup cost.
    pub async fn prewarm(&self) -> Result<(), RenderError> {
        self.acquire().await.map(|_| ())
    }

    /// Get the ready engine, starting or restarting it on demand.
    pub async fn acquire(&self) -> Result<Lease, RenderError> {
        if let Some(engine) = self.current().await? {
            return Ok(Lease {
                engine,
                restarted: false,
            });
        }

        let _transition = self.transition.lock().await;

        // Someone else may have finished a transition while we waited
        if let Some(engine) = self.current().await? {
            return Ok(Lease {
                engine,
                restarted: false,
            });
        }

        let restarted = self.state().await == EngineState::Unhealthy;
        let engine = self.start_locked().await?;
        Ok(Lease { engine, restarted })
    }

    /// Record that a session saw the connection to `engine` drop.
    pub async fn mark_unhealthy(&self, engine: &Arc<dyn Engine>) {
        let mut slot = self.slot.write().await;
        let is_current = slot
            .engine
            .as_ref()
            .is_some_and(|current| same_engine(current, engine));
        if slot.state == EngineState::Ready && is_current {
            tracing::warn!("Rendering engine connection lost, marking unhealthy");
            slot.state = EngineState::Unhealthy;
        }
    }

    /// Stop the engine. Later acquisitions fail until [`reinitialize`](Self::reinitialize).
    pub async fn shutdown(&self) {
        let _transition = self.transition.lock().await;

        let engine = {
            let mut slot = self.slot.write().await;
            if slot.state == EngineState::Stopped {
                return;
            }
            slot.state = EngineState::ShuttingDown;
            slot.engine.take()
        };

        if let Some(engine) = engine {
            tracing::info!("Shutting down rendering engine");
            if let Err(e) = engine.shutdown().await {
                tracing::warn!("Engine shutdown failed: {}", e);
            }
        }

        self.slot.write().await.state = EngineState::Stopped;
        tracing::info!("Rendering engine stopped");
    }

    /// Allow a stopped handle to launch again.
    pub async fn reinitialize(&self) {
        let _transition = self.transition.lock().await;
        let mut slot = self.slot.write().await;
        if slot.state == EngineState::Stopped {
            slot.state = EngineState::Uninitialized;
        }
    }

    /// Current state plus, when ready, the engine's version string.
    pub async fn health(&self) -> (EngineState, Option<String>) {
        let (state, engine) = {
            let slot = self.slot.read().await;
            (slot.state, slot.engine.clone())
        };
        let version = match engine {
            Some(engine) if state == EngineState::Ready => {
                match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, engine.version()).await {
                    Ok(Ok(version)) => Some(version),
                    Ok(Err(e)) => {
                        tracing::debug!("Health probe failed: {}", e);
                        None
                    }
                    Err(_) => None,
                }
            }
            _ => None,
        };
        (state, version)
    }

    /// Ready and alive engine, `None` when a transition is needed.
    async fn current(&self) -> Result<Option<Arc<dyn Engine>>, RenderError> {
        {
            let slot = self.slot.read().await;
            match slot.state {
                EngineState::ShuttingDown | EngineState::Stopped => {
                    return Err(RenderError::Browser("rendering engine is shut down".into()));
                }
                EngineState::Ready => {
                    if let Some(engine) = slot.engine.as_ref().filter(|e| is_alive(e)) {
                        return Ok(Some(Arc::clone(engine)));
                    }
                }
                _ => return Ok(None),
            }
        }

        // Ready on paper, but the process is gone
        let mut slot = self.slot.write().await;
        if slot.state == EngineState::Ready && !slot.engine.as_ref().is_some_and(is_alive) {
            tracing::warn!("Rendering engine process is gone, marking unhealthy");
            slot.state = EngineState::Unhealthy;
        }
        Ok(None)
    }

    /// Tear down any stale engine and launch a new one. Caller holds `transition`.
    async fn start_locked(&self) -> Result<Arc<dyn Engine>, RenderError> {
        let stale = {
            let mut slot = self.slot.write().await;
            slot.state = EngineState::Starting;
            slot.engine.take()
        };

        if let Some(stale) = stale {
            tracing::info!("Tearing down unhealthy rendering engine");
            if let Err(e) = stale.shutdown().await {
                tracing::debug!("Stale engine shutdown failed: {}", e);
            }
        }

        tracing::info!("Launching rendering engine...");
        match self.launcher.launch().await {
            Ok(engine) => {
                let mut slot = self.slot.write().await;
                slot.state = EngineState::Ready;
                slot.engine = Some(Arc::clone(&engine));
                tracing::info!("Rendering engine ready");
                Ok(engine)
            }
            Err(e) => {
                self.slot.write().await.state = EngineState::Unhealthy;
                tracing::error!("Rendering engine launch failed: {}", e);
                Err(RenderError::Browser(e.to_string()))
            }
        }
    }
}

fn is_alive(engine: &Arc<dyn Engine>) -> bool {
    let liveness = engine.liveness();
    let alive = *liveness.borrow();
    alive
}

fn same_engine(a: &Arc<dyn Engine>, b: &Arc<dyn Engine>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
