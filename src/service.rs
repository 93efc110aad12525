//! ScreenshotService: admission control and restart policy around sessions.
//!
//! Sessions run in their own task so page teardown always completes, even
//! when the caller that submitted the request goes away.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::RequestDefaults;
use crate::engine::{EngineHandle, EngineState, Lease};
use crate::error::{RenderError, ServiceError};
use crate::models::{ScreenshotRequest, ScreenshotResult};
use crate::session::{self, Budget};

/// Screenshot rendering service.
pub struct ScreenshotService {
    handle: Arc<EngineHandle>,
    permits: Arc<Semaphore>,
    defaults: RequestDefaults,
}

impl ScreenshotService {
    pub fn new(handle: Arc<EngineHandle>, max_concurrent: usize, defaults: RequestDefaults) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            defaults,
        }
    }

    pub fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.handle
    }

    /// Engine state and, when ready, its version string.
    pub async fn health(&self) -> (EngineState, Option<String>) {
        self.handle.health().await
    }

    /// Render one validated request.
    ///
    /// The timeout budget starts now, so time spent waiting for a free
    /// slot counts against it.
    pub async fn screenshot(&self, req: ScreenshotRequest) -> Result<ScreenshotResult, ServiceError> {
        let budget = Budget::start(req.timeout_ms);

        let permit = tokio::time::timeout_at(budget.deadline(), self.permits.clone().acquire_owned())
            .await
            .map_err(|_| budget.expired("queue"))?
            .map_err(|_| RenderError::Browser("service is shutting down".into()))?;

        let handle = self.handle.clone();
        let selector_timeout = Duration::from_millis(self.defaults.selector_timeout_ms);
        let task = tokio::spawn(async move {
            let _permit = permit;
            render_with_restart(&handle, &req, budget, selector_timeout).await
        });

        match task.await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(e) if e.is_panic() => {
                tracing::error!("Render task panicked: {:?}", e);
                Err(ServiceError::Internal("render task panicked".into()))
            }
            Err(e) => Err(ServiceError::Internal(format!("render task failed: {}", e))),
        }
    }

    /// Stop admitting requests and shut the engine down.
    pub async fn shutdown(&self) {
        self.permits.close();
        self.handle.shutdown().await;
    }
}

/// Run a session; if the engine dies under it, restart once and retry.
async fn render_with_restart(
    handle: &EngineHandle,
    req: &ScreenshotRequest,
    budget: Budget,
    selector_timeout: Duration,
) -> Result<ScreenshotResult, RenderError> {
    let lease = handle.acquire().await?;
    let restarted = lease.restarted;

    let err = match attempt(handle, &lease, req, budget, selector_timeout).await {
        Err(err) if err.is_engine_lost() && !restarted => err,
        other => return other,
    };

    tracing::warn!("{}; restarting engine and retrying once", err);
    let retry = handle.acquire().await?;
    attempt(handle, &retry, req, budget, selector_timeout).await
}

async fn attempt(
    handle: &EngineHandle,
    lease: &Lease,
    req: &ScreenshotRequest,
    budget: Budget,
    selector_timeout: Duration,
) -> Result<ScreenshotResult, RenderError> {
    let result = session::render(lease.engine.as_ref(), req, budget, selector_timeout).await;
    if let Err(err) = &result {
        if err.is_engine_lost() {
            handle.mark_unhealthy(&lease.engine).await;
        }
    }
    result
}
