//! Screenshot gateway: renders HTML documents to PNG/JPEG images with a
//! headless browser, served over JSON-RPC 2.0.

pub mod browser;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod rpc;
pub mod server;
pub mod service;
pub mod session;
pub mod validate;

use std::sync::Arc;

use crate::config::RequestDefaults;
use crate::engine::{EngineHandle, Launcher};
use crate::rpc::Dispatcher;
use crate::service::ScreenshotService;

/// Wire a dispatcher around a fresh engine handle for `launcher`.
pub fn dispatcher(
    launcher: Arc<dyn Launcher>,
    max_concurrent: usize,
    defaults: RequestDefaults,
) -> Arc<Dispatcher> {
    let handle = Arc::new(EngineHandle::new(launcher));
    let service = ScreenshotService::new(handle, max_concurrent, defaults);
    Arc::new(Dispatcher::new(Arc::new(service)))
}
