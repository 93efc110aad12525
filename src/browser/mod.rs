//! Chrome DevTools Protocol backend built on chromiumoxide.

mod client;
mod page;

pub use client::{chrome_available, ChromiumLauncher};
