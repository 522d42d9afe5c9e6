//! Headless browser lifecycle and the per-task browsing contexts.
mod chromium;
mod config;
mod driver;
mod fingerprint;
mod session;

use std::time::Duration;
use thiserror::Error;

pub(crate) use chromium::ChromiumLauncher;
pub(crate) use config::BrowserConfig;
pub(crate) use driver::*;
pub(crate) use fingerprint::Fingerprint;
pub(crate) use session::*;

#[derive(Debug, Error)]
pub(crate) enum BrowserError {
    #[error("Failed to launch the browser: {message}")]
    Launch { message: String },

    #[error("Browser command failed: {message}")]
    Cdp { message: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Navigation to {url} didn't finish within {timeout:.2?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Element `{selector}` was not found on the page")]
    ElementNotFound { selector: String },
}
