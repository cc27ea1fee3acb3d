//! Sample sources
//!
//! A source returns the raw samples of one series for one window. The
//! controller only talks to the [`SampleSource`] trait; the production
//! implementation is the Acyclica travel-time datastream.

mod acyclica;

pub use acyclica::{parse_payload, AcyclicaConfig, AcyclicaSource};

use crate::series::Series;
use crate::sync::types::{RawSample, Window};
use async_trait::async_trait;

/// Common trait for everything that can serve raw samples
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Fetch every sample of `series` inside `window`
    ///
    /// An empty vector is a valid answer (the sensor was offline). Failures
    /// must identify the series and the window that failed.
    async fn fetch(&self, series: &Series, window: &Window) -> Result<Vec<RawSample>, FetchError>;
}

/// Errors that can occur while fetching a window
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Source returned {status} for series {series_id} window {window}")]
    Status {
        series_id: String,
        window: Window,
        status: u16,
    },

    #[error("Request for series {series_id} window {window} timed out")]
    Timeout { series_id: String, window: Window },

    #[error("Request for series {series_id} window {window} failed: {message}")]
    Request {
        series_id: String,
        window: Window,
        message: String,
    },

    #[error("Unparseable payload for series {series_id} window {window}: {message}")]
    Parse {
        series_id: String,
        window: Window,
        message: String,
    },
}

impl FetchError {
    /// The window whose fetch failed
    pub fn window(&self) -> &Window {
        match self {
            FetchError::Status { window, .. }
            | FetchError::Timeout { window, .. }
            | FetchError::Request { window, .. }
            | FetchError::Parse { window, .. } => window,
        }
    }

    pub fn series_id(&self) -> &str {
        match self {
            FetchError::Status { series_id, .. }
            | FetchError::Timeout { series_id, .. }
            | FetchError::Request { series_id, .. }
            | FetchError::Parse { series_id, .. } => series_id,
        }
    }
}
