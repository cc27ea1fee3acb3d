//! Acyclica datastream source
//!
//! Fetches route travel times as CSV:
//!
//! ```text
//! GET {base_url}/{api_key}/{route_id}/{start_epoch}/{end_epoch}/
//!
//! Timestamp,Strengths,Firsts,Lasts,Minimums,Maximums
//! 1543622418970,41000,38000,45000,30000,52000
//! ```

use super::{FetchError, SampleSource};
use crate::series::Series;
use crate::sync::types::{RawSample, Window};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::time::Duration;

/// Configuration for the Acyclica client
#[derive(Clone)]
pub struct AcyclicaConfig {
    /// Datastream base, e.g. `https://cr.acyclica.com/datastream/route/csv/time`
    pub base_url: String,
    pub api_key: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl fmt::Debug for AcyclicaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcyclicaConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// HTTP client for the Acyclica route datastream
pub struct AcyclicaSource {
    client: Client,
    config: AcyclicaConfig,
}

impl AcyclicaSource {
    pub fn new(config: AcyclicaConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("travelsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Request URL for one series window
    pub fn url(&self, series: &Series, window: &Window) -> String {
        format!(
            "{}/{}/{}/{}/{}/",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_key,
            series.id(),
            window.start_epoch(),
            window.end_epoch()
        )
    }
}

/// Parse a datastream CSV body into samples
pub fn parse_payload(body: &str) -> Result<Vec<RawSample>, csv::Error> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    reader.deserialize().collect()
}

#[async_trait]
impl SampleSource for AcyclicaSource {
    fn name(&self) -> &str {
        "acyclica"
    }

    async fn fetch(&self, series: &Series, window: &Window) -> Result<Vec<RawSample>, FetchError> {
        let response = self
            .client
            .get(self.url(series, window))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        series_id: series.id().to_string(),
                        window: *window,
                    }
                } else {
                    FetchError::Request {
                        series_id: series.id().to_string(),
                        window: *window,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                series_id: series.id().to_string(),
                window: *window,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Request {
            series_id: series.id().to_string(),
            window: *window,
            message: e.to_string(),
        })?;

        let samples = parse_payload(&body).map_err(|e| FetchError::Parse {
            series_id: series.id().to_string(),
            window: *window,
            message: e.to_string(),
        })?;

        tracing::debug!(
            series = series.id(),
            window_start = window.start_epoch(),
            samples = samples.len(),
            "Fetched window"
        );
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn config() -> AcyclicaConfig {
        AcyclicaConfig {
            base_url: "https://cr.acyclica.com/datastream/route/csv/time/".into(),
            api_key: "secret-key".into(),
            request_timeout_secs: 30,
        }
    }

    #[test]
    fn test_url_layout() {
        let source = AcyclicaSource::new(config()).unwrap();
        let series = Series::new("1234", "Main St NB").unwrap();
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let window = Window::try_new(start, start + chrono::Duration::days(1)).unwrap();

        assert_eq!(
            source.url(&series, &window),
            "https://cr.acyclica.com/datastream/route/csv/time/secret-key/1234/1672531200/1672617600/"
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_parse_payload() {
        let body = "Timestamp,Strengths,Firsts,Lasts,Minimums,Maximums
1543622418970,41000,38000,45000,30000,52000
1543622518970,0,0,0,0,0
";
        let samples = parse_payload(body).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp_ms, 1_543_622_418_970);
        assert_eq!(samples[0].maximums, 52_000.0);
        assert_eq!(samples[1].strengths, 0.0);
    }

    #[test]
    fn test_parse_empty_payload() {
        assert!(parse_payload("").unwrap().is_empty());
        assert!(parse_payload("Timestamp,Strengths,Firsts,Lasts,Minimums,Maximums\n")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_payload("Timestamp,Strengths\nnot-a-number,1\n").is_err());
    }
}
