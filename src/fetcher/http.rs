//! reqwest-backed index source

use super::errors::FetchError;
use super::identity::IdentitySelector;
use super::IndexSource;
use crate::extractor::{self, ExtractError, RawContent};
use crate::metrics::metrics;
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Timing knobs for [`HttpFetcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherSettings {
    pub request_timeout: Duration,
    /// Lower bound of the randomised pre-request pause
    pub min_delay: Duration,
    /// Upper bound of the randomised pre-request pause
    pub max_delay: Duration,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Fetches the index page with a freshly chosen identity on every call
pub struct HttpFetcher {
    client: reqwest::Client,
    identities: Arc<dyn IdentitySelector>,
    settings: FetcherSettings,
    rng: Mutex<fastrand::Rng>,
}

impl HttpFetcher {
    pub fn new(settings: FetcherSettings, identities: Arc<dyn IdentitySelector>) -> anyhow::Result<Self> {
        if settings.min_delay > settings.max_delay {
            anyhow::bail!(
                "pacing min delay ({:?}) exceeds max delay ({:?})",
                settings.min_delay,
                settings.max_delay
            );
        }

        // No default headers: every request carries its own identity
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            identities,
            settings,
            rng: Mutex::new(fastrand::Rng::new()),
        })
    }

    pub fn settings(&self) -> &FetcherSettings {
        &self.settings
    }

    /// Uniform pause in `[min_delay, max_delay]`
    fn pacing_delay(&self) -> Duration {
        let min = self.settings.min_delay.as_millis() as u64;
        let max = self.settings.max_delay.as_millis() as u64;
        Duration::from_millis(self.rng.lock().u64(min..=max))
    }

    fn build_headers(&self, profile_headers: &[(String, String)], user_agent: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in profile_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping malformed profile header"),
            }
        }
        if let Some(agent) = user_agent.and_then(|ua| HeaderValue::from_str(ua).ok()) {
            headers.insert(USER_AGENT, agent);
        }
        headers
    }
}

#[async_trait]
impl IndexSource for HttpFetcher {
    async fn fetch(&self, endpoint: &str, selector: &str) -> Result<RawContent, FetchError> {
        let identity = self.identities.select();
        let user_agent = {
            let mut rng = self.rng.lock();
            identity.pick_user_agent(&mut rng).map(str::to_string)
        };
        let headers = self.build_headers(&identity.profile.headers, user_agent.as_deref());
        let delay = self.pacing_delay();

        debug!(
            identity = identity.name(),
            delay_ms = delay.as_millis() as u64,
            url = endpoint,
            "Pacing before index request"
        );
        tokio::time::sleep(delay).await;

        metrics().fetch_attempts.inc();
        let timeout_ms = self.settings.request_timeout.as_millis() as u64;

        let result = async {
            let response = self
                .client
                .get(endpoint)
                .headers(headers)
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(endpoint, timeout_ms, &e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    url: endpoint.to_string(),
                    status: status.as_u16(),
                });
            }

            response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(endpoint, timeout_ms, &e))
        }
        .await;

        let body = match result {
            Ok(body) => body,
            Err(e) => {
                metrics().fetch_failures.inc();
                return Err(e);
            }
        };

        // The parsed document is dropped before this function returns
        if let Err(e) = extractor::locate(&body, selector) {
            metrics().fetch_failures.inc();
            return Err(match e {
                ExtractError::InvalidSelector { selector, reason } => {
                    FetchError::InvalidSelector { selector, reason }
                }
                _ => FetchError::SelectorNotFound {
                    url: endpoint.to_string(),
                    selector: selector.to_string(),
                },
            });
        }

        debug!(
            identity = identity.name(),
            bytes = body.len(),
            "Index page retrieved"
        );
        Ok(RawContent::new(endpoint, body, identity.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::identity::{default_identities, WeightedIdentitySelector};

    fn fetcher(min_ms: u64, max_ms: u64) -> anyhow::Result<HttpFetcher> {
        let selector = Arc::new(WeightedIdentitySelector::with_seed(default_identities(), 1)?);
        HttpFetcher::new(
            FetcherSettings {
                request_timeout: Duration::from_secs(5),
                min_delay: Duration::from_millis(min_ms),
                max_delay: Duration::from_millis(max_ms),
            },
            selector,
        )
    }

    #[test]
    fn test_pacing_stays_in_range() {
        let f = fetcher(3_000, 8_000).unwrap();
        for _ in 0..500 {
            let d = f.pacing_delay();
            assert!(d >= Duration::from_millis(3_000) && d <= Duration::from_millis(8_000));
        }
    }

    #[test]
    fn test_inverted_pacing_rejected() {
        assert!(fetcher(9_000, 1_000).is_err());
    }

    #[test]
    fn test_headers_include_identity_and_agent() {
        let f = fetcher(0, 0).unwrap();
        let headers = f.build_headers(
            &[
                ("Accept-Language".to_string(), "en-GB".to_string()),
                ("Bad Header".to_string(), "x".to_string()),
            ],
            Some("agent/1.0"),
        );
        assert_eq!(headers.get("accept-language").unwrap(), "en-GB");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "agent/1.0");
        assert_eq!(headers.len(), 2);
    }
}
