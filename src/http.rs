use crate::config::HttpConfig;
use crate::{Result, ScoutError};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// The `HttpClient` wraps `reqwest` with browser-like headers, a request gate and retries.
///
/// Every request first acquires a permit from the rate limiter and then waits the pacing
/// delay, so the total request rate stays near `rate_limit.requests_per_second` no matter how
/// many batches are in flight.
pub struct HttpClient {
    /// The HTTP client used for making requests.
    client: Client,
    /// The configuration settings for requests.
    config: HttpConfig,
    /// The rate limiter used to control the rate of requests.
    rate_limiter: Arc<Semaphore>,
}

impl HttpClient {
    /// Creates a new `HttpClient` with the given configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `HttpClient`, or an error if the client could not be created.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(ScoutError::RequestError)?;

        let rate_limiter = Arc::new(Semaphore::new(config.rate_limit.burst_size.max(1)));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    /// The underlying client, for requests that need a body (LLM, mail).
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Fetches a page as text.
    #[instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send_with_retries(url, || self.browser_get(url)).await?;
        Ok(response.text().await?)
    }

    /// Fetches raw bytes (listing images).
    #[instrument(skip(self))]
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send_with_retries(url, || self.browser_get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetches and deserializes a JSON document.
    #[instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .send_with_retries(url, || self.client.get(url).header("Accept", "application/json"))
            .await?;
        Ok(response.json().await?)
    }

    /// Sends a request built by `build`, retrying transient failures with exponential backoff.
    ///
    /// `build` is called once per attempt since a `RequestBuilder` is consumed on send.
    pub async fn send_with_retries<F>(&self, url: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut last_error = None;

        while retries < self.config.max_retries.max(1) {
            match self.try_send(url, build()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    retries += 1;
                    if !is_transient(&e) {
                        return Err(e);
                    }
                    warn!(url = %url, attempt = retries, error = %e, "Request failed");
                    last_error = Some(e);
                    if retries < self.config.max_retries {
                        let delay = Duration::from_secs(2u64.pow(retries));
                        sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ScoutError::ScrapeError(format!("Max retries exceeded for {}", url))
        }))
    }

    async fn try_send(&self, url: &str, request: RequestBuilder) -> Result<Response> {
        // Acquire rate limit permit
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| ScoutError::ScrapeError("Rate limiter closed".to_string()))?;
        if self.config.rate_limit.requests_per_second > 0.0 {
            let delay = Duration::from_secs_f32(1.0 / self.config.rate_limit.requests_per_second);
            sleep(delay).await;
        }

        debug!("Requesting {}", url);
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    fn browser_get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8")
            .header("Accept-Language", "de-DE,de;q=0.9,en-US;q=0.5")
            .header("Connection", "keep-alive")
            .header("Upgrade-Insecure-Requests", "1")
    }
}

/// Client errors other than rate limiting will not get better by retrying.
fn is_transient(error: &ScoutError) -> bool {
    match error {
        ScoutError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        ScoutError::RequestError(_) => true,
        _ => false,
    }
}
