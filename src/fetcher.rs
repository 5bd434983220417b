//! Paginated extraction from NewsAPI's `/v2/everything` endpoint.
//!
//! # Architecture
//!
//! - [`NewsTransport`]: one page request, one response. Implemented over HTTP by
//!   [`HttpNewsTransport`] and by in-memory fakes in tests.
//! - [`RetryTransport`]: decorator adding bounded backoff to any transport.
//! - [`Fetcher`]: the pagination loop. Pages are requested strictly in order;
//!   page N+1 is only requested once page N has been consumed.
//!
//! A fetch either returns every page or fails. Partial result sets never leave
//! this module.

use crate::config::FetchConfig;
use crate::error::{PipelineError, Result};
use crate::models::{NewsApiResponse, PageRequest, RawArticle, RunContext};
use crate::retry::{RetryPolicy, with_backoff};
use crate::utils::truncate_for_log;
use chrono::Duration;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Provider error codes that mean the key itself is the problem.
const AUTH_CODES: &[&str] = &[
    "apiKeyDisabled",
    "apiKeyExhausted",
    "apiKeyInvalid",
    "apiKeyMissing",
];

/// Provider error codes worth another attempt.
const TRANSIENT_CODES: &[&str] = &["rateLimited", "unexpectedError"];

pub trait NewsTransport {
    async fn fetch_page(&self, request: &PageRequest) -> Result<NewsApiResponse>;
}

/// Turn a decoded response into an error if the provider reported one.
pub fn check_envelope(response: NewsApiResponse) -> Result<NewsApiResponse> {
    if response.status == "ok" {
        return Ok(response);
    }
    let code = response.code.unwrap_or_else(|| "unknown".to_string());
    let message = response
        .message
        .unwrap_or_else(|| "provider returned an error without a message".to_string());

    if AUTH_CODES.contains(&code.as_str()) {
        Err(PipelineError::Auth(format!("{code}: {message}")))
    } else if TRANSIENT_CODES.contains(&code.as_str()) {
        Err(PipelineError::TransientNetwork(format!("{code}: {message}")))
    } else {
        Err(PipelineError::Provider { code, message })
    }
}

/// `reqwest`-backed transport. The API key travels in the `X-Api-Key` header
/// so it never shows up in logged URLs.
pub struct HttpNewsTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for HttpNewsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpNewsTransport")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

/// `{base}/v2/everything`, keeping any path prefix on the base.
fn everything_endpoint(api_base_url: &str) -> Result<Url> {
    let mut base = api_base_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|base| base.join("v2/everything"))
        .map_err(|e| PipelineError::Config(format!("api_base_url: {e}")))
}

impl HttpNewsTransport {
    pub fn new(config: &FetchConfig, api_key: String) -> Result<Self> {
        let endpoint = everything_endpoint(&config.api_base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

impl NewsTransport for HttpNewsTransport {
    #[instrument(level = "debug", skip_all, fields(page = request.page))]
    async fn fetch_page(&self, request: &PageRequest) -> Result<NewsApiResponse> {
        let t0 = Instant::now();
        let resp = self
            .client
            .get(self.endpoint.clone())
            .header("X-Api-Key", &self.api_key)
            .query(&[
                ("q", request.query.clone()),
                ("from", request.from.to_string()),
                ("to", request.to.to_string()),
                ("pageSize", request.page_size.to_string()),
                ("page", request.page.to_string()),
                ("language", request.language.clone()),
                ("sortBy", request.sort_by.clone()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        debug!(%status, bytes = body.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "Page response");

        let parsed = serde_json::from_str::<NewsApiResponse>(&body);
        if status.is_success() {
            return check_envelope(parsed?);
        }
        // NewsAPI sends its JSON envelope on error statuses too; prefer its code.
        match parsed {
            Ok(envelope) if envelope.code.is_some() => check_envelope(envelope),
            _ => Err(PipelineError::from_status(status, &truncate_for_log(&body, 300))),
        }
    }
}

/// Adds bounded retries with backoff to any [`NewsTransport`].
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTransport")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T: NewsTransport> NewsTransport for RetryTransport<T> {
    async fn fetch_page(&self, request: &PageRequest) -> Result<NewsApiResponse> {
        with_backoff(&self.policy, "fetch_page", |_| self.inner.fetch_page(request)).await
    }
}

/// Drives the pagination loop for one run.
pub struct Fetcher<T> {
    transport: RetryTransport<T>,
    config: FetchConfig,
}

impl<T: NewsTransport> Fetcher<T> {
    pub fn new(transport: T, config: FetchConfig) -> Self {
        let policy = config.retry.clone();
        Self {
            transport: RetryTransport::new(transport, policy),
            config,
        }
    }

    fn page_request(&self, run: &RunContext, page: u32) -> PageRequest {
        PageRequest {
            query: self.config.query.clone(),
            from: run.run_date - Duration::days(i64::from(self.config.days_back)),
            to: run.run_date,
            page_size: self.config.page_size,
            page,
            language: self.config.language.clone(),
            sort_by: self.config.sort_by.clone(),
        }
    }

    /// Fetch every page for `run`, in provider order.
    ///
    /// Stops on the first of: an empty page, `page * page_size >= total_results`,
    /// a short page, or `max_pages`. The result never holds more than the
    /// provider-reported total.
    ///
    /// # Arguments
    ///
    /// * `run` - The run whose date bounds the `from`/`to` window
    ///
    /// # Returns
    ///
    /// All articles of the window, in the order the provider served them.
    ///
    /// # Errors
    ///
    /// The first page error that survives the transport's retries. Articles
    /// from earlier pages are discarded.
    #[instrument(level = "info", skip_all, fields(query = %self.config.query, run_date = %run.run_date))]
    pub async fn fetch_all(&self, run: &RunContext) -> Result<Vec<RawArticle>> {
        let t0 = Instant::now();
        let page_size = self.config.page_size;
        let mut articles: Vec<RawArticle> = Vec::new();
        let mut total_results = 0u64;
        let mut page = 1u32;

        loop {
            let request = self.page_request(run, page);
            if page == 1 {
                info!(from = %request.from, to = %request.to, page_size, "Fetching news");
            }
            debug!(page, "Fetching page");

            let response = self.transport.fetch_page(&request).await?;
            if page == 1 {
                total_results = response.total_results;
                info!(total_results, "Total articles available");
            }

            let received = response.articles.len();
            if received == 0 {
                info!(page, "No more articles");
                break;
            }
            articles.extend(response.articles);

            if u64::from(page) * u64::from(page_size) >= total_results {
                debug!(page, "Reached provider-reported total");
                break;
            }
            if received < page_size as usize {
                info!(page, received, "Last page reached");
                break;
            }
            if page >= self.config.max_pages {
                warn!(
                    max_pages = self.config.max_pages,
                    fetched = articles.len(),
                    total_results,
                    "Reached maximum page limit; stopping pagination"
                );
                break;
            }
            page += 1;
        }

        if articles.len() as u64 > total_results {
            warn!(
                fetched = articles.len(),
                total_results,
                "Provider returned more articles than it reported; truncating"
            );
            articles.truncate(total_results as usize);
        }

        info!(
            count = articles.len(),
            pages = page,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched articles"
        );
        Ok(articles)
    }
}
