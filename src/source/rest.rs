//! HTTP adapter for a PostgREST-style metric store.
//!
//! The store exposes the metric table under `/rest/v1/{table}` and
//! authenticates with an API key sent both as `apikey` and as a bearer
//! token. It has no push channel over plain HTTP, so [`RestSource`]
//! polls the newest page and turns the difference into change events.

use crate::config::Config;
use crate::core::diff_pages;
use crate::source::types::{MetricRecord, NewRecord, RawChangeEvent, RawRecord, UserId};
use crate::source::{EventSink, FetchError, RemoteSource, SubscriptionHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Default time between polls of a subscription.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Remote store configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL, e.g. `https://project.example.co`
    pub base_url: String,
    /// API key
    pub api_key: String,
    /// Table holding the metric rows
    pub table: String,
}

impl RestConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: table.into(),
        }
    }

    /// Build from the persisted configuration.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let base_url = config
            .store_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| FetchError::Config("store_url is not set".to_string()))?;
        let api_key = config
            .store_key
            .as_deref()
            .ok_or_else(|| FetchError::Config("store_key is not set".to_string()))?;

        Ok(Self::new(base_url, api_key, config.table.as_str()))
    }

    /// Get the REST root URL.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1/", self.base_url)
    }

    /// Get the table endpoint URL.
    pub fn records_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// Query selecting a user's newest `limit` rows.
    pub fn recent_query(&self, user_id: &UserId, limit: usize) -> Vec<(&'static str, String)> {
        vec![
            ("select", "*".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("order", "timestamp.desc".to_string()),
            ("limit", limit.to_string()),
        ]
    }
}

/// Async client for the metric table.
#[derive(Clone)]
pub struct RestClient {
    config: RestConfig,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(config: RestConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
    }

    /// Test connection to the store.
    pub async fn test_connection(&self) -> Result<bool, FetchError> {
        let response = self
            .request(reqwest::Method::GET, self.config.rest_url())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Fetch up to `limit` of the user's records, newest first.
    ///
    /// Rows that fail validation are skipped with a warning.
    pub async fn fetch_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, FetchError> {
        let response = self
            .request(reqwest::Method::GET, self.config.records_url())
            .query(&self.config.recent_query(user_id, limit))
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let rows: Vec<RawRecord> = read_json(response).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_record() {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping row from {}: {}", self.config.table, e),
            }
        }
        Ok(records)
    }

    /// Store a new reading and return it with its assigned id.
    pub async fn insert(&self, record: &NewRecord) -> Result<MetricRecord, FetchError> {
        let response = self
            .request(reqwest::Method::POST, self.config.records_url())
            .header("Prefer", "return=representation")
            .json(record)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let rows: Vec<RawRecord> = read_json(response).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Decode("store returned no row".to_string()))?;
        row.into_record().map_err(|e| FetchError::Decode(e.to_string()))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(FetchError::Server {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| FetchError::Decode(e.to_string()))
}

/// Blocking adapter implementing [`RemoteSource`] over [`RestClient`].
pub struct RestSource {
    client: RestClient,
    runtime: tokio::runtime::Runtime,
    poll_interval: Duration,
    poll_limit: usize,
    next_subscription: AtomicU64,
}

impl RestSource {
    pub fn new(config: RestConfig) -> Result<Self, FetchError> {
        let runtime = build_runtime()?;

        Ok(Self {
            client: RestClient::new(config)?,
            runtime,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_limit: crate::core::DEFAULT_CAPACITY,
            next_subscription: AtomicU64::new(0),
        })
    }

    /// Build from the persisted configuration.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Ok(Self::new(RestConfig::from_config(config)?)?
            .with_poll_interval(config.poll_interval)
            .with_poll_limit(config.fetch_limit))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// Page size compared between polls.
    pub fn with_poll_limit(mut self, limit: usize) -> Self {
        self.poll_limit = limit.max(1);
        self
    }

    pub fn client(&self) -> &RestClient {
        &self.client
    }

    /// Test connection to the store.
    pub fn test_connection(&self) -> Result<bool, FetchError> {
        self.runtime.block_on(self.client.test_connection())
    }

    /// Store a new reading.
    pub fn insert(&self, record: &NewRecord) -> Result<MetricRecord, FetchError> {
        self.runtime.block_on(self.client.insert(record))
    }
}

impl RemoteSource for RestSource {
    fn fetch_recent(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, FetchError> {
        self.runtime.block_on(self.client.fetch_recent(user_id, limit))
    }

    fn subscribe(
        &self,
        user_id: &UserId,
        sink: EventSink,
    ) -> Result<SubscriptionHandle, FetchError> {
        let baseline = self.fetch_recent(user_id, self.poll_limit)?;

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = SubscriptionHandle::new(id);

        let poller = Poller {
            client: self.client.clone(),
            user_id: user_id.clone(),
            limit: self.poll_limit,
            interval: self.poll_interval,
            handle: handle.clone(),
            sink,
        };

        thread::Builder::new()
            .name(format!("vitals-poll-{id}"))
            .spawn(move || poller.run(baseline))
            .map_err(|e| FetchError::Unavailable(format!("Failed to spawn poller: {e}")))?;

        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if handle.release() {
            tracing::debug!("Stopping poller #{}", handle.id());
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime, FetchError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| FetchError::Config(format!("Failed to create runtime: {e}")))
}

/// Background loop behind one subscription.
struct Poller {
    client: RestClient,
    user_id: UserId,
    limit: usize,
    interval: Duration,
    handle: SubscriptionHandle,
    sink: EventSink,
}

impl Poller {
    fn run(self, mut previous: Vec<MetricRecord>) {
        let runtime = match build_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Poller #{} could not start: {}", self.handle.id(), e);
                return;
            }
        };

        while self.wait() {
            match runtime.block_on(self.client.fetch_recent(&self.user_id, self.limit)) {
                Ok(next) => {
                    for event in diff_pages(&previous, &next, self.limit) {
                        if !self.handle.is_active() {
                            return;
                        }
                        (self.sink)(RawChangeEvent::from(&event));
                    }
                    previous = next;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Poll for {} failed, will retry: {}", self.user_id, e);
                }
                Err(e) => {
                    tracing::error!("Poll for {} failed: {}", self.user_id, e);
                }
            }
        }
    }

    /// Sleep one interval. Returns `false` once the subscription is released.
    fn wait(&self) -> bool {
        let deadline = Instant::now() + self.interval;
        while Instant::now() < deadline {
            if !self.handle.is_active() {
                return false;
            }
            thread::sleep(Duration::from_millis(100));
        }
        self.handle.is_active()
    }
}
