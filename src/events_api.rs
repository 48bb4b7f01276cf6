//! Events API client
//!
//! Blocking HTTP client for the analytics events store: one endpoint to
//! run queries over already published events and one schema-scoped
//! endpoint to publish new ones.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::EventsApiConfig;
use crate::error::{Result, SyncError};
use crate::source::PublishRecord;

/// Content type both events endpoints expect
pub const EVENTS_CONTENT_TYPE: &str = "application/vnd.appd.events+json;v=2";

const ACCOUNT_NAME_HEADER: &str = "x-events-api-accountname";
const API_KEY_HEADER: &str = "x-events-api-key";

/// One result set of an events query
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryResultSet {
    /// Rows as flat lists, in the order of the selected columns
    #[serde(default)]
    pub results: Vec<Vec<Value>>,
}

/// Remote store seen by the sync cycle
pub trait EventStore {
    /// Run a query and return its result sets
    fn query(&self, query: &str) -> Result<Vec<QueryResultSet>>;

    /// Publish one batch; returns the response status code on success
    fn publish(&self, records: &[PublishRecord]) -> Result<u16>;
}

/// HTTP client for the events API
pub struct EventsApiClient {
    client: Client,
    base_url: String,
    schema: String,
    headers: HeaderMap,
}

impl EventsApiClient {
    /// Create a new client; `timeout_secs = None` waits indefinitely
    pub fn new(config: &EventsApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("db-custom-metrics/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout_secs.map(Duration::from_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            schema: config.schema.clone(),
            headers: Self::events_headers(&config.account_name, &config.key)?,
        })
    }

    fn events_headers(account_name: &str, key: &str) -> Result<HeaderMap> {
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| SyncError::Config(format!("invalid events API header value: {}", e)))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENTS_CONTENT_TYPE));
        headers.insert(ACCOUNT_NAME_HEADER, header(account_name)?);
        headers.insert(API_KEY_HEADER, header(key)?);
        Ok(headers)
    }

    fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SyncError::ApiRequest {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            })
        }
    }
}

impl EventStore for EventsApiClient {
    fn query(&self, query: &str) -> Result<Vec<QueryResultSet>> {
        let url = format!("{}/events/query", self.base_url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .body(query.to_string())
            .send()?;

        let body = Self::check_status(response)?.text()?;
        debug!("API Response: {}", body);
        Ok(serde_json::from_str(&body)?)
    }

    fn publish(&self, records: &[PublishRecord]) -> Result<u16> {
        let url = format!("{}/events/publish/{}", self.base_url, self.schema);

        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .body(serde_json::to_vec(records)?)
            .send()?;

        Ok(Self::check_status(response)?.status().as_u16())
    }
}
