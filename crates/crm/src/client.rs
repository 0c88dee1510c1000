//! Blocking HTTP client for the CRM reporting endpoint.
//!
//! One call = one `POST {base_url}?token=…&table=…` with a JSON body. No
//! retries here: the reconciler owns dialect fallback. Every failure
//! (network, status, decode, in-band `error`) comes back as a
//! [`FetchError`], which callers treat uniformly as "no data".
//!
//! The token travels in the query string, so it is never logged in full:
//! see [`redact_token`].

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::error::FetchError;
use crate::query::{
    QueryDescriptor, CONTACT_TABLE, DEAL_CUSTOM_TABLE, DEAL_FIELDS_TABLE, DEAL_TABLE,
    DEFAULT_CATEGORY_ID, USER_TABLE,
};
use crate::raw::RawResponse;

// ── Constants ───────────────────────────────────────────────────────

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const USER_AGENT: &str = concat!("dealboard/", env!("CARGO_PKG_VERSION"));

const LOG_BODY_LIMIT: usize = 1000;
const ERROR_BODY_LIMIT: usize = 200;

// ── Connection ──────────────────────────────────────────────────────

/// Everything the client needs to reach the endpoint. Resolved once at
/// startup by the caller; this crate never reads env vars or secret stores.
#[derive(Clone)]
pub struct Connection {
    pub base_url: String,
    pub token: String,
    pub default_category_id: i64,
    pub timeout: Duration,
}

impl Connection {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            default_category_id: DEFAULT_CATEGORY_ID,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_category(mut self, category_id: i64) -> Self {
        self.default_category_id = category_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url)
            .field("token", &redact_token(&self.token))
            .field("default_category_id", &self.default_category_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// First four characters of the token followed by `...`.
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}...", prefix)
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(limit).collect();
        out.push_str("...");
        out
    }
}

// ── Fetcher ─────────────────────────────────────────────────────────

/// One request/response cycle against a named table.
pub trait Fetcher {
    fn fetch(&self, table: &str, query: &QueryDescriptor) -> Result<RawResponse, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, table: &str, query: &QueryDescriptor) -> Result<RawResponse, FetchError> {
        (**self).fetch(table, query)
    }
}

// ── CrmClient ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl CrmClient {
    pub fn new(connection: &Connection) -> Result<Self, FetchError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(connection.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base_url: connection.base_url.clone(),
            token: connection.token.clone(),
        })
    }

    /// The request URL with the token redacted, safe for logs and errors.
    pub fn redacted_url(&self, table: &str) -> String {
        format!(
            "{}?token={}&table={}",
            self.base_url,
            redact_token(&self.token),
            table
        )
    }

    /// Deals matching a `FILTER`/`SELECT` body; `CATEGORY_ID` is always set.
    pub fn deals(
        &self,
        filter: Option<Map<String, Value>>,
        select: Option<Vec<String>>,
        category_id: i64,
    ) -> Result<RawResponse, FetchError> {
        let mut filter = filter.unwrap_or_default();
        filter.insert("CATEGORY_ID".to_string(), Value::from(category_id));
        info!(category_id, "querying deals");
        self.fetch(DEAL_TABLE, &QueryDescriptor::filter_select(filter, select))
    }

    pub fn deal_fields(&self) -> Result<RawResponse, FetchError> {
        self.fetch(DEAL_FIELDS_TABLE, &QueryDescriptor::empty())
    }

    pub fn deal_custom_fields(&self) -> Result<RawResponse, FetchError> {
        self.fetch(DEAL_CUSTOM_TABLE, &QueryDescriptor::empty())
    }

    pub fn users(&self) -> Result<RawResponse, FetchError> {
        self.fetch(USER_TABLE, &QueryDescriptor::empty())
    }

    pub fn contacts(
        &self,
        filter: Option<Map<String, Value>>,
        select: Option<Vec<String>>,
    ) -> Result<RawResponse, FetchError> {
        self.fetch(
            CONTACT_TABLE,
            &QueryDescriptor::filter_select(filter.unwrap_or_default(), select),
        )
    }
}

impl Fetcher for CrmClient {
    fn fetch(&self, table: &str, query: &QueryDescriptor) -> Result<RawResponse, FetchError> {
        let url = self.redacted_url(table);
        info!(table, url = %url, "requesting CRM table");
        debug!(table, body = %query.as_value(), "query descriptor");

        let started = Instant::now();
        let result = self
            .http
            .post(&self.base_url)
            .query(&[("token", self.token.as_str()), ("table", table)])
            .json(query)
            .send();

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                // reqwest errors embed the full URL, token included.
                let e = e.without_url();
                let err = if e.is_timeout() {
                    FetchError::Timeout {
                        table: table.to_string(),
                    }
                } else {
                    FetchError::Transport {
                        table: table.to_string(),
                        message: e.to_string(),
                    }
                };
                error!(table, url = %url, error = %err, "CRM request failed");
                return Err(err);
            }
        };

        let status = resp.status().as_u16();
        let text = resp.text().map_err(|e| {
            let err = FetchError::Transport {
                table: table.to_string(),
                message: format!("failed to read response body: {}", e.without_url()),
            };
            error!(table, status, error = %err, "CRM response unreadable");
            err
        })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            table,
            status,
            elapsed_ms,
            body = %truncate(&text, LOG_BODY_LIMIT),
            "CRM response"
        );

        if status != 200 {
            let err = FetchError::Status {
                table: table.to_string(),
                status,
                body: truncate(&text, ERROR_BODY_LIMIT),
            };
            error!(table, status, error = %err, "CRM request rejected");
            return Err(err);
        }

        let trimmed = text.trim_start_matches('\u{feff}');
        let value: Value = serde_json::from_str(trimmed).map_err(|e| {
            let err = FetchError::Decode {
                table: table.to_string(),
                message: format!("{} (body: {})", e, truncate(trimmed, ERROR_BODY_LIMIT)),
            };
            error!(table, error = %err, "CRM response is not JSON");
            err
        })?;

        let raw = RawResponse::new(value);
        if let Some((code, description)) = raw.api_error() {
            let description = description.unwrap_or_default();
            error!(
                table,
                code = %code,
                description = %description,
                token = %redact_token(&self.token),
                base_url = %self.base_url,
                "CRM reported an error"
            );
            return Err(FetchError::Api {
                table: table.to_string(),
                code,
                description,
            });
        }

        let records = raw.as_value().as_array().map(|a| a.len());
        info!(table, status, elapsed_ms, records = ?records, "CRM request succeeded");
        Ok(raw)
    }
}
