//! SearchExecutor trait and implementations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::dsl::DslQuery;
use crate::error::TransportError;
use crate::index_resolver::search_path;

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

/// Sends one query to the search engine and returns its raw JSON body.
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    async fn search(&self, shards: &[String], query: &DslQuery) -> Result<Value, TransportError>;
}

// ------------------------------------------------------------------ //
//  FakeSearchExecutor (for tests)                                     //
// ------------------------------------------------------------------ //

/// A request as seen by [`FakeSearchExecutor`].
#[derive(Debug, Clone)]
pub struct RecordedSearch {
    pub shards: Vec<String>,
    pub query: DslQuery,
}

/// In-memory executor that replays queued responses in order and records
/// every request for test assertions.
#[derive(Debug, Default, Clone)]
pub struct FakeSearchExecutor {
    responses: Arc<Mutex<VecDeque<Result<Value, TransportError>>>>,
    pub requests: Arc<Mutex<Vec<RecordedSearch>>>,
}

impl FakeSearchExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a body for the next unanswered search.
    pub fn push_response(&self, body: Value) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(body));
        self
    }

    pub fn push_error(&self, err: TransportError) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(err));
        self
    }

    /// Non-destructive snapshot of the requests received so far.
    pub fn snapshot(&self) -> Vec<RecordedSearch> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Responses queued but not yet consumed.
    pub fn pending(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SearchExecutor for FakeSearchExecutor {
    async fn search(&self, shards: &[String], query: &DslQuery) -> Result<Value, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedSearch {
                shards: shards.to_vec(),
                query: query.clone(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no response queued".to_string())))
    }
}

// ------------------------------------------------------------------ //
//  HttpSearchExecutor (production)                                    //
// ------------------------------------------------------------------ //

/// Posts queries to `{base_url}/{shard,shard,...}/_search/`.
pub struct HttpSearchExecutor {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl HttpSearchExecutor {
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    pub fn with_basic_auth(mut self, user: &str, password: &str) -> Self {
        self.credentials = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn url_for(&self, shards: &[String]) -> String {
        format!("{}/{}", self.base_url, search_path(shards))
    }
}

#[async_trait]
impl SearchExecutor for HttpSearchExecutor {
    async fn search(&self, shards: &[String], query: &DslQuery) -> Result<Value, TransportError> {
        let url = self.url_for(shards);
        debug!(%url, "search request");

        let mut req = self.http.post(&url).json(query);
        if let Some((user, password)) = &self.credentials {
            req = req.basic_auth(user, Some(password));
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json::<Value>().await?)
    }
}
