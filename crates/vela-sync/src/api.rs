//! # Remote API Client
//!
//! REST/JSON client for the backend collections.
//!
//! ## Endpoint Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Remote API Surface                               │
//! │                                                                         │
//! │  create   POST  /{collection}           201 Created   → created entity  │
//! │  update   PUT   /{collection}/{id}      200 or 201    → updated entity  │
//! │  search   GET   /{collection}?code=&name=&page=  200  → entity array    │
//! │  per-day  GET   /billings/per/{date}    200           → entity array    │
//! │                                                                         │
//! │  Auth: `Authorization: Bearer <token>` when a token is set.             │
//! │  401 → AuthRequired (token refresh is owned outside this layer)         │
//! │  other 4xx → Validation (surfaced to caller, never retried)             │
//! │  5xx → ServerError (retryable)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`RemoteApi`] trait is the seam the agent and export job depend on;
//! tests substitute scripted fakes for [`ApiClient`].

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use vela_core::{Entity, EntityKind};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Search Query
// =============================================================================

/// Query parameters for a collection search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Substring match against the entity `code`.
    pub code: Option<String>,

    /// Substring match against the entity `name`.
    pub name: Option<String>,

    /// 1-based result page; server default when absent.
    pub page: Option<u32>,
}

impl SearchQuery {
    /// Query matching `term` against code OR name.
    pub fn term(term: &str) -> Self {
        SearchQuery {
            code: Some(term.to_string()),
            name: Some(term.to_string()),
            page: None,
        }
    }

    /// True when no filter is set (a full-collection fetch).
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.name.is_none() && self.page.is_none()
    }

    /// Key/value pairs for the request query string; unset fields are
    /// omitted rather than sent empty.
    pub fn as_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(code) = &self.code {
            params.push(("code", code.clone()));
        }
        if let Some(name) = &self.name {
            params.push(("name", name.clone()));
        }
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        params
    }
}

// =============================================================================
// Remote API Trait
// =============================================================================

/// The backend operations the sync engine needs.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Creates an entity in a collection. Acknowledged by 201 only.
    async fn create(&self, kind: EntityKind, entity: &Entity) -> SyncResult<Entity>;

    /// Updates an entity by id. Acknowledged by 200 or 201 (some backend
    /// versions answer an upserting PUT with 201).
    async fn update(&self, kind: EntityKind, id: &str, entity: &Entity) -> SyncResult<Entity>;

    /// Searches a collection.
    async fn search(&self, kind: EntityKind, query: &SearchQuery) -> SyncResult<Vec<Entity>>;

    /// Billings recorded on one day (`date` formatted `YYYY-MM-DD`).
    async fn billings_per_day(&self, date: &str) -> SyncResult<Vec<Entity>>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// [`RemoteApi`] over HTTP.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(ApiClient {
            http,
            base_url,
            token: RwLock::new(None),
        })
    }

    /// Sets the bearer token attached to subsequent requests.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    /// Drops the bearer token (e.g. on logout).
    pub fn clear_token(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }

    fn collection_url(&self, kind: EntityKind) -> SyncResult<Url> {
        Ok(self.base_url.join(kind.path_segment())?)
    }

    fn entity_url(&self, kind: EntityKind, id: &str) -> SyncResult<Url> {
        Ok(self
            .base_url
            .join(&format!("{}/{}", kind.path_segment(), id))?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().ok().and_then(|g| g.clone()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_entity(response: reqwest::Response) -> SyncResult<Entity> {
        let body = response.text().await?;
        Ok(Entity::from_json(&body)?)
    }

    async fn read_entities(response: reqwest::Response) -> SyncResult<Vec<Entity>> {
        let values: Vec<serde_json::Value> = response.json().await?;
        values
            .into_iter()
            .map(|v| Entity::from_value(v).map_err(SyncError::from))
            .collect()
    }
}

/// Maps a response status against the set of acceptable success codes.
///
/// Kept as a free function so the classification rules are testable without
/// a server.
fn classify_status(status: StatusCode, accepted: &[StatusCode], body: &str) -> SyncResult<()> {
    if accepted.contains(&status) {
        return Ok(());
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::AuthRequired);
    }

    if status.is_client_error() {
        return Err(SyncError::Validation {
            status: status.as_u16(),
            message: if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("client error")
                    .to_string()
            } else {
                body.to_string()
            },
        });
    }

    if status.is_server_error() {
        return Err(SyncError::ServerError { status: status.as_u16() });
    }

    // A success code outside the endpoint contract (e.g. 204 from create)
    Err(SyncError::UnexpectedStatus {
        expected: accepted[0].as_u16(),
        actual: status.as_u16(),
    })
}

/// Splits a response into (status check, body) and surfaces the right error.
async fn check_response(
    response: reqwest::Response,
    accepted: &[StatusCode],
) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    // classify_status never returns Ok here; map its Err out
    match classify_status(status, accepted, &body) {
        Ok(()) => Err(SyncError::Internal(format!(
            "Status {status} classified as both accepted and rejected"
        ))),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn create(&self, kind: EntityKind, entity: &Entity) -> SyncResult<Entity> {
        let url = self.collection_url(kind)?;
        debug!(entity_kind = %kind, %url, "POST create");

        let response = self
            .authorize(self.http.post(url))
            .json(entity.as_map())
            .send()
            .await?;

        let response = check_response(response, &[StatusCode::CREATED]).await?;
        Self::read_entity(response).await
    }

    async fn update(&self, kind: EntityKind, id: &str, entity: &Entity) -> SyncResult<Entity> {
        let url = self.entity_url(kind, id)?;
        debug!(entity_kind = %kind, %url, "PUT update");

        let response = self
            .authorize(self.http.put(url))
            .json(entity.as_map())
            .send()
            .await?;

        let response =
            check_response(response, &[StatusCode::OK, StatusCode::CREATED]).await?;
        Self::read_entity(response).await
    }

    async fn search(&self, kind: EntityKind, query: &SearchQuery) -> SyncResult<Vec<Entity>> {
        let url = self.collection_url(kind)?;
        debug!(entity_kind = %kind, %url, "GET search");

        let response = self
            .authorize(self.http.get(url).query(&query.as_params()))
            .send()
            .await?;

        let response = check_response(response, &[StatusCode::OK]).await?;
        Self::read_entities(response).await
    }

    async fn billings_per_day(&self, date: &str) -> SyncResult<Vec<Entity>> {
        let url = self.base_url.join(&format!("billings/per/{date}"))?;
        debug!(%url, "GET billings per day");

        let response = self.authorize(self.http.get(url)).send().await?;

        let response = check_response(response, &[StatusCode::OK]).await?;
        Self::read_entities(response).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
