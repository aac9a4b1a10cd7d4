//! Decision provider: the remote authorization service
//!
//! The cache only needs two calls from the service, so they sit behind a
//! trait. [`HttpDecisionProvider`] talks to the real REST API; tests plug in
//! in-memory providers.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::request::{AppId, AuthorizationRequest, Context, EntitlementQuery, EntityRef};

/// Decision value that means "permit"
pub const ALLOW: &str = "allow";

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Outcome reported by the provider for one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDecision {
    /// `"allow"` permits; anything else denies
    pub decision: String,
    /// Human-readable reasons
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ProviderDecision {
    /// Whether the decision permits the action
    pub fn is_allowed(&self) -> bool {
        self.decision == ALLOW
    }
}

/// One entitlement grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementEntry {
    /// `permit` or `forbid`
    #[serde(default)]
    pub effect: String,
    /// Actions covered by the grant
    #[serde(default)]
    pub actions: Vec<String>,
    /// Any other fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EntitlementEntry {
    /// Whether this grant permits its actions
    pub fn is_permit(&self) -> bool {
        self.effect == "permit"
    }
}

/// Entitlements of a user and their groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entitlements {
    /// Grants held directly by the user
    #[serde(default)]
    pub entitlements: Vec<EntitlementEntry>,
    /// Grants held through each group
    #[serde(default)]
    pub group_entitlements: HashMap<String, Vec<EntitlementEntry>>,
    /// Any other fields, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Entitlements {
    /// Every action granted by a `permit` entry, user or group level
    pub fn allowed_actions(&self) -> BTreeSet<String> {
        self.entitlements
            .iter()
            .chain(self.group_entitlements.values().flatten())
            .filter(|entry| entry.is_permit())
            .flat_map(|entry| entry.actions.iter().cloned())
            .collect()
    }
}

/// The remote authorization service
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// Evaluate one check
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<ProviderDecision>;

    /// Fetch all entitlements for a user
    async fn entitlements(&self, query: &EntitlementQuery) -> Result<Entitlements>;
}

#[derive(Serialize)]
struct ActionRef<'a> {
    #[serde(rename = "type")]
    action_type: &'static str,
    id: &'a str,
}

#[derive(Serialize)]
struct AuthorizeBody<'a> {
    application_id: AppId,
    principal: &'a EntityRef,
    action: ActionRef<'a>,
    resource: &'a EntityRef,
    context: &'a Context,
}

impl<'a> From<&'a AuthorizationRequest> for AuthorizeBody<'a> {
    fn from(request: &'a AuthorizationRequest) -> Self {
        Self {
            application_id: request.app_id,
            principal: &request.principal,
            action: ActionRef {
                action_type: "Action",
                id: &request.action,
            },
            resource: &request.resource,
            context: &request.context,
        }
    }
}

/// REST client for `/v1/authorize` and `/v1/entitlements`
#[derive(Debug, Clone)]
pub struct HttpDecisionProvider {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    authorize_timeout: Duration,
    entitlements_timeout: Duration,
}

impl HttpDecisionProvider {
    /// Create a provider for `base_url` with default timeouts (5s / 10s)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: HeaderMap::new(),
            authorize_timeout: Duration::from_secs(5),
            entitlements_timeout: Duration::from_secs(10),
        }
    }

    /// Send these headers with every request
    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Result<Self> {
        self.headers = header_map(headers)?;
        Ok(self)
    }

    /// Override the per-call timeouts
    pub fn with_timeouts(mut self, authorize: Duration, entitlements: Duration) -> Self {
        self.authorize_timeout = authorize;
        self.entitlements_timeout = entitlements;
        self
    }

    /// Reuse an existing HTTP client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, timeout: Duration) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CacheError::remote_unavailable(format!("POST {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            truncate_utf8(&mut text, MAX_ERROR_BODY);
            return Err(CacheError::remote_decision(status.as_u16(), text));
        }

        response.json::<T>().await.map_err(CacheError::from)
    }
}

#[async_trait]
impl DecisionProvider for HttpDecisionProvider {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<ProviderDecision> {
        let body = AuthorizeBody::from(request);
        let decision: ProviderDecision = self
            .post_json("/v1/authorize", &body, self.authorize_timeout)
            .await?;
        tracing::debug!(
            app_id = request.app_id,
            principal = %request.principal,
            action = %request.action,
            resource = %request.resource,
            decision = %decision.decision,
            "Decision provider answered"
        );
        Ok(decision)
    }

    async fn entitlements(&self, query: &EntitlementQuery) -> Result<Entitlements> {
        self.post_json("/v1/entitlements", query, self.entitlements_timeout)
            .await
    }
}

/// Convert configured string headers into a reqwest header map
pub(crate) fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CacheError::invalid_config(format!("auth_headers.{name}"), e.to_string()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| CacheError::invalid_config(format!("auth_headers.{name}"), e.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn truncate_utf8(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
