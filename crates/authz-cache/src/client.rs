//! Cached authorization client
//!
//! Read-through cache in front of a [`DecisionProvider`]. The store lock is
//! only taken for the lookup and the insert, never across the provider call,
//! and failed provider calls are never cached.

use std::sync::Arc;

use crate::error::Result;
use crate::provider::{DecisionProvider, Entitlements};
use crate::request::{AppId, AuthorizationRequest, EntitlementQuery};
use crate::store::{CacheStats, DecisionCache};

/// Where a decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Served from the local cache
    Cache,
    /// Fetched from the provider
    Provider,
}

/// Decision with its reasons and origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Whether the check was permitted
    pub allowed: bool,
    /// Reasons reported by the provider
    pub reasons: Vec<String>,
    /// Cache hit or provider call
    pub source: DecisionSource,
}

/// Authorization client with a decision cache
pub struct AuthzClient {
    provider: Arc<dyn DecisionProvider>,
    cache: Arc<DecisionCache>,
}

impl AuthzClient {
    /// Create a client over `provider` with its own `cache`
    pub fn new(provider: Arc<dyn DecisionProvider>, cache: Arc<DecisionCache>) -> Self {
        Self { provider, cache }
    }

    /// The store backing this client, shared with the invalidation dispatcher
    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    /// Whether `request` is permitted
    pub async fn check(&self, request: &AuthorizationRequest, bypass_cache: bool) -> Result<bool> {
        self.check_detailed(request, bypass_cache)
            .await
            .map(|outcome| outcome.allowed)
    }

    /// Like [`check`](Self::check), also returning reasons and origin
    pub async fn check_detailed(
        &self,
        request: &AuthorizationRequest,
        bypass_cache: bool,
    ) -> Result<CheckOutcome> {
        request.validate()?;

        if !bypass_cache {
            if let Some(entry) = self.cache.get(request) {
                return Ok(CheckOutcome {
                    allowed: entry.allowed,
                    reasons: entry.reasons,
                    source: DecisionSource::Cache,
                });
            }
        }

        let decision = match self.provider.authorize(request).await {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(
                    app_id = request.app_id,
                    principal = %request.principal,
                    action = %request.action,
                    error = %err,
                    "Authorization check failed; decision not cached"
                );
                return Err(err);
            }
        };

        let allowed = decision.is_allowed();
        self.cache
            .set(request, allowed, decision.reasons.clone(), None);

        Ok(CheckOutcome {
            allowed,
            reasons: decision.reasons,
            source: DecisionSource::Provider,
        })
    }

    /// Forward an entitlement lookup; results are never cached
    pub async fn entitlements(&self, query: &EntitlementQuery) -> Result<Entitlements> {
        query.validate()?;
        self.provider.entitlements(query).await
    }

    /// Invalidate one application's decisions, or all of them
    pub fn invalidate(&self, app_id: Option<AppId>) -> usize {
        let removed = match app_id {
            Some(app_id) => self.cache.invalidate_app(app_id),
            None => self.cache.invalidate_all(),
        };
        tracing::info!(?app_id, removed, "Cache invalidated");
        removed
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
