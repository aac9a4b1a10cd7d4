//! Authorizer facade for tool servers
//!
//! Wires an [`AuthzClient`], its decision cache and (optionally) the event
//! subscriber together from one [`AuthorizerConfig`]. Unlike the client, the
//! facade fails closed: [`Authorizer::authorize`] turns every error into a
//! denial. Use [`Authorizer::decide`] to see the error instead.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::client::AuthzClient;
use crate::config::AuthorizerConfig;
use crate::error::{CacheError, Result};
use crate::events::{invalidator, EventSource, EventSubscriber, HttpEventSource, SubscriberPhase};
use crate::provider::{DecisionProvider, Entitlements, HttpDecisionProvider};
use crate::request::{AppId, AuthorizationRequest, Context, EntitlementQuery, EntityRef};
use crate::store::{CacheStats, DecisionCache};

/// Result of a check at the facade
#[derive(Debug, Clone)]
pub enum Decision {
    /// The provider (or cache) permitted the action
    Allowed {
        /// Reasons reported by the provider
        reasons: Vec<String>,
    },
    /// The provider (or cache) denied the action
    Denied {
        /// Reasons reported by the provider
        reasons: Vec<String>,
    },
    /// No decision could be obtained
    Error(CacheError),
}

impl Decision {
    /// Fail-closed reading of the decision
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Anything exposed to callers under a name that doubles as an action
pub trait NamedCapability {
    /// Name checked as both action and resource id
    fn capability_name(&self) -> &str;
}

impl NamedCapability for String {
    fn capability_name(&self) -> &str {
        self
    }
}

impl NamedCapability for &str {
    fn capability_name(&self) -> &str {
        self
    }
}

/// JSON tool descriptors are named by their `name` field
impl NamedCapability for serde_json::Value {
    fn capability_name(&self) -> &str {
        self.get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }
}

/// Cached authorization with push invalidation
pub struct Authorizer {
    config: AuthorizerConfig,
    client: AuthzClient,
    subscriber: Option<EventSubscriber>,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("config", &self.config)
            .field("events", &self.subscriber.is_some())
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    /// Build an authorizer talking to `config.base_url`
    ///
    /// `provider` replaces the HTTP decision provider when given. When events
    /// are enabled the subscriber is started on `{base_url}/v1/events`; this
    /// needs a running tokio runtime, without one events stay disabled.
    pub fn new(
        config: AuthorizerConfig,
        provider: Option<Arc<dyn DecisionProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        let provider = match provider {
            Some(provider) => provider,
            None => Arc::new(
                HttpDecisionProvider::new(config.normalized_base_url())
                    .with_headers(&config.auth_headers)?
                    .with_timeouts(config.request_timeout(), config.entitlements_timeout()),
            ),
        };

        let source: Option<Arc<dyn EventSource>> = if config.enable_events {
            match HttpEventSource::new(
                &config.events_url(),
                Some(config.app_id),
                &config.auth_headers,
                config.events.connect_timeout(),
            ) {
                Ok(source) => Some(Arc::new(source)),
                Err(error) => {
                    tracing::warn!(error = %error, "Failed to create event source; events disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::assemble(config, provider, source))
    }

    /// Build an authorizer over explicit provider and event source
    ///
    /// The source is only used when `config.enable_events` is set.
    pub fn with_event_source(
        config: AuthorizerConfig,
        provider: Arc<dyn DecisionProvider>,
        source: Arc<dyn EventSource>,
    ) -> Result<Self> {
        config.validate()?;
        let source = config.enable_events.then_some(source);
        Ok(Self::assemble(config, provider, source))
    }

    fn assemble(
        config: AuthorizerConfig,
        provider: Arc<dyn DecisionProvider>,
        source: Option<Arc<dyn EventSource>>,
    ) -> Self {
        let cache = Arc::new(DecisionCache::new(config.cache_ttl(), config.cache_max_size));
        let client = AuthzClient::new(provider, cache.clone());

        let subscriber = source.and_then(|source| {
            if tokio::runtime::Handle::try_current().is_err() {
                tracing::warn!("No tokio runtime; event subscriber not started");
                return None;
            }
            Some(EventSubscriber::start(
                source,
                invalidator(cache),
                &config.events,
            ))
        });

        tracing::info!(
            base_url = %config.normalized_base_url(),
            app_id = config.app_id,
            cache_ttl_secs = config.cache_ttl_secs,
            cache_max_size = config.cache_max_size,
            events = subscriber.is_some(),
            "Authorizer ready"
        );

        Self {
            config,
            client,
            subscriber,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Underlying cached client
    pub fn client(&self) -> &AuthzClient {
        &self.client
    }

    /// Phase of the event subscriber, if one is running
    pub fn subscriber_phase(&self) -> Option<SubscriberPhase> {
        self.subscriber.as_ref().map(EventSubscriber::phase)
    }

    /// Check a request and report the explicit outcome
    pub async fn decide(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        context: Context,
        principal_type: Option<&str>,
    ) -> Decision {
        let principal_type = principal_type.unwrap_or(&self.config.default_principal_type);
        let request = AuthorizationRequest::new(
            self.config.app_id,
            EntityRef::new(principal_type, user_id),
            action,
            EntityRef::new(resource_type, resource_id),
        )
        .with_context_map(context);

        match self.client.check_detailed(&request, false).await {
            Ok(outcome) if outcome.allowed => Decision::Allowed {
                reasons: outcome.reasons,
            },
            Ok(outcome) => Decision::Denied {
                reasons: outcome.reasons,
            },
            Err(error) => Decision::Error(error),
        }
    }

    /// Whether the user may perform `action`; any error denies
    pub async fn authorize(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        context: Context,
        principal_type: Option<&str>,
    ) -> bool {
        match self
            .decide(user_id, action, resource_type, resource_id, context, principal_type)
            .await
        {
            Decision::Allowed { .. } => true,
            Decision::Denied { .. } => false,
            Decision::Error(error) => {
                tracing::error!(
                    user_id,
                    action,
                    resource_type,
                    resource_id,
                    error = %error,
                    "Authorization check failed; denying"
                );
                false
            }
        }
    }

    /// Whether the user may call the named tool
    pub async fn authorize_tool(&self, tool_name: &str, user_id: &str, context: Context) -> bool {
        self.authorize(
            user_id,
            tool_name,
            &self.config.default_tool_resource_type,
            tool_name,
            context,
            None,
        )
        .await
    }

    /// Keep only the capabilities the user may call
    ///
    /// Items with an empty name are dropped.
    pub async fn filter_capabilities<T: NamedCapability>(
        &self,
        items: Vec<T>,
        user_id: &str,
    ) -> Vec<T> {
        let mut permitted = Vec::with_capacity(items.len());
        for item in items {
            let name = item.capability_name();
            if name.is_empty() {
                continue;
            }
            if self.authorize_tool(name, user_id, Context::new()).await {
                permitted.push(item);
            }
        }
        permitted
    }

    /// Guard for an operation
    ///
    /// The resource type defaults to the tool resource type and the resource
    /// id defaults to the action.
    pub async fn require(
        &self,
        user_id: &str,
        action: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<()> {
        if user_id.trim().is_empty() {
            return Err(CacheError::invalid_config("user_id", "required"));
        }
        let resource_type = resource_type.unwrap_or(&self.config.default_tool_resource_type);
        let resource_id = resource_id.unwrap_or(action);

        if self
            .authorize(user_id, action, resource_type, resource_id, Context::new(), None)
            .await
        {
            Ok(())
        } else {
            Err(CacheError::permission_denied(format!(
                "{user_id} is not authorized to {action} on {resource_type}::{resource_id}"
            )))
        }
    }

    /// All entitlements of a user, including inherited group grants
    pub async fn entitlements(&self, username: &str, groups: Vec<String>) -> Result<Entitlements> {
        let query = EntitlementQuery::new(self.config.app_id, username, groups);
        self.client.entitlements(&query).await
    }

    /// Every action the user holds a `permit` grant for
    pub async fn allowed_actions(
        &self,
        username: &str,
        groups: Vec<String>,
    ) -> Result<BTreeSet<String>> {
        Ok(self.entitlements(username, groups).await?.allowed_actions())
    }

    /// Drop cached decisions for one application, or all of them
    pub fn invalidate(&self, app_id: Option<AppId>) -> usize {
        self.client.invalidate(app_id)
    }

    /// Cache counters
    pub fn stats(&self) -> CacheStats {
        self.client.stats()
    }

    /// Stop the event subscriber, if any
    pub async fn close(&self) {
        if let Some(subscriber) = &self.subscriber {
            subscriber.stop().await;
        }
    }
}
