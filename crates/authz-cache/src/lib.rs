//! # Authz Cache
//!
//! Client-side cache of authorization decisions for a remote policy service,
//! kept fresh by a server-sent event stream.
//!
//! ## Purpose
//!
//! - Serve repeated checks from a bounded TTL cache
//! - Fall through to the decision provider on a miss and cache the answer
//! - Subscribe to policy and entity change events and evict affected entries
//!
//! ## Key Components
//!
//! - **DecisionCache**: thread-safe store with TTL expiry, FIFO eviction and
//!   per-application invalidation
//! - **AuthzClient**: read-through client over a [`DecisionProvider`]
//! - **EventSubscriber**: background task with exponential reconnect backoff
//! - **invalidator**: event handler bound to a store
//! - **Authorizer**: fail-closed facade wiring the above from configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authz_cache::{Authorizer, AuthorizerConfig, Context};
//!
//! let authorizer = Authorizer::new(AuthorizerConfig::load("authz.toml")?, None)?;
//! if authorizer.authorize_tool("search", "alice", Context::new()).await {
//!     // run the tool
//! }
//! authorizer.close().await;
//! ```

pub mod authorizer;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod key;
pub mod provider;
pub mod request;
pub mod store;

pub use authorizer::{Authorizer, Decision, NamedCapability};
pub use client::{AuthzClient, CheckOutcome, DecisionSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthorizerConfig, SubscriberConfig, MAX_CACHE_TTL_SECS};
pub use error::{CacheError, Result};
pub use events::{
    invalidator, EventHandler, EventSource, EventStream, EventSubscriber, HttpEventSource,
    PolicyEvent, SubscriberPhase, ENTITY_UPDATED, POLICY_UPDATED,
};
pub use key::CacheKey;
pub use provider::{
    DecisionProvider, EntitlementEntry, Entitlements, HttpDecisionProvider, ProviderDecision,
};
pub use request::{AppId, AuthorizationRequest, Context, ContextValue, EntitlementQuery, EntityRef};
pub use store::{CacheEntry, CacheStats, DecisionCache, DEFAULT_MAX_SIZE, DEFAULT_TTL};
