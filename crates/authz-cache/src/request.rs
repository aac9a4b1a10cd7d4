//! Authorization request types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CacheError, Result};

/// Application identifier in the authorization service
pub type AppId = i64;

/// A typed entity reference (`User::alice`, `Document::doc1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type, e.g. `User`
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Entity identifier
    pub id: String,
}

impl EntityRef {
    /// Create an entity reference
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.entity_type, self.id)
    }
}

/// Context attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// Boolean attribute
    Bool(bool),
    /// Integer attribute
    Int(i64),
    /// String attribute
    String(String),
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Context attributes; ordered so equal sets compare and serialize equally
pub type Context = BTreeMap<String, ContextValue>;

/// A single access-control check
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorizationRequest {
    /// Application the check belongs to
    pub app_id: AppId,
    /// Who is acting
    pub principal: EntityRef,
    /// Action identifier, e.g. `view`
    pub action: String,
    /// What is acted upon
    pub resource: EntityRef,
    /// Auxiliary attributes
    pub context: Context,
}

impl AuthorizationRequest {
    /// Create a request with an empty context
    pub fn new(
        app_id: AppId,
        principal: EntityRef,
        action: impl Into<String>,
        resource: EntityRef,
    ) -> Self {
        Self {
            app_id,
            principal,
            action: action.into(),
            resource,
            context: Context::new(),
        }
    }

    /// Add one context attribute
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Replace the whole context
    pub fn with_context_map(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Reject requests that are missing identifying fields
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("principal.type", &self.principal.entity_type),
            ("principal.id", &self.principal.id),
            ("action", &self.action),
            ("resource.type", &self.resource.entity_type),
            ("resource.id", &self.resource.id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CacheError::invalid_config(field, "must not be empty"));
            }
        }
        Ok(())
    }
}

/// Bulk entitlement lookup for one user and their groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementQuery {
    /// Application to query
    #[serde(rename = "application_id")]
    pub app_id: AppId,
    /// User identifier
    pub username: String,
    /// Groups the user belongs to
    pub groups: Vec<String>,
    /// Include permissions inherited through groups
    pub include_inherited: bool,
}

impl EntitlementQuery {
    /// Create a query that includes inherited permissions
    pub fn new(app_id: AppId, username: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            app_id,
            username: username.into(),
            groups,
            include_inherited: true,
        }
    }

    /// Reject queries without a username
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(CacheError::invalid_config("username", "must not be empty"));
        }
        Ok(())
    }
}
