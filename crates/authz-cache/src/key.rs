//! Cache key derivation
//!
//! A key is the SHA-256 digest of a canonical JSON rendering of the request.
//! Object keys are emitted in sorted order (`BTreeMap`), so two requests that
//! differ only in context insertion order hash identically. Entities keep
//! their `type` and `id` as separate JSON strings next to the `type::id`
//! label, since the label alone is ambiguous when either part contains `:`.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::request::{AppId, AuthorizationRequest, ContextValue, EntityRef};

/// Opaque, fixed-width identifier of a cached decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for a request
    pub fn derive(request: &AuthorizationRequest) -> Self {
        let canonical = canonical_form(request);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Serialize)]
struct CanonicalEntity<'a> {
    id: &'a str,
    label: String,
    #[serde(rename = "type")]
    entity_type: &'a str,
}

impl<'a> From<&'a EntityRef> for CanonicalEntity<'a> {
    fn from(entity: &'a EntityRef) -> Self {
        Self {
            id: &entity.id,
            label: entity.to_string(),
            entity_type: &entity.entity_type,
        }
    }
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    action: &'a str,
    app_id: AppId,
    context: &'a BTreeMap<String, ContextValue>,
    principal: CanonicalEntity<'a>,
    resource: CanonicalEntity<'a>,
}

fn canonical_form(request: &AuthorizationRequest) -> String {
    let canonical = CanonicalRequest {
        action: &request.action,
        app_id: request.app_id,
        context: &request.context,
        principal: (&request.principal).into(),
        resource: (&request.resource).into(),
    };
    // Serializing strings, integers, booleans and string-keyed maps cannot fail.
    serde_json::to_string(&canonical).unwrap_or_default()
}
