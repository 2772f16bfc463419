//! Parsed token claims.

use serde::{Deserialize, Serialize};

/// Claims of an access token issued by the identity service.
///
/// Only `contexts` take part in authorization. The top-level `scopes`
/// describe the session and never grant access to a handle.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default)]
    pub auth_id: String,
    #[serde(default)]
    pub auth_type: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub contexts: Vec<Context>,
}

/// Per-handle grant inside a token.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Context {
    pub handle: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl Claims {
    /// The first context for `handle`, if any.
    pub fn context_for(&self, handle: &str) -> Option<&Context> {
        self.contexts.iter().find(|ctx| ctx.handle == handle)
    }
}
