//! Scope Authorizer.

use insight_core::{InsightError, InsightResult};
use tracing::info;

use crate::claims::Claims;

/// Read deployed runtime state (status endpoint).
pub const RUNTIME_READ: &str = "runtime:read";

/// Read workload logs.
pub const LOGGING_READ: &str = "logging:read";

/// Satisfies any scope check for the handle it is granted on.
pub const WILDCARD: &str = "*";

/// Whether `claims` grant `scope` for `handle`.
///
/// Only the first context whose handle matches exactly is consulted. No
/// context means no access. Scopes are flat: nothing but the wildcard
/// implies another scope.
pub fn has_scope(claims: &Claims, handle: &str, scope: &str) -> bool {
    match claims.context_for(handle) {
        Some(ctx) => ctx.scopes.iter().any(|s| s == scope || s == WILDCARD),
        None => false,
    }
}

/// [`has_scope`] as a `Result`, for use with `?` at the top of a request.
pub fn require_scope(claims: &Claims, handle: &str, scope: &str) -> InsightResult<()> {
    if has_scope(claims, handle, scope) {
        Ok(())
    } else {
        info!(%handle, %scope, subject = %claims.sub, "scope check denied");
        Err(InsightError::forbidden(handle, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Context;

    fn ctx(handle: &str, scopes: &[&str]) -> Context {
        Context {
            handle: handle.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn claims(contexts: Vec<Context>) -> Claims {
        Claims {
            contexts,
            ..Default::default()
        }
    }

    #[test]
    fn wildcard_grants_everything_for_its_handle_only() {
        let c = claims(vec![ctx("kapeta", &["*"])]);
        assert!(has_scope(&c, "kapeta", "anything"));
        assert!(has_scope(&c, "kapeta", WILDCARD));
        assert!(!has_scope(&c, "other-handle", "anything"));
    }

    #[test]
    fn named_scope_is_exact() {
        let c = claims(vec![
            ctx("kapeta", &["*"]),
            ctx("sorenmat_org", &[LOGGING_READ]),
        ]);
        assert!(has_scope(&c, "sorenmat_org", LOGGING_READ));
        assert!(!has_scope(&c, "sorenmat_org", RUNTIME_READ));
        // Holding a named scope is not the same as holding the wildcard.
        assert!(!has_scope(&c, "sorenmat_org", WILDCARD));
    }

    #[test]
    fn no_context_fails_closed() {
        let c = claims(vec![]);
        for scope in [RUNTIME_READ, LOGGING_READ, WILDCARD, ""] {
            assert!(!has_scope(&c, "kapeta", scope));
        }
    }

    #[test]
    fn top_level_scopes_are_not_a_grant() {
        let c = Claims {
            scopes: vec![WILDCARD.to_string()],
            ..Default::default()
        };
        assert!(!has_scope(&c, "kapeta", RUNTIME_READ));
    }

    #[test]
    fn handle_match_is_exact() {
        let c = claims(vec![ctx("kapeta", &["*"])]);
        assert!(!has_scope(&c, "Kapeta", RUNTIME_READ));
        assert!(!has_scope(&c, "kapeta ", RUNTIME_READ));
    }

    #[test]
    fn first_duplicate_context_wins() {
        let c = claims(vec![
            ctx("kapeta", &[LOGGING_READ]),
            ctx("kapeta", &["*"]),
        ]);
        assert!(has_scope(&c, "kapeta", LOGGING_READ));
        assert!(!has_scope(&c, "kapeta", RUNTIME_READ));
    }

    #[test]
    fn require_scope_maps_to_forbidden() {
        let c = claims(vec![ctx("kapeta", &[LOGGING_READ])]);
        assert!(require_scope(&c, "kapeta", LOGGING_READ).is_ok());
        let err = require_scope(&c, "kapeta", RUNTIME_READ).unwrap_err();
        assert!(matches!(err, InsightError::Forbidden { .. }));
    }
}
