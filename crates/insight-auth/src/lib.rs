//! insight-auth — who may read what.
//!
//! A caller's token carries one `Context` per tenant handle, each with its
//! own scope set. [`has_scope`] is the single decision point; everything
//! else converts its `false` into a 403.
//!
//! Signature checking sits behind [`TokenVerifier`] so the HTTP layer can
//! swap verification strategies without touching the scope logic.

pub mod claims;
pub mod error;
pub mod scope;
pub mod verify;

pub use claims::{Claims, Context};
pub use error::AuthError;
pub use scope::{has_scope, require_scope, LOGGING_READ, RUNTIME_READ, WILDCARD};
pub use verify::{JwtVerifier, TokenVerifier};
