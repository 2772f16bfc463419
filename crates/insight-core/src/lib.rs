//! insight-core — shared types for the Insight runtime API.
//!
//! Holds the response model (`ClusterStatus`, `InstanceState`,
//! `OperatorState`, `LogEntry`), the deployment descriptor, the error
//! taxonomy every crate converts into, and the process configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::{IngressStrategy, InsightConfig, RuntimeMode};
pub use error::{InsightError, InsightResult};
pub use types::*;
