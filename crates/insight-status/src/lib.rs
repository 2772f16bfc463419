//! insight-status — runtime snapshot of one environment.
//!
//! ```text
//! get_environment_status
//!   ├── require_scope(runtime:read)
//!   ├── DescriptorSource::load            identity + declared services
//!   └── concurrently
//!       ├── try_join  ── WorkloadAdapter  → block instances
//!       │             └─ IngressAdapter   → gateway instances
//!       └── OperatorAdapter               → operator states (best-effort)
//! ```
//!
//! Workload and ingress lookups are mandatory: the first failure cancels
//! the other and aborts the request. Operator lookups always run to
//! completion and degrade per entry.

pub mod aggregator;

pub use aggregator::StatusAggregator;
