//! # KVis Core - cluster resource coordination
//!
//! Core of the KVis pod visualizer client. Two components sit between the
//! dashboard and the cluster control plane:
//!
//! - [`PortAllocator`]: hands out host ports so that no port carries more
//!   replicas than there are nodes in the cluster
//! - [`ConnectionScheduler`]: funnels every API call through one active
//!   connection, with a priority bypass for urgent calls when the backlog
//!   grows
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │        calling layer (dashboard, CLI)      │
//! └────────────────────────────────────────────┘
//!        │ allocate / resync       │ submit / submit_json_query
//!        ▼                         ▼
//! ┌──────────────┐        ┌─────────────────────┐
//! │ PortAllocator│        │ ConnectionScheduler │──► control plane (HTTPS)
//! └──────────────┘        └─────────────────────┘
//! ```

pub mod config;
pub mod connection;
pub mod errors;
pub mod port;

pub use config::{Credentials, KvisConfig};
pub use connection::{
    ApiRequestBuilder, CompletionHandle, ConnectionId, ConnectionScheduler, Priority,
    QueryFailure, QueryResult, RequestBody, RequestOptions, SchedulerConfig,
};
pub use errors::KvisError;
pub use port::{PortAllocator, SharedPortAllocator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
