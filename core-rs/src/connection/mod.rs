//! Connection module - serialized access to the control plane
//!
//! - ConnectionScheduler: one active connection, FIFO backlog, priority bypass
//! - RequestOptions / ApiRequestBuilder: targets for API calls
//! - JSON queries: the request/response helper most callers submit

pub mod options;
pub mod query;
pub mod scheduler;

pub use options::{ApiRequestBuilder, Priority, RequestOptions};
pub use query::{QueryFailure, QueryResult, RequestBody};
pub use scheduler::{
    CompletionHandle, ConnectionId, ConnectionScheduler, SchedulerConfig, StartAction,
    DEFAULT_REQUEST_TIMEOUT, IMMEDIATE_BYPASS_THRESHOLD,
};
