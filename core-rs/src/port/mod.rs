/**
 * port module
 * Host port allocation under a per-port replica ceiling
 */

pub mod allocator;

pub use allocator::{PortAllocator, SharedPortAllocator, DEFAULT_BASE_PORT};
