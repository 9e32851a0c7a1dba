/**
 * allocator.rs
 * Capacity-bounded host port allocation
 *
 * Every cluster node can bind a given host port once, so a port can host at
 * most `capacity_limit` replicas (one per node). The allocator counts claims
 * per port and hands out the lowest port with enough headroom.
 *
 * Claims come from two places:
 * - External: host ports observed on running pods (record_external_claim)
 * - Allocated: ports handed out for new workloads (allocate)
 *
 * Both paths share one cursor scan so the "next usable port" never drifts.
 *
 * Example (capacity_limit = 3):
 * - 1024 claimed 3 times externally → cursor moves to 1025
 * - allocate(1) → 1025
 * - allocate(3) → 1026 (1025 has only 2 slots left)
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::errors::{KvisError, Result};

/// First host port handed out by a freshly constructed allocator
pub const DEFAULT_BASE_PORT: u16 = 1024;

/// Allocator shared between concurrent callers
pub type SharedPortAllocator = Arc<Mutex<PortAllocator>>;

/// Port Allocator - counts replicas per host port under a fixed ceiling
#[derive(Debug, Clone)]
pub struct PortAllocator {
    capacity_limit: u32,
    claims: HashMap<u16, u32>,
    cursor: u16,
}

impl PortAllocator {
    /// Create an allocator starting at [`DEFAULT_BASE_PORT`]
    ///
    /// # Arguments
    /// * `capacity_limit` - Maximum replicas per port (cluster node count)
    ///
    /// # Example
    /// ```
    /// use kvis_core::port::PortAllocator;
    ///
    /// let mut allocator = PortAllocator::new(3).unwrap();
    /// assert_eq!(allocator.allocate(1).unwrap(), 1024);
    /// ```
    pub fn new(capacity_limit: u32) -> Result<Self> {
        Self::with_base_port(capacity_limit, DEFAULT_BASE_PORT)
    }

    /// Create an allocator whose first candidate is `base_port`
    pub fn with_base_port(capacity_limit: u32, base_port: u16) -> Result<Self> {
        if capacity_limit == 0 {
            return Err(KvisError::ValidationError(
                "Port capacity limit must be at least 1".to_string(),
            ));
        }

        Ok(PortAllocator {
            capacity_limit,
            claims: HashMap::new(),
            cursor: base_port,
        })
    }

    /// Wrap this allocator for use from several tasks
    pub fn into_shared(self) -> SharedPortAllocator {
        Arc::new(Mutex::new(self))
    }

    pub fn capacity_limit(&self) -> u32 {
        self.capacity_limit
    }

    /// Lowest candidate port known not to be saturated
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Claim count for a port (unseen ports have zero claims)
    pub fn claims_for(&self, port: u16) -> u32 {
        self.claims.get(&port).copied().unwrap_or(0)
    }

    /// Ports that currently have an entry, in ascending order
    pub fn tracked_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.claims.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Record a host port claimed by a workload the allocator did not place
    ///
    /// Counts past the capacity limit are accepted; they describe what is
    /// already running.
    pub fn record_external_claim(&mut self, port: u16) {
        let count = self.claims.entry(port).or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;

        if port == self.cursor && count == self.capacity_limit {
            self.advance_cursor();
        }
    }

    /// Allocate one port for `replica_count` replicas
    ///
    /// # Errors
    /// - `InvalidReplicaCount` if `replica_count` is 0
    /// - `CapacityExceeded` if `replica_count` exceeds the capacity limit
    /// - `PortsExhausted` if the scan runs past the last host port
    ///
    /// Failures leave claims and cursor untouched.
    pub fn allocate(&mut self, replica_count: u32) -> Result<u16> {
        if replica_count == 0 {
            return Err(KvisError::InvalidReplicaCount(replica_count));
        }

        if replica_count > self.capacity_limit {
            error!(
                replicas = replica_count,
                capacity = self.capacity_limit,
                "Cannot place more replicas on a single port than there are nodes"
            );
            return Err(KvisError::CapacityExceeded {
                requested: replica_count,
                capacity: self.capacity_limit,
            });
        }

        let mut candidate = self.cursor;
        while let Some(&claimed) = self.claims.get(&candidate) {
            if claimed.saturating_add(replica_count) <= self.capacity_limit {
                break;
            }
            candidate = candidate
                .checked_add(1)
                .ok_or(KvisError::PortsExhausted(self.cursor))?;
        }

        *self.claims.entry(candidate).or_insert(0) += replica_count;
        self.advance_cursor();

        debug!(port = candidate, replicas = replica_count, "Allocated host port");
        Ok(candidate)
    }

    /// Allocate a port for a single replica
    pub fn allocate_one(&mut self) -> Result<u16> {
        self.allocate(1)
    }

    /// Check whether `count` more replicas fit on `port`
    pub fn is_available(&self, port: u16, count: u32) -> bool {
        count <= self.capacity_limit
            && self
                .claims
                .get(&port)
                .map_or(true, |&claimed| claimed.saturating_add(count) <= self.capacity_limit)
    }

    /// Forget every claim; the cursor keeps its position
    pub fn reset(&mut self) {
        self.claims.clear();
    }

    /// Rebuild claims from the host ports of the observed workload set
    pub fn resync<I>(&mut self, observed_ports: I)
    where
        I: IntoIterator<Item = u16>,
    {
        self.reset();
        for port in observed_ports {
            self.record_external_claim(port);
        }
    }

    /// Accept a proposed host port, or hand out a replacement
    ///
    /// Returns `port` when `replica_count` more replicas fit on it (the
    /// claims are recorded); otherwise allocates and returns a new port.
    pub fn claim_or_reassign(&mut self, port: u16, replica_count: u32) -> Result<u16> {
        if replica_count == 0 {
            return Err(KvisError::InvalidReplicaCount(replica_count));
        }

        if self.is_available(port, replica_count) {
            for _ in 0..replica_count {
                self.record_external_claim(port);
            }
            return Ok(port);
        }

        let reassigned = self.allocate(replica_count)?;
        info!(from = port, to = reassigned, "Changing requested host port");
        Ok(reassigned)
    }

    // Moves the cursor up to the first port below the capacity limit.
    fn advance_cursor(&mut self) {
        let mut port = self.cursor;
        while self
            .claims
            .get(&port)
            .is_some_and(|&claimed| claimed >= self.capacity_limit)
        {
            match port.checked_add(1) {
                Some(next) => port = next,
                None => break,
            }
        }

        self.cursor = port;
        self.claims.entry(port).or_insert(0);
    }
}
