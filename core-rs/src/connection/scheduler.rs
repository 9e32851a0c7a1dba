//! ConnectionScheduler - one outbound connection at a time
//!
//! Every call to the control plane goes through a single active slot:
//!
//! ```text
//!   submit ──► idle? ──yes──► Active ──complete──► advance ──► next Active
//!                │
//!                no ──► Immediate && backlog > threshold? ──yes──► started (bypass)
//!                              │
//!                              no ──► pending (FIFO)
//! ```
//!
//! A bypassed request runs next to the active one; while it is in flight two
//! connections are open.
//!
//! Queue state sits behind one mutex. Start actions always run outside it,
//! so a request that completes synchronously re-enters the scheduler safely.
//! Advancement is a loop owned by the outermost completion: a completion that
//! arrives while another caller is draining only frees the slot.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::connection::options::{Priority, RequestOptions};
use crate::errors::{KvisError, Result};

/// Backlog depth above which an `Immediate` request bypasses the queue
pub const IMMEDIATE_BYPASS_THRESHOLD: usize = 5;

/// Bound on one request/response exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Work run when a request is allowed to start
///
/// Receives the (possibly priority-stripped) options and the handle that must
/// be completed once the underlying operation finishes.
pub type StartAction = Box<dyn FnOnce(RequestOptions, CompletionHandle) + Send + 'static>;

/// Identifier assigned to every submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub bypass_threshold: usize,
    pub request_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bypass_threshold: IMMEDIATE_BYPASS_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

struct QueuedConnection {
    id: ConnectionId,
    options: RequestOptions,
    start: StartAction,
}

#[derive(Default)]
struct SchedulerState {
    pending: VecDeque<QueuedConnection>,
    active: Option<ConnectionId>,
    bypass_in_flight: usize,
    draining: bool,
    next_id: u64,
}

impl SchedulerState {
    fn issue_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    // Pops the queue head into the active slot when the slot is free.
    fn take_next(&mut self) -> Option<QueuedConnection> {
        if self.active.is_some() {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.active = Some(next.id);
        Some(next)
    }
}

struct Shared {
    state: Mutex<SchedulerState>,
    bypass_threshold: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-shot completion signal for a started request
///
/// Consumed by [`CompletionHandle::complete`]. A handle dropped without
/// being completed (abandoned or panicked task) completes itself, so a
/// request can never hold the active slot forever.
pub struct CompletionHandle {
    id: ConnectionId,
    bypass: bool,
    shared: Arc<Shared>,
    done: bool,
}

impl CompletionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// True when the request was started through the priority bypass
    pub fn is_bypass(&self) -> bool {
        self.bypass
    }

    /// Signal that the request finished
    pub fn complete(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        ConnectionScheduler::on_complete(&self.shared, self.id, self.bypass);
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if !self.done {
            warn!(connection = %self.id, "Connection dropped without completing");
            self.signal();
        }
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("id", &self.id)
            .field("bypass", &self.bypass)
            .field("done", &self.done)
            .finish()
    }
}

/// Serializes outbound connections through one active slot
#[derive(Clone)]
pub struct ConnectionScheduler {
    shared: Arc<Shared>,
    pub(crate) client: reqwest::Client,
    pub(crate) request_timeout: Duration,
}

impl ConnectionScheduler {
    /// Create a scheduler and the HTTP client its JSON queries use
    ///
    /// # Example
    ///
    /// ```
    /// use kvis_core::connection::{ConnectionScheduler, SchedulerConfig};
    ///
    /// let scheduler = ConnectionScheduler::new(SchedulerConfig::default()).unwrap();
    /// assert!(scheduler.is_idle());
    /// ```
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| KvisError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                bypass_threshold: config.bypass_threshold,
            }),
            client,
            request_timeout: config.request_timeout,
        })
    }

    /// Submit a request
    ///
    /// Starts `start` synchronously when the scheduler is idle. While another
    /// caller is draining the queue the request joins it instead. Otherwise an
    /// `Immediate` request starts right away (priority stripped) if more than
    /// `bypass_threshold` requests are waiting, and anything else joins the
    /// tail of the queue. Never blocks on the request itself.
    pub fn submit<F>(&self, mut options: RequestOptions, start: F) -> ConnectionId
    where
        F: FnOnce(RequestOptions, CompletionHandle) + Send + 'static,
    {
        let mut state = self.shared.lock();
        let id = state.issue_id();

        if state.active.is_none() && !state.draining {
            state.active = Some(id);
            drop(state);

            debug!(connection = %id, path = %options.path, "Starting connection");
            self.dispatch(id, false, options, Box::new(start));
        } else if options.is_immediate() && state.pending.len() > self.shared.bypass_threshold {
            let queue_depth = state.pending.len();
            state.bypass_in_flight += 1;
            drop(state);

            options.priority = Priority::Normal;
            warn!(
                connection = %id,
                path = %options.path,
                queue_depth,
                "Backlog congested, starting immediate connection out of band"
            );
            self.dispatch(id, true, options, Box::new(start));
        } else {
            debug!(
                connection = %id,
                path = %options.path,
                queue_depth = state.pending.len() + 1,
                "Queueing connection"
            );
            state.pending.push_back(QueuedConnection {
                id,
                options,
                start: Box::new(start),
            });
        }

        id
    }

    /// Number of requests waiting for the active slot
    pub fn queue_depth(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Requests currently running, bypassed ones included
    pub fn in_flight(&self) -> usize {
        let state = self.shared.lock();
        usize::from(state.active.is_some()) + state.bypass_in_flight
    }

    /// Request holding the active slot
    pub fn active(&self) -> Option<ConnectionId> {
        self.shared.lock().active
    }

    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.active.is_none() && state.pending.is_empty() && state.bypass_in_flight == 0
    }

    pub fn bypass_threshold(&self) -> usize {
        self.shared.bypass_threshold
    }

    fn dispatch(&self, id: ConnectionId, bypass: bool, options: RequestOptions, start: StartAction) {
        Self::start_connection(&self.shared, id, bypass, options, start);
    }

    fn start_connection(
        shared: &Arc<Shared>,
        id: ConnectionId,
        bypass: bool,
        options: RequestOptions,
        start: StartAction,
    ) {
        let handle = CompletionHandle {
            id,
            bypass,
            shared: Arc::clone(shared),
            done: false,
        };
        start(options, handle);
    }

    fn on_complete(shared: &Arc<Shared>, id: ConnectionId, bypass: bool) {
        let mut next = {
            let mut state = shared.lock();
            // Started requests are never pending; this only guards against a stale entry
            state.pending.retain(|queued| queued.id != id);

            if bypass {
                state.bypass_in_flight = state.bypass_in_flight.saturating_sub(1);
            } else if state.active == Some(id) {
                state.active = None;
            }

            debug!(connection = %id, queue_depth = state.pending.len(), "Connection complete");
            if state.draining {
                return;
            }

            let next = state.take_next();
            state.draining = next.is_some();
            next
        };

        let _guard = DrainGuard { shared: shared.as_ref() };
        while let Some(queued) = next {
            debug!(connection = %queued.id, path = %queued.options.path, "Starting queued connection");
            Self::start_connection(shared, queued.id, false, queued.options, queued.start);

            let mut state = shared.lock();
            next = state.take_next();
            state.draining = next.is_some();
        }
    }
}

// Releases the drain loop if a start action panics mid-drain.
struct DrainGuard<'a> {
    shared: &'a Shared,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shared.lock().draining = false;
        }
    }
}

impl fmt::Debug for ConnectionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ConnectionScheduler")
            .field("active", &state.active)
            .field("queue_depth", &state.pending.len())
            .field("bypass_in_flight", &state.bypass_in_flight)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
