//! Session registry and per-endpoint construction guard
//!
//! Both are plain owned stores handed to the host and child entry points.
//! Cloning shares the underlying map, so one registry can back every
//! session of a context while tests still get a fresh one each.

use crate::channel::EndpointId;
use crate::error::ConstructionError;
use crate::frame::Frame;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Metadata of one established session, keyed by counterpart identity
#[derive(Clone)]
pub struct SessionInfo {
    /// Verified origin of the counterpart
    pub origin: String,

    /// Container embedding the counterpart (host side only)
    pub frame: Option<Arc<dyn Frame>>,
}

impl SessionInfo {
    pub fn new(origin: impl Into<String>, frame: Option<Arc<dyn Frame>>) -> Self {
        Self {
            origin: origin.into(),
            frame,
        }
    }
}

impl std::fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInfo")
            .field("origin", &self.origin)
            .field("has_frame", &self.frame.is_some())
            .finish()
    }
}

/// Mapping from counterpart identity to its session
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<Mutex<HashMap<EndpointId, SessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, evicting any prior one for the same identity
    ///
    /// The swap happens under one lock, so concurrent registrations evict
    /// each other exactly once. The evicted entry's container is removed
    /// after the lock is released. Returns the evicted entry.
    pub fn register(&self, identity: EndpointId, info: SessionInfo) -> Option<SessionInfo> {
        let previous = self.entries.lock().insert(identity, info);

        if let Some(prior) = &previous {
            tracing::debug!(counterpart = %identity, origin = %prior.origin, "Evicting prior session");
            if let Some(frame) = &prior.frame {
                frame.remove();
            }
        }

        previous
    }

    /// Removes the entry for `identity`, if any
    pub fn unregister(&self, identity: EndpointId) -> Option<SessionInfo> {
        self.entries.lock().remove(&identity)
    }

    pub fn lookup(&self, identity: EndpointId) -> Option<SessionInfo> {
        self.entries.lock().get(&identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops entries whose container is detached or cannot be probed
    ///
    /// Entries without a container are left alone. Returns the number of
    /// entries removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|identity, info| match &info.frame {
            Some(frame) => {
                let alive = frame.is_attached() == Some(true);
                if !alive {
                    tracing::debug!(counterpart = %identity, "Sweeping detached session");
                }
                alive
            }
            None => true,
        });

        before - entries.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until the task is aborted
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.sweep();
                if removed > 0 {
                    tracing::info!(removed, "Registry sweep removed detached sessions");
                }
            }
        })
    }
}

/// Set of endpoints that currently own a child session
#[derive(Clone, Default)]
pub struct ConstructionGuard {
    held: Arc<Mutex<HashSet<EndpointId>>>,
}

impl ConstructionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `endpoint`, failing if it is already claimed
    pub fn try_acquire(&self, endpoint: EndpointId) -> Result<GuardToken, ConstructionError> {
        if !self.held.lock().insert(endpoint) {
            return Err(ConstructionError::DuplicateSession(endpoint));
        }

        Ok(GuardToken {
            endpoint,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, endpoint: EndpointId) -> bool {
        self.held.lock().contains(&endpoint)
    }
}

/// Claim on one endpoint; released on drop
pub struct GuardToken {
    endpoint: EndpointId,
    held: Arc<Mutex<HashSet<EndpointId>>>,
}

impl GuardToken {
    #[inline]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }
}

impl std::fmt::Debug for GuardToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GuardToken").field(&self.endpoint).finish()
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.held.lock().remove(&self.endpoint);
    }
}
