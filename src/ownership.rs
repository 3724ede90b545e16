//! Ownership arbitration for port identifiers.
//!
//! A port has at most one owner, named by application. A second caller asking
//! for an owned port fires `OwnershipRequested` at the identifier's listeners
//! and then waits for the incumbent to close; if that does not happen within
//! the open timeout the request fails with `PortInUse`.

use crate::error::{CommError, CommResult};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Ownership changes reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OwnershipEvent {
    Owned,
    Unowned,
    OwnershipRequested,
}

/// Receives ownership changes of one port identifier.
pub trait OwnershipListener: Send + Sync {
    fn ownership_change(&self, event: OwnershipEvent);
}

impl<F> OwnershipListener for F
where
    F: Fn(OwnershipEvent) + Send + Sync,
{
    fn ownership_change(&self, event: OwnershipEvent) {
        self(event)
    }
}

/// Token returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct OwnerState {
    owner: Option<String>,
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn OwnershipListener>)>,
}

/// The ownership cell of one port.
pub struct Ownership {
    port: String,
    state: Mutex<OwnerState>,
    released: Condvar,
}

impl Ownership {
    pub fn new(port: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            port: port.into(),
            state: Mutex::new(OwnerState::default()),
            released: Condvar::new(),
        })
    }

    pub fn current_owner(&self) -> Option<String> {
        self.state.lock().owner.clone()
    }

    pub fn is_owned(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub fn add_listener(&self, listener: Arc<dyn OwnershipListener>) -> ListenerId {
        let mut state = self.state.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, listener));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        state.listeners.len() != before
    }

    /// Take ownership for `app`, waiting up to `timeout` for the current owner
    /// to give the port up.
    pub fn claim(self: &Arc<Self>, app: &str, timeout: Duration) -> CommResult<OwnershipClaim> {
        let deadline = Instant::now().checked_add(timeout);

        let incumbent = {
            let mut state = self.state.lock();
            match &state.owner {
                None => {
                    state.owner = Some(app.to_string());
                    None
                }
                Some(owner) => Some(owner.clone()),
            }
        };

        if let Some(owner) = incumbent {
            info!(port = %self.port, %owner, requester = app, "ownership requested");
            // Listeners run without the lock so they may close the port.
            self.notify(OwnershipEvent::OwnershipRequested);

            let mut state = self.state.lock();
            while state.owner.is_some() {
                match deadline {
                    Some(deadline) => {
                        if self.released.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.released.wait(&mut state),
                }
            }
            if let Some(owner) = &state.owner {
                return Err(CommError::PortInUse {
                    port: self.port.clone(),
                    owner: owner.clone(),
                });
            }
            state.owner = Some(app.to_string());
        }

        debug!(port = %self.port, owner = app, "port owned");
        self.notify(OwnershipEvent::Owned);
        Ok(OwnershipClaim {
            ownership: Arc::clone(self),
            app: app.to_string(),
        })
    }

    fn release(&self, app: &str) {
        {
            let mut state = self.state.lock();
            if state.owner.as_deref() != Some(app) {
                return;
            }
            state.owner = None;
        }
        self.released.notify_all();
        debug!(port = %self.port, owner = app, "port released");
        self.notify(OwnershipEvent::Unowned);
    }

    fn notify(&self, event: OwnershipEvent) {
        let listeners: Vec<_> = self
            .state
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.ownership_change(event);
        }
    }
}

impl fmt::Debug for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ownership")
            .field("port", &self.port)
            .field("owner", &self.current_owner())
            .finish()
    }
}

/// Proof of ownership; released when dropped.
pub struct OwnershipClaim {
    ownership: Arc<Ownership>,
    app: String,
}

impl OwnershipClaim {
    pub fn owner(&self) -> &str {
        &self.app
    }
}

impl Drop for OwnershipClaim {
    fn drop(&mut self) {
        self.ownership.release(&self.app);
    }
}

impl fmt::Debug for OwnershipClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipClaim")
            .field("port", &self.ownership.port)
            .field("owner", &self.app)
            .finish()
    }
}
