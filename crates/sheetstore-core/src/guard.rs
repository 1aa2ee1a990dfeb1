//! Per-user mutation leases
//!
//! At most one live lease exists per user. Waiters park on a [`Notify`] and
//! wake on release, on expiry of the current holder, or at their deadline.
//! Leases on different users never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{Result, StoreError};

#[derive(Debug, Clone, Copy)]
struct Held {
    token: Uuid,
    /// `None` when `max_hold` is too large to represent
    expires_at: Option<Instant>,
}

impl Held {
    fn live_at(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Issues exclusive, time-bounded leases keyed by user
#[derive(Debug)]
pub struct LeaseGuard {
    held: Mutex<HashMap<String, Held>>,
    released: Notify,
    max_hold: Duration,
}

impl LeaseGuard {
    pub fn new(max_hold: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Notify::new(),
            max_hold,
        }
    }

    pub fn max_hold(&self) -> Duration {
        self.max_hold
    }

    /// Waits up to `timeout` for the user's lease. A zero timeout tries once;
    /// a timeout past the clock's range waits without a deadline.
    pub async fn acquire(self: &Arc<Self>, user_id: &str, timeout: Duration) -> Result<Lease> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);

        loop {
            // Registered before the check so a release in between is not missed
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let busy_until = match self.try_claim(user_id) {
                Ok(lease) => return Ok(lease),
                Err(expires_at) => expires_at,
            };

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                tracing::info!("Lease for {} not acquired after {}ms", user_id, waited_ms);
                return Err(StoreError::LockTimeout {
                    user_id: user_id.to_string(),
                    waited_ms,
                });
            }

            let wake = match (busy_until, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                None => notified.as_mut().await,
            }
        }
    }

    /// Claims the lease, or reports when the current one expires
    fn try_claim(self: &Arc<Self>, user_id: &str) -> std::result::Result<Lease, Option<Instant>> {
        let mut held = self.held.lock();
        let now = Instant::now();

        if let Some(current) = held.get(user_id) {
            if current.live_at(now) {
                return Err(current.expires_at);
            }
            tracing::warn!("Lease for {} expired after {:?}, reclaiming", user_id, self.max_hold);
        }

        let token = Uuid::new_v4();
        held.insert(
            user_id.to_string(),
            Held {
                token,
                expires_at: now.checked_add(self.max_hold),
            },
        );
        Ok(Lease {
            user_id: user_id.to_string(),
            token,
            acquired_at: now,
            guard: Arc::clone(self),
        })
    }

    /// Releases `lease`; no-op when it already ended
    pub fn release(&self, lease: Lease) {
        drop(lease);
    }

    fn release_token(&self, user_id: &str, token: Uuid) -> bool {
        let removed = {
            let mut held = self.held.lock();
            match held.get(user_id) {
                Some(current) if current.token == token => held.remove(user_id).is_some(),
                _ => false,
            }
        };
        if removed {
            self.released.notify_waiters();
        }
        removed
    }

    fn is_current(&self, user_id: &str, token: Uuid) -> bool {
        self.held
            .lock()
            .get(user_id)
            .is_some_and(|h| h.token == token && h.live_at(Instant::now()))
    }

    /// Whether some unexpired lease exists for the user
    pub fn is_held(&self, user_id: &str) -> bool {
        self.held
            .lock()
            .get(user_id)
            .is_some_and(|h| h.live_at(Instant::now()))
    }
}

/// Exclusive claim on one user's mutation path, released on drop
#[derive(Debug)]
pub struct Lease {
    user_id: String,
    token: Uuid,
    acquired_at: Instant,
    guard: Arc<LeaseGuard>,
}

impl Lease {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// False once the lease expired or was superseded
    pub fn is_valid(&self) -> bool {
        self.guard.is_current(&self.user_id, self.token)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.guard.release_token(&self.user_id, self.token);
    }
}
