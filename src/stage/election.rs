//! Controller election among stage-operator instances.
//!
//! The right to drive timers is a lease record claimed with compare-and-swap. Each new
//! holder bumps the fencing token, and every timer-driven write first checks that the
//! lease still carries this instance's token.

use crate::clock::Millis;
use crate::store::{self, paths, SharedStore, StoreError};
use crate::types::{ControllerLease, InstanceId, Session};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// How many times a forced claim retries a lost compare-and-swap
const FORCE_CLAIM_ATTEMPTS: usize = 5;

/// The session-level controller rule: the named controller, or anyone while unset
pub fn is_controller(session: &Session, instance_id: &str) -> bool {
    session.controller_id.is_empty() || session.controller_id == instance_id
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This instance just became controller with a new fencing token
    Acquired { fence: u64 },
    /// This instance already was controller and extended its lease
    Renewed,
    /// Another live instance holds the lease
    Standby { holder: InstanceId },
}

pub struct Election {
    instance_id: InstanceId,
    ttl: Duration,
    fence: Option<u64>,
}

impl Election {
    pub fn new(instance_id: InstanceId, ttl: Duration) -> Self {
        Self {
            instance_id,
            ttl,
            fence: None,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Fencing token held by this instance, if it believes it is controller
    pub fn fence(&self) -> Option<u64> {
        self.fence
    }

    fn lease_for(&self, fence: u64, now: Millis) -> ControllerLease {
        ControllerLease {
            holder: self.instance_id.clone(),
            fence,
            expires_at: now + self.ttl.as_millis() as Millis,
        }
    }

    fn owns(&self, lease: &ControllerLease) -> bool {
        lease.holder == self.instance_id && Some(lease.fence) == self.fence
    }

    /// Claim or renew the lease; used at boot and on every heartbeat
    pub async fn claim(
        &mut self,
        store: &dyn SharedStore,
        now: Millis,
    ) -> Result<ClaimOutcome, StoreError> {
        let raw = store.get(paths::CONTROLLER).await?;
        let current = decode_lease(raw.as_ref());

        let (next, renewing) = match &current {
            Some(lease) if self.owns(lease) => (self.lease_for(lease.fence, now), true),
            // Our own id under a token we do not know: a previous run of this instance
            Some(lease) if lease.holder == self.instance_id => {
                (self.lease_for(lease.fence + 1, now), false)
            }
            Some(lease) if lease.is_live(now) => {
                self.fence = None;
                return Ok(ClaimOutcome::Standby {
                    holder: lease.holder.clone(),
                });
            }
            Some(lease) => (self.lease_for(lease.fence + 1, now), false),
            None => (self.lease_for(1, now), false),
        };

        if !store
            .compare_and_swap(paths::CONTROLLER, raw, serde_json::to_value(&next)?)
            .await?
        {
            self.fence = None;
            let holder = store::read::<ControllerLease>(store, paths::CONTROLLER)
                .await
                .ok()
                .flatten()
                .map(|lease| lease.holder)
                .unwrap_or_default();
            return Ok(ClaimOutcome::Standby { holder });
        }

        if renewing {
            return Ok(ClaimOutcome::Renewed);
        }

        self.fence = Some(next.fence);
        self.mirror_into_session(store).await?;
        tracing::info!(
            instance = %self.instance_id,
            fence = next.fence,
            "Acquired controller lease"
        );
        Ok(ClaimOutcome::Acquired { fence: next.fence })
    }

    /// Take the lease regardless of the current holder (an operator intervening)
    pub async fn force_claim(
        &mut self,
        store: &dyn SharedStore,
        now: Millis,
    ) -> Result<u64, StoreError> {
        for _ in 0..FORCE_CLAIM_ATTEMPTS {
            let raw = store.get(paths::CONTROLLER).await?;
            let fence = decode_lease(raw.as_ref()).map_or(1, |lease| lease.fence + 1);
            let next = self.lease_for(fence, now);
            if store
                .compare_and_swap(paths::CONTROLLER, raw, serde_json::to_value(&next)?)
                .await?
            {
                self.fence = Some(fence);
                self.mirror_into_session(store).await?;
                tracing::info!(instance = %self.instance_id, fence, "Forced controller claim");
                return Ok(fence);
            }
        }

        // Everyone else kept winning the race; overwrite as a last resort
        let raw = store.get(paths::CONTROLLER).await?;
        let fence = decode_lease(raw.as_ref()).map_or(1, |lease| lease.fence + 1);
        store::write(store, paths::CONTROLLER, &self.lease_for(fence, now)).await?;
        self.fence = Some(fence);
        self.mirror_into_session(store).await?;
        tracing::warn!(instance = %self.instance_id, fence, "Forced controller claim by overwrite");
        Ok(fence)
    }

    /// Whether the stored lease still carries this instance's token
    pub async fn holds(&self, store: &dyn SharedStore) -> Result<bool, StoreError> {
        if self.fence.is_none() {
            return Ok(false);
        }
        let raw = store.get(paths::CONTROLLER).await?;
        Ok(decode_lease(raw.as_ref()).is_some_and(|lease| self.owns(&lease)))
    }

    /// Forget the local claim after observing someone else's lease.
    /// Returns `true` if this instance had believed it was controller.
    pub fn observe(&mut self, lease: Option<&ControllerLease>) -> bool {
        let was_controller = self.fence.is_some();
        if lease.is_some_and(|lease| self.owns(lease)) {
            return false;
        }
        self.fence = None;
        was_controller
    }

    /// Expire our lease so another instance can take over without waiting for the TTL
    pub async fn release(&mut self, store: &dyn SharedStore) -> Result<(), StoreError> {
        let Some(fence) = self.fence.take() else {
            return Ok(());
        };
        let raw = store.get(paths::CONTROLLER).await?;
        let Some(mut lease) = decode_lease(raw.as_ref()) else {
            return Ok(());
        };
        if lease.holder != self.instance_id || lease.fence != fence {
            return Ok(());
        }
        lease.expires_at = 0;
        store
            .compare_and_swap(paths::CONTROLLER, raw, serde_json::to_value(&lease)?)
            .await?;
        tracing::info!(instance = %self.instance_id, fence, "Released controller lease");
        Ok(())
    }

    pub(super) async fn mirror_into_session(&self, store: &dyn SharedStore) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert("controllerId".to_string(), json!(self.instance_id));
        store.update(paths::SESSION, fields).await
    }
}

/// Decode a raw lease; a malformed record counts as no lease
pub fn decode_lease(raw: Option<&Value>) -> Option<ControllerLease> {
    raw.and_then(|value| serde_json::from_value(value.clone()).ok())
}
