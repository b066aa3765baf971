use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Returned when a second device tries to connect while one is active.
#[derive(Debug, thiserror::Error)]
#[error("another device is already connected")]
pub struct DeviceBusy;

#[derive(Debug, Clone)]
struct ActiveDevice {
    session_id: Uuid,
    connected_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
}

/// The single active device session slot.
///
/// Single-writer discipline: the dispatcher claims it, and only the owning
/// session's teardown (or the heartbeat monitor on timeout) clears it. Release
/// is id-guarded so a late-exiting task can neither clobber a successor
/// session nor announce a disconnect twice.
#[derive(Clone)]
pub struct DeviceSlot {
    inner: Arc<RwLock<Option<ActiveDevice>>>,
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Claim the slot for a new device session. Fails without disturbing the
    /// active session if one exists.
    pub fn claim(&self) -> Result<Uuid, DeviceBusy> {
        let mut slot = self.inner.write();
        if slot.is_some() {
            return Err(DeviceBusy);
        }

        let now = Utc::now();
        let session_id = Uuid::new_v4();
        *slot = Some(ActiveDevice {
            session_id,
            connected_at: now,
            last_heartbeat: now,
        });
        Ok(session_id)
    }

    /// Refresh the heartbeat for the owning session. Returns false if the
    /// session no longer holds the slot (e.g. expired by the monitor).
    pub fn heartbeat(&self, session_id: Uuid) -> bool {
        if let Some(active) = self.inner.write().as_mut() {
            if active.session_id == session_id {
                active.last_heartbeat = Utc::now();
                return true;
            }
        }
        false
    }

    /// Clear the slot on session teardown. Returns true only if this session
    /// still owned it, so the caller announces the disconnect exactly once.
    pub fn release(&self, session_id: Uuid) -> bool {
        let mut slot = self.inner.write();
        let owned = slot
            .as_ref()
            .is_some_and(|active| active.session_id == session_id);
        if owned {
            *slot = None;
        }
        owned
    }

    /// Monitor path: clear the slot if the heartbeat is older than the
    /// timeout. Returns true when a stale session was expired.
    pub fn expire_if_stale(&self, timeout_seconds: i64) -> bool {
        let mut slot = self.inner.write();
        let stale = slot.as_ref().is_some_and(|active| {
            (Utc::now() - active.last_heartbeat).num_seconds() > timeout_seconds
        });
        if stale {
            *slot = None;
        }
        stale
    }

    pub fn is_connected(&self) -> bool {
        self.inner.read().is_some()
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().as_ref().map(|a| a.connected_at)
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&self, seconds: i64) {
        if let Some(active) = self.inner.write().as_mut() {
            active.last_heartbeat = Utc::now() - chrono::Duration::seconds(seconds);
        }
    }
}

impl Default for DeviceSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let slot = DeviceSlot::new();
        assert!(!slot.is_connected());

        let id = slot.claim().unwrap();
        assert!(slot.is_connected());

        assert!(slot.release(id));
        assert!(!slot.is_connected());
    }

    #[test]
    fn test_duplicate_claim_rejected_without_disturbing_active() {
        let slot = DeviceSlot::new();
        let first = slot.claim().unwrap();

        assert!(slot.claim().is_err());
        assert!(slot.is_connected());
        // The original session still owns the slot
        assert!(slot.heartbeat(first));
    }

    #[test]
    fn test_release_is_id_guarded() {
        let slot = DeviceSlot::new();
        let first = slot.claim().unwrap();
        assert!(slot.release(first));

        // A successor session claims; the stale id must not clear it or
        // report ownership
        let second = slot.claim().unwrap();
        assert!(!slot.release(first));
        assert!(slot.is_connected());
        assert!(slot.release(second));
    }

    #[test]
    fn test_expire_if_stale() {
        let slot = DeviceSlot::new();
        let id = slot.claim().unwrap();

        // Fresh heartbeat: not stale
        assert!(!slot.expire_if_stale(10));
        assert!(slot.is_connected());

        slot.backdate_heartbeat(11);
        assert!(slot.expire_if_stale(10));
        assert!(!slot.is_connected());

        // The owning task's late release is a no-op after expiry
        assert!(!slot.release(id));
    }

    #[test]
    fn test_heartbeat_keeps_session_fresh() {
        let slot = DeviceSlot::new();
        let id = slot.claim().unwrap();

        slot.backdate_heartbeat(11);
        assert!(slot.heartbeat(id));
        assert!(!slot.expire_if_stale(10));
    }

    #[test]
    fn test_heartbeat_for_expired_session_fails() {
        let slot = DeviceSlot::new();
        let id = slot.claim().unwrap();
        slot.backdate_heartbeat(11);
        slot.expire_if_stale(10);

        assert!(!slot.heartbeat(id));
    }
}
