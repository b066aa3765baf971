use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::device::DeviceSlot;
use crate::hub::DashboardHub;
use crate::types::ServerMessage;

/// One liveness check. Returns true when a stale device session was expired
/// and the timeout announced to observers.
pub fn check_device_liveness(slot: &DeviceSlot, hub: &DashboardHub, timeout_seconds: i64) -> bool {
    if slot.expire_if_stale(timeout_seconds) {
        warn!("Device heartbeat timeout, forcing disconnect");
        hub.broadcast(&ServerMessage::status("Device connection timeout"));
        true
    } else {
        false
    }
}

/// Spawn the background heartbeat monitor. Runs for the lifetime of the
/// server; exits when the shutdown flag flips.
pub fn spawn_heartbeat_monitor(
    slot: DeviceSlot,
    hub: DashboardHub,
    interval_seconds: u64,
    timeout_seconds: i64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_seconds.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    check_device_liveness(&slot, &hub, timeout_seconds);
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat monitor stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_fresh_session_does_not_time_out() {
        let slot = DeviceSlot::new();
        let hub = DashboardHub::new();
        let id = slot.claim().unwrap();

        assert!(!check_device_liveness(&slot, &hub, 10));
        assert!(slot.is_connected());
        assert!(slot.heartbeat(id));
    }

    #[tokio::test]
    async fn test_stale_session_expires_and_announces_timeout() {
        let slot = DeviceSlot::new();
        let hub = DashboardHub::new();
        let (tx, mut rx) = unbounded_channel();
        hub.register(tx);

        slot.claim().unwrap();
        slot.backdate_heartbeat(11);

        assert!(check_device_liveness(&slot, &hub, 10));
        assert!(!slot.is_connected());

        let Message::Text(text) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.as_str().contains("Device connection timeout"));
    }

    #[tokio::test]
    async fn test_pinged_session_survives_checks() {
        let slot = DeviceSlot::new();
        let hub = DashboardHub::new();
        let id = slot.claim().unwrap();

        // Pure ping traffic is enough to stay alive
        for _ in 0..3 {
            slot.backdate_heartbeat(8);
            assert!(slot.heartbeat(id));
            assert!(!check_device_liveness(&slot, &hub, 10));
        }
        assert!(slot.is_connected());
    }

    #[tokio::test]
    async fn test_no_session_is_a_noop() {
        let slot = DeviceSlot::new();
        let hub = DashboardHub::new();
        assert!(!check_device_liveness(&slot, &hub, 10));
    }

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let slot = DeviceSlot::new();
        let hub = DashboardHub::new();
        let (tx, rx) = watch::channel(false);

        let handle = spawn_heartbeat_monitor(slot, hub, 1, 10, rx);
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
