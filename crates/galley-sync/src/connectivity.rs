//! # Connectivity Monitor
//!
//! Tracks whether the backend is reachable.
//!
//! ```text
//! platform signal / TCP probe
//!          │
//!          ▼
//!    set_online(bool) ──► watch<bool>            (current value)
//!          │
//!          └── only on change ──► broadcast<ConnectivityEvent>
//!                                     │
//!                                     └──► SyncOrchestrator (sync on BecameOnline)
//! ```
//!
//! The value is advisory. The orchestrator still confirms reachability with a
//! backend handshake before pushing anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info};

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

/// Shared online/offline state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state_tx: Arc<watch::Sender<bool>>,
    events_tx: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state_tx, _) = watch::channel(initially_online);
        let (events_tx, _) = broadcast::channel(16);
        ConnectivityMonitor {
            state_tx: Arc::new(state_tx),
            events_tx,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state_tx.borrow()
    }

    /// Returns a receiver that always holds the current value.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state_tx.subscribe()
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events_tx.subscribe()
    }

    /// Records the current reachability. Returns true if this was a
    /// transition; repeating the current value emits nothing.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            let event = if online {
                ConnectivityEvent::BecameOnline
            } else {
                ConnectivityEvent::BecameOffline
            };
            info!(?event, "Connectivity changed");
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }

        changed
    }

    /// Spawns a task that dials `addr` every `every` and feeds the result
    /// into [`ConnectivityMonitor::set_online`]. Abort the handle to stop it.
    pub fn spawn_probe(&self, addr: String, every: Duration, connect_timeout: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let reachable = matches!(
                    timeout(connect_timeout, TcpStream::connect(addr.as_str())).await,
                    Ok(Ok(_))
                );
                debug!(%addr, reachable, "Connectivity probe");
                monitor.set_online(reachable);
            }
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn test_events_only_on_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));

        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOnline);
        assert_eq!(events.try_recv().unwrap(), ConnectivityEvent::BecameOffline);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_watch_tracks_value() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();
        let clone = monitor.clone();

        clone.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_probe_reports_reachability() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();
        let probe = monitor.spawn_probe(addr, Duration::from_millis(20), Duration::from_secs(1));

        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|online| *online))
            .await
            .unwrap()
            .unwrap();

        drop(listener);
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|online| !*online))
            .await
            .unwrap()
            .unwrap();

        probe.abort();
    }
}
