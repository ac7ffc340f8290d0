//! Connectivity tracking.
//!
//! [`NetworkMonitor`] is the single source of truth for online/offline state.
//! Platform integrations feed it through a [`ConnectivitySource`]; consumers
//! watch [`NetworkStatus`] and react to offline->online edges only.

use crate::remote::RemoteStore;
use crate::sync::queue::{ConflictPolicy, OfflineQueue};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type ListenerId = u64;
pub type ConnectivityListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Platform connectivity events.
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;

    fn add_listener(&self, listener: ConnectivityListener) -> ListenerId;

    /// Returns false if `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Connectivity source driven by explicit `set_online` calls.
pub struct ManualConnectivity {
    online: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, ConnectivityListener)>>,
    next_id: AtomicU64,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(ListenerId, ConnectivityListener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a platform event and notify every listener, even when the state
    /// did not change.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        let listeners: Vec<ConnectivityListener> =
            self.listeners().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(online);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn add_listener(&self, listener: ConnectivityListener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

/// Tracks whether the previous observation was offline so only genuine
/// reconnects trigger work.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectDetector {
    was_offline: bool,
}

impl ReconnectDetector {
    pub fn new(initially_online: bool) -> Self {
        Self {
            was_offline: !initially_online,
        }
    }

    /// True only on an offline->online edge.
    pub fn observe(&mut self, online: bool) -> bool {
        if online {
            std::mem::replace(&mut self.was_offline, false)
        } else {
            self.was_offline = true;
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub last_online_at: Option<DateTime<Utc>>,
    pub last_offline_at: Option<DateTime<Utc>>,
    /// Number of offline->online edges observed so far.
    pub reconnects: u64,
}

struct MonitorState {
    status: watch::Sender<NetworkStatus>,
    detector: Mutex<ReconnectDetector>,
}

impl MonitorState {
    fn record(&self, online: bool) {
        let reconnected = self
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .observe(online);
        let now = Utc::now();

        self.status.send_modify(|status| {
            if online {
                status.last_online_at = Some(now);
            } else if status.is_online {
                status.last_offline_at = Some(now);
            }
            status.is_online = online;
            if reconnected {
                status.reconnects += 1;
            }
        });

        if reconnected {
            info!("network reconnected");
        } else if !online {
            debug!("network offline");
        }
    }
}

/// Starts online with no source attached.
pub struct NetworkMonitor {
    state: Arc<MonitorState>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(NetworkStatus {
            is_online: true,
            last_online_at: None,
            last_offline_at: None,
            reconnects: 0,
        });
        Self {
            state: Arc::new(MonitorState {
                status,
                detector: Mutex::new(ReconnectDetector::new(true)),
            }),
        }
    }

    /// Subscribe to `source` once. Without a source the monitor reports
    /// online permanently. The returned handle removes exactly the listener
    /// added here.
    pub fn initialize(&self, source: Option<Arc<dyn ConnectivitySource>>) -> MonitorHandle {
        let Some(source) = source else {
            debug!("no connectivity source; assuming online");
            return MonitorHandle {
                source: None,
                listener: None,
            };
        };

        self.state.record(source.is_online());

        let state = Arc::clone(&self.state);
        let listener = source.add_listener(Arc::new(move |online| state.record(online)));

        MonitorHandle {
            source: Some(source),
            listener: Some(listener),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.status.borrow().is_online
    }

    pub fn status(&self) -> NetworkStatus {
        *self.state.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.state.status.subscribe()
    }
}

/// Subscription returned by [`NetworkMonitor::initialize`].
pub struct MonitorHandle {
    source: Option<Arc<dyn ConnectivitySource>>,
    listener: Option<ListenerId>,
}

impl MonitorHandle {
    /// Remove the listener. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if let (Some(source), Some(id)) = (&self.source, self.listener.take()) {
            source.remove_listener(id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Drain `queue` once for every reconnect the monitor reports.
pub fn spawn_reconnect_drain(
    monitor: &NetworkMonitor,
    queue: Arc<OfflineQueue>,
    remote: Arc<dyn RemoteStore>,
    user_id: String,
    policy: ConflictPolicy,
) -> JoinHandle<()> {
    let mut status = monitor.subscribe();
    let mut seen = status.borrow().reconnects;

    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let reconnects = status.borrow_and_update().reconnects;
            if reconnects == seen {
                continue;
            }
            seen = reconnects;

            if queue.pending_count() == 0 {
                continue;
            }
            let report = queue.drain_queue(remote.as_ref(), &user_id, policy).await;
            debug!(
                "reconnect drain: {} committed, {} failed",
                report.committed.len(),
                report.failed.len()
            );
        }
    })
}
