pub mod background;
pub mod conflict;
pub mod network;
pub mod queue;
pub mod session;

pub use background::{BackgroundSync, DeferredSyncWorker, SyncRegistrar, SYNC_TAG};
pub use conflict::{check_for_conflict, ConflictCheck};
pub use network::{
    spawn_reconnect_drain, ConnectivityListener, ConnectivitySource, ListenerId,
    ManualConnectivity, MonitorHandle, NetworkMonitor, NetworkStatus, ReconnectDetector,
};
pub use queue::{
    ConflictPolicy, ConflictReport, DrainReport, EntryState, OfflineQueue, QueuedWrite,
};
pub use session::{
    HydrateSource, SaveStatus, SessionContext, SessionSettings, WorkspaceSession,
};
