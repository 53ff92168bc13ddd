//! netfleet core: the device inventory and the distributed command queue
//! shared by the root node and its clients.
//!
//! - [`device::DeviceStore`] merges device sightings by priority and completeness
//! - [`liveness::LivenessProbe`] keeps the miss counters and raises online/offline alerts
//! - [`queue::CommandQueue`] owns the retry/cancellation state machine
//! - [`sync`] holds both halves of the pull/push replication
//! - [`dispatch::CommandDispatcher`] routes verbs to [`handlers`]

pub mod alert;
pub mod clients;
pub mod command;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod liveness;
pub mod queue;
pub mod settings;
pub mod sync;
pub mod wire;

pub use alert::{Alert, LogNotifier, Notifier};
pub use clients::{ClientInfo, ClientRegistration, ClientRegistry};
pub use command::{CommandKey, CommandRecord, CommandStatus, InsertOptions, MAX_ATTEMPTS};
pub use device::{canonical_mac, format_mac, DeviceRecord, DeviceStore, ScanProtocol};
pub use dispatch::{CommandDispatcher, CommandHandler};
pub use error::{FleetError, Result};
pub use handlers::{AdminHandler, DeviceActionHandler, DeviceProtocol, DeviceRequest, ScanHandler, SnapshotHandler};
pub use liveness::{LivenessProbe, LivenessReport, LivenessTransport, Observation, OFFLINE_THRESHOLD};
pub use queue::CommandQueue;
pub use settings::RuntimeSettings;
pub use sync::{ReplicationSync, RootSync, RootTransport, SyncReport};
