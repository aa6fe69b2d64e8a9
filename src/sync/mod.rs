//! Offline-first synchronization with the NeuroPlan API.

mod engine;
mod offline;
mod remote;

pub use engine::{
  DrainOutcome, DrainReport, PullOutcome, Resolution, SyncEngine, SyncEvent, SyncOptions,
  SyncStatus,
};
pub use offline::OfflineRepository;
pub use remote::{HttpRemote, RemoteAck, RemoteApi};
