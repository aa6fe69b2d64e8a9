//! Core trait for records held in the local store.

use serde::{de::DeserializeOwned, Serialize};

use super::StoreName;

/// Trait for domain records that can be persisted locally.
///
/// Records are stored as JSON keyed by `(store, id)`. Negative ids mark
/// records that were created offline and still await a server id.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  fn id(&self) -> i64;

  /// Collection this record type lives in.
  fn store() -> StoreName;
}
