//! Placeholder ids for records created while offline.
//!
//! Offline-created records get a negative id until the server assigns a real
//! one; the sign alone tells the two apart.

use rand::Rng;

const OFFLINE_ID_RANGE: i64 = 1_000_000_000;

/// Generate a strictly negative placeholder id.
pub fn generate_offline_id() -> i64 {
  -rand::rng().random_range(1..OFFLINE_ID_RANGE)
}

pub fn is_offline_id(id: i64) -> bool {
  id < 0
}
