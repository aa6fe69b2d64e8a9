use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

const SEVEN_DAYS: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// AI generation endpoints whose results are memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
  Charter,
  Wbs,
  Tasks,
  Cycle,
}

impl CacheNamespace {
  pub const ALL: [CacheNamespace; 4] = [
    CacheNamespace::Charter,
    CacheNamespace::Wbs,
    CacheNamespace::Tasks,
    CacheNamespace::Cycle,
  ];

  pub fn prefix(&self) -> &'static str {
    match self {
      CacheNamespace::Charter => "charter",
      CacheNamespace::Wbs => "wbs",
      CacheNamespace::Tasks => "tasks",
      CacheNamespace::Cycle => "cycle",
    }
  }

  pub fn default_ttl(&self) -> Duration {
    SEVEN_DAYS
  }
}

impl fmt::Display for CacheNamespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.prefix())
  }
}

/// Deterministic key for `input` within a namespace.
///
/// Object keys are sorted before hashing, so field order never changes the key.
pub fn cache_key(namespace: CacheNamespace, input: &Value) -> String {
  let mut canonical = String::new();
  write_canonical(input, &mut canonical);

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  format!("{}:{}", namespace.prefix(), hex::encode(hasher.finalize()))
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

/// Normalize free text for consistent hashing.
pub(crate) fn normalize_text(text: &str) -> String {
  text.trim().to_string()
}
