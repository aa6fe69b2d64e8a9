use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use url::Url;

use crate::config::ApiConfig;
use crate::store::{OperationKind, StoreName, SyncOperation};

/// Acknowledgement returned by the remote API for an applied operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAck {
  /// Server-assigned id, when the remote reports one (creates)
  pub id: Option<i64>,
}

/// Remote RPC surface the sync engine replays operations against.
///
/// Every call either fully succeeds or returns an error; there is no partial
/// application.
#[async_trait]
pub trait RemoteApi: Send + Sync + 'static {
  async fn dispatch(&self, op: &SyncOperation) -> Result<RemoteAck>;

  /// Authoritative list of records for a store.
  async fn list(&self, store: StoreName) -> Result<Vec<Value>>;

  /// Cheap reachability probe.
  async fn health(&self) -> Result<()>;
}

/// tRPC-over-HTTP client for the NeuroPlan API
#[derive(Clone)]
pub struct HttpRemote {
  client: Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpRemote {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let mut base = config.base_url.trim().to_string();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    let client = Client::builder()
      .user_agent(concat!("neuroplan-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  fn procedure_url(&self, store: StoreName, procedure: &str) -> Result<Url> {
    self
      .base_url
      .join(&format!("api/trpc/{}.{}", store.rpc_router(), procedure))
      .map_err(|e| eyre!("Failed to build endpoint for {}.{}: {}", store, procedure, e))
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }
}

#[async_trait]
impl RemoteApi for HttpRemote {
  async fn dispatch(&self, op: &SyncOperation) -> Result<RemoteAck> {
    let body = match op.operation {
      OperationKind::Delete => {
        let id = op
          .record_id()
          .ok_or_else(|| eyre!("Delete operation {} has no record id", op.id))?;
        json!({ "id": id })
      }
      OperationKind::Create | OperationKind::Update => op.data.clone(),
    };

    let url = self.procedure_url(op.store, op.operation.as_str())?;

    let response = self
      .authorize(self.client.post(url))
      .json(&body)
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", op.describe(), e))?
      .error_for_status()
      .map_err(|e| eyre!("Server rejected {}: {}", op.describe(), e))?;

    let text = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response for {}: {}", op.describe(), e))?;

    // Updates and deletes may legitimately return an empty body
    let id = serde_json::from_str::<Value>(&text)
      .ok()
      .map(unwrap_trpc)
      .and_then(|v| v.get("id").and_then(Value::as_i64));

    Ok(RemoteAck { id })
  }

  async fn list(&self, store: StoreName) -> Result<Vec<Value>> {
    let url = self.procedure_url(store, "list")?;

    let payload: Value = self
      .authorize(self.client.get(url))
      .send()
      .await
      .map_err(|e| eyre!("Failed to list {}: {}", store, e))?
      .error_for_status()
      .map_err(|e| eyre!("Server rejected {} list: {}", store, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse {} list: {}", store, e))?;

    match unwrap_trpc(payload) {
      Value::Array(items) => Ok(items),
      other => Err(eyre!("Unexpected {} list payload: {}", store, other)),
    }
  }

  async fn health(&self) -> Result<()> {
    let url = self
      .base_url
      .join("health")
      .map_err(|e| eyre!("Failed to build health endpoint: {}", e))?;

    self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Health check failed: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Server unhealthy: {}", e))?;

    Ok(())
  }
}

/// Strip the `{"result":{"data":...}}` envelope and an optional superjson
/// `{"json":...,"meta":...}` layer.
fn unwrap_trpc(mut value: Value) -> Value {
  if let Some(data) = value.pointer_mut("/result/data").map(Value::take) {
    value = data;
  }

  let is_superjson = matches!(
    &value,
    Value::Object(map) if map.contains_key("json") && map.keys().all(|k| k == "json" || k == "meta")
  );
  if is_superjson {
    if let Some(inner) = value.get_mut("json").map(Value::take) {
      value = inner;
    }
  }

  value
}
