use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::collections::BTreeMap;
use url::Url;

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Header names are stored lowercase
  pub headers: BTreeMap<String, String>,
}

impl Request {
  pub fn new(method: Method, url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request URL {}: {}", url, e))?;
    Ok(Self {
      method,
      url,
      headers: BTreeMap::new(),
    })
  }

  pub fn get(url: &str) -> Result<Self> {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  pub fn accepts_html(&self) -> bool {
    self.header("accept").is_some_and(|v| v.contains("text/html"))
  }

  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }

  /// Key under which responses to this request are cached.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }
}

/// A response served to the page, either from the network or from a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Degraded response for API calls with nothing cached.
  pub fn offline_json() -> Self {
    Self::new(503, json!({ "error": "Offline", "offline": true }).to_string())
      .with_header("content-type", "application/json")
  }

  pub fn offline_text() -> Self {
    Self::new(503, "Offline").with_header("content-type", "text/plain")
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
