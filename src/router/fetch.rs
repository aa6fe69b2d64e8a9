use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use std::collections::BTreeMap;

use super::request::{Request, Response};

/// Network access used by the router.
///
/// Any response, including a non-2xx one, is `Ok`; only transport failures
/// are errors.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = Client::builder()
      .user_agent(concat!("neuroplan-sync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers: BTreeMap<String, String> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/missing"))
      .and(header("accept", "text/html"))
      .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
      .mount(&server)
      .await;

    let request = Request::get(&format!("{}/missing", server.uri()))
      .unwrap()
      .with_header("Accept", "text/html");
    let response = HttpFetcher::new().unwrap().fetch(&request).await.unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.body_text(), "nope");
  }

  #[tokio::test]
  async fn test_unreachable_host_is_error() {
    let request = Request::get("http://127.0.0.1:9/").unwrap();
    assert!(HttpFetcher::new().unwrap().fetch(&request).await.is_err());
  }
}
