use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use tracing::{debug, error};

use crate::error::BoxError;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub follow_redirects: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: vec![],
            follow_redirects: true,
        }
    }

    pub fn headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend_from_slice(headers);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// URL the response was finally served from, after any redirects.
    pub final_url: String,
    pub body: String,
}

/// HTTP capability used to probe OTF streams.
/// Retries and backoff, if any, are up to the implementation.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BoxError>;
}

/// [`HttpFetcher`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: Client,
    no_redirect_client: Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::build(None)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut following = Client::builder();
        let mut not_following = Client::builder().redirect(Policy::none());
        if let Some(timeout) = timeout {
            following = following.timeout(timeout);
            not_following = not_following.timeout(timeout);
        }

        Ok(Self {
            client: following.build()?,
            no_redirect_client: not_following.build()?,
        })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, BoxError> {
        let client = if request.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut builder = client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            error!("Received {} from {}", status, request.url);
            return Err(format!("{} from {}", status, request.url).into());
        }

        let final_url = response.url().to_string();
        if final_url != request.url {
            debug!("{} was redirected to {}", request.url, final_url);
        }
        let body = response.text().await?;

        Ok(FetchResponse { final_url, body })
    }
}
