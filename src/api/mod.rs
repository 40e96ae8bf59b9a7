//! REST client for the backend.
//!
//! Every call carries `Authorization: Bearer <token>` from the injected
//! [`TokenProvider`]. A 401 triggers one forced refresh and a single retry.
//! Successful responses are unwrapped from the `{ "data": ..., "message": ... }`
//! envelope.

pub mod error;
pub mod planner;
pub mod rides;

pub use error::{ApiError, ErrorCode};

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::metrics;

/// Success envelope
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(default)]
    pub message: Option<String>,
}

/// Correlation header echoed back as `request_id` in error envelopes.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wayfarer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn get<T>(&self, path: &str) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
    {
        self.send::<T, ()>(Method::GET, path, None).await
    }

    pub(crate) async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let started = Instant::now();
        // One id per logical call, kept across the auth retry.
        let request_id = Uuid::new_v4().to_string();

        let token = self.tokens.token(false).await?;
        let mut response = self
            .request(method.clone(), &url, body, &token, &request_id)
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(method = %method, endpoint = %path, "Request unauthorized, refreshing token");
            match self.tokens.token(true).await {
                Ok(fresh) => {
                    metrics::record_token_refresh("rest", true);
                    response = self
                        .request(method.clone(), &url, body, &fresh, &request_id)
                        .await?;
                }
                Err(e) => {
                    metrics::record_token_refresh("rest", false);
                    return Err(ApiError::Auth(e));
                }
            }
        }

        let status = response.status();
        let text = response.text().await?;
        metrics::record_api_request(method.as_str(), started.elapsed().as_secs_f64());
        debug!(method = %method, endpoint = %path, status = status.as_u16(), request_id = %request_id, "API response");

        if !status.is_success() {
            let err = ApiError::from_response(status, &text);
            warn!(method = %method, endpoint = %path, request_id = %request_id, error = %err, "API request failed");
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn request<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        token: &str,
        request_id: &str,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header(REQUEST_ID_HEADER, request_id);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }
}

/// Check an id before splicing it into a path.
pub(crate) fn path_segment(id: &str) -> Result<&str, ApiError> {
    let id = id.trim();
    if id.is_empty() || id.contains(|c: char| matches!(c, '/' | '?' | '#' | '%')) {
        return Err(ApiError::Validation(format!("Invalid identifier: {:?}", id)));
    }
    Ok(id)
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
