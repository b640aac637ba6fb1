use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use tracing::error;

use crate::config::ClientConfig;
use crate::credentials::{CredentialManager, TokenStore};
use crate::error::ClientError;

/// One call against the versioned API, relative to `{base}/v{version}`
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// JSON body; sent with `Content-Type: application/json`
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// HTTP client that attaches a valid bearer credential to every request
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialManager>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, http: reqwest::Client, credentials: Arc<CredentialManager>) -> Self {
        Self {
            http,
            base_url: config.versioned_base(),
            credentials,
        }
    }

    /// Client with an HTTP token exchange and the given credential store
    pub fn from_config(config: ClientConfig, store: Arc<dyn TokenStore>) -> Self {
        let http = reqwest::Client::new();
        let credentials = Arc::new(CredentialManager::with_http(config.clone(), store, http.clone()));
        Self::new(&config, http, credentials)
    }

    /// Send the request and return the raw response, e.g. to read it as a stream
    pub async fn send(&self, request: ApiRequest) -> Result<Response, ClientError> {
        let path = request.path.clone();
        let method = request.method.clone();

        self.send_authorized(request).await.map_err(|err| {
            error!(url = %path, method = %method, error = %err, "Request failed");
            err
        })
    }

    /// Send the request and decode the JSON response body
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let path = request.path.clone();
        let response = self.send(request).await?;

        response.json::<T>().await.map_err(|err| {
            error!(url = %path, error = %err, "Failed to decode response");
            ClientError::from(err)
        })
    }

    async fn send_authorized(&self, request: ApiRequest) -> Result<Response, ClientError> {
        let access_token = self.credentials.valid_access_token().await?;

        let mut headers = request.headers;
        headers.remove(AUTHORIZATION);
        if request.body.is_some() {
            headers.remove(CONTENT_TYPE);
        }

        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http
            .request(request.method, url)
            .headers(headers)
            .bearer_auth(access_token);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::request_failed(status));
        }
        Ok(response)
    }
}
