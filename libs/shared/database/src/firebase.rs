use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, ETAG, IF_MATCH},
    Client, Method, StatusCode,
};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use shared_config::AppConfig;

use crate::error::StoreError;
use crate::store::{normalize, path_segments, AtomicOutcome, DocumentStore, Transaction, TransactionResult};

const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";

/// Realtime Database REST client.
///
/// `atomic_update` is optimistic: read with ETag, apply, `PUT` with `if-match`,
/// and retry on `412 Precondition Failed` with the value the server returned.
pub struct FirebaseClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    max_transaction_retries: u32,
}

enum ConditionalWrite {
    Written,
    Stale { etag: String, current: Option<Value> },
}

impl FirebaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.firebase_database_url.trim_end_matches('/').to_string(),
            auth_token: config.firebase_auth_token.clone(),
            max_transaction_retries: config.store_max_transaction_retries.max(1),
        }
    }

    fn url(&self, path: &str) -> Result<String, StoreError> {
        if self.base_url.is_empty() {
            return Err(StoreError::NotConfigured("FIREBASE_DATABASE_URL is empty".to_string()));
        }
        let segments = path_segments(path)?;
        Ok(format!("{}/{}.json", self.base_url, segments.join("/")))
    }

    fn get_headers(&self, with_etag: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if with_etag {
            headers.insert(ETAG_REQUEST_HEADER, HeaderValue::from_static("true"));
        }
        headers
    }

    fn request_builder(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
    ) -> Result<reqwest::RequestBuilder, StoreError> {
        let url = self.url(path)?;
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url).headers(headers);
        if let Some(token) = &self.auth_token {
            req = req.query(&[("auth", token.as_str())]);
        }
        Ok(req)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        error!("Realtime Database error ({}): {}", status, error_text);

        Err(match status.as_u16() {
            401 | 403 => StoreError::Auth(error_text),
            _ => StoreError::Api {
                status: status.as_u16(),
                message: error_text,
            },
        })
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let mut req = self.request_builder(method, path, self.get_headers(false))?;
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body_data) = body {
            req = req.json(body_data);
        }

        let response = Self::check_status(req.send().await?).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_with_etag(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
        let req = self.request_builder(Method::GET, path, self.get_headers(true))?;
        let response = Self::check_status(req.send().await?).await?;
        let etag = Self::etag_of(&response, path)?;
        let value: Value = response.json().await?;
        Ok((Some(value).filter(|v| !v.is_null()), etag))
    }

    async fn put_if_match(
        &self,
        path: &str,
        value: &Value,
        etag: &str,
    ) -> Result<ConditionalWrite, StoreError> {
        let mut headers = self.get_headers(true);
        headers.insert(
            IF_MATCH,
            HeaderValue::from_str(etag).map_err(|_| StoreError::MissingEtag(path.to_string()))?,
        );

        let response = self
            .request_builder(Method::PUT, path, headers)?
            .json(value)
            .send()
            .await?;

        if response.status() == StatusCode::PRECONDITION_FAILED {
            let etag = Self::etag_of(&response, path)?;
            let current: Value = response.json().await?;
            return Ok(ConditionalWrite::Stale {
                etag,
                current: Some(current).filter(|v| !v.is_null()),
            });
        }

        Self::check_status(response).await?;
        Ok(ConditionalWrite::Written)
    }

    fn etag_of(response: &reqwest::Response, path: &str) -> Result<String, StoreError> {
        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StoreError::MissingEtag(path.to_string()))
    }
}

#[async_trait]
impl DocumentStore for FirebaseClient {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let value = self.request(Method::GET, path, &[], None).await?;
        Ok(Some(value).filter(|v| !v.is_null()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.request(Method::PUT, path, &[], Some(&normalize(value))).await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        self.request(Method::PATCH, path, &[], Some(&Value::Object(fields))).await?;
        Ok(())
    }

    async fn atomic_update(
        &self,
        path: &str,
        apply: Transaction<'_>,
    ) -> Result<AtomicOutcome, StoreError> {
        let (mut current, mut etag) = self.get_with_etag(path).await?;

        for attempt in 1..=self.max_transaction_retries {
            let next = match apply(current.as_ref()) {
                TransactionResult::Commit(value) => normalize(value),
                TransactionResult::Abort => return Ok(AtomicOutcome::Aborted(current)),
            };

            match self.put_if_match(path, &next, &etag).await? {
                ConditionalWrite::Written => return Ok(AtomicOutcome::Committed(next)),
                ConditionalWrite::Stale { etag: fresh_etag, current: fresh } => {
                    warn!(
                        "Atomic update on {} lost a race, retrying ({}/{})",
                        path, attempt, self.max_transaction_retries
                    );
                    etag = fresh_etag;
                    current = fresh;
                }
            }
        }

        Err(StoreError::TransactionRetriesExhausted {
            path: path.to_string(),
            attempts: self.max_transaction_retries,
        })
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.request(Method::DELETE, path, &[], None).await?;
        Ok(())
    }

    async fn find_by_child(
        &self,
        path: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let query = [
            ("orderBy", Value::String(key.to_string()).to_string()),
            ("equalTo", value.to_string()),
        ];

        match self.request(Method::GET, path, &query, None).await? {
            Value::Object(children) => Ok(children.into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }
}
