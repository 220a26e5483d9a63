//! HTTP transport for instance engines.
//!
//! Every capability is a `POST {address}/{capability path}` carrying the
//! JSON-encoded [`BackendCall`]; the engine answers with a JSON
//! [`CapabilityResponse`]. Engines may add an `x-publication-date` header
//! naming the data they answered from.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use url::Url;

use super::backend::{BackendConnector, BackendError, CapabilityBackend};
use super::types::{BackendCall, CapabilityResponse};
use crate::config::InstanceBackendConfig;

/// Longest error body kept in a [`BackendError::Remote`] message.
const MAX_ERROR_BODY: usize = 512;

const PUBLICATION_DATE_HEADER: &str = "x-publication-date";

/// Stored while no answer carried a publication date.
const NO_DATE: i64 = i64::MIN;

/// Capability backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    publication_date: Arc<AtomicI64>,
}

impl HttpBackend {
    pub fn new(client: Client, address: &str) -> Result<Self, BackendError> {
        // `Url::join` replaces the last segment unless the base ends with '/'
        let normalized = if address.ends_with('/') {
            address.to_string()
        } else {
            format!("{address}/")
        };
        let base_url = Url::parse(&normalized).map_err(|e| BackendError::InvalidAddress {
            address: address.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            base_url,
            publication_date: Arc::new(AtomicI64::new(NO_DATE)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, call: &BackendCall) -> Result<Url, BackendError> {
        self.base_url
            .join(call.request.capability().path())
            .map_err(|e| BackendError::InvalidAddress {
                address: self.base_url.to_string(),
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl CapabilityBackend for HttpBackend {
    async fn call(&self, call: BackendCall) -> Result<CapabilityResponse, BackendError> {
        let url = self.endpoint(&call)?;
        tracing::trace!(instance = %call.instance_id, %url, "Calling instance backend");

        let resp = self
            .client
            .post(url)
            .json(&call)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let mut message = resp.text().await.unwrap_or_default();
            message.truncate(MAX_ERROR_BODY);
            return Err(BackendError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        if let Some(date) = publication_date(resp.headers()) {
            self.publication_date.store(date, Ordering::Relaxed);
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn observed_publication_date(&self) -> Option<i64> {
        match self.publication_date.load(Ordering::Relaxed) {
            NO_DATE => None,
            date => Some(date),
        }
    }
}

fn publication_date(headers: &HeaderMap) -> Option<i64> {
    headers.get(PUBLICATION_DATE_HEADER)?.to_str().ok()?.trim().parse().ok()
}

/// Builds [`HttpBackend`]s sharing one connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl BackendConnector for HttpConnector {
    fn connect(
        &self,
        config: &InstanceBackendConfig,
    ) -> Result<Arc<dyn CapabilityBackend>, BackendError> {
        let backend = HttpBackend::new(self.client.clone(), &config.address)?;
        Ok(Arc::new(backend))
    }
}
