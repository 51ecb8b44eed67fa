use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ApiError, ConsoleApi, InventoryApi};
use crate::ipc::http::{
    AddServerRequest, CancelRequest, CancelResponse, ErrorBody, ImportServersRequest,
    InventoryDump, InventoryListing, OperationResponse, PlaybookInfo, RemoveServerRequest,
    RunRequest, RunResponse, StatusResponse,
};
use crate::log::*;

/// [`ConsoleApi`] and [`InventoryApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConsoleClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConsoleClient {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client<S: Into<String>>(client: reqwest::Client, base_url: S) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        trace!("GET {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        Self::decode(path, response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        trace!("POST {url}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await.map_err(|source| ApiError::Transport {
            endpoint: path.to_string(),
            source,
        })?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(ErrorBody::into_message)
                .unwrap_or(text);
            return Err(ApiError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&text).map_err(|source| ApiError::Decode {
            endpoint: path.to_string(),
            source,
        })
    }
}

/// The inventory backend answers some failures with HTTP 200 and
/// `success: false`.
fn ensure_success(endpoint: &str, response: OperationResponse) -> Result<OperationResponse, ApiError> {
    if response.success {
        Ok(response)
    } else {
        Err(ApiError::Rejected {
            endpoint: endpoint.to_string(),
            message: response
                .message
                .unwrap_or_else(|| "no reason given".to_string()),
        })
    }
}

#[async_trait]
impl ConsoleApi for HttpConsoleClient {
    #[tracing::instrument(skip(self))]
    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, ApiError> {
        self.get_json("/api/playbooks").await
    }

    #[tracing::instrument(skip(self))]
    async fn run(&self, request: &RunRequest) -> Result<RunResponse, ApiError> {
        debug!("starting playbook {} on {} hosts", request.playbook, request.hosts.len());
        self.post_json("/api/run", request).await
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, ApiError> {
        self.get_json(&format!("/api/status/{job_id}")).await
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(&self, job_id: &str) -> Result<CancelResponse, ApiError> {
        let request = CancelRequest {
            job_id: job_id.to_string(),
        };
        self.post_json("/api/cancel", &request).await
    }
}

#[async_trait]
impl InventoryApi for HttpConsoleClient {
    #[tracing::instrument(skip(self))]
    async fn list_servers(&self) -> Result<InventoryListing, ApiError> {
        self.get_json("/get-inventory").await
    }

    #[tracing::instrument(skip(self))]
    async fn show_inventory(&self) -> Result<InventoryDump, ApiError> {
        self.get_json("/show-inventory").await
    }

    #[tracing::instrument(skip(self, request), fields(host = %request.host))]
    async fn add_server(&self, request: &AddServerRequest) -> Result<OperationResponse, ApiError> {
        let response = self.post_json("/add_server", request).await?;
        ensure_success("/add_server", response)
    }

    #[tracing::instrument(skip(self))]
    async fn remove_server(&self, host: &str) -> Result<OperationResponse, ApiError> {
        let request = RemoveServerRequest {
            host: host.to_string(),
        };
        let response = self.post_json("/remove_server", &request).await?;
        ensure_success("/remove_server", response)
    }

    #[tracing::instrument(skip(self, request), fields(servers = request.servers.len()))]
    async fn import_servers(
        &self,
        request: &ImportServersRequest,
    ) -> Result<OperationResponse, ApiError> {
        let response = self.post_json("/import_servers", request).await?;
        ensure_success("/import_servers", response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_joined_cleanly() {
        let client = HttpConsoleClient::new("http://console.local:5000/");
        assert_eq!("http://console.local:5000", client.base_url());
        assert_eq!(
            "http://console.local:5000/api/status/abc",
            client.url("/api/status/abc")
        );
        assert_eq!("http://console.local:5000/get-inventory", client.url("get-inventory"));
    }

    #[test]
    fn test_unsuccessful_operations_are_rejected() {
        let err = ensure_success(
            "/remove_server",
            OperationResponse {
                success: false,
                message: Some("Host não especificado".into()),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Rejected { .. }));
        assert!(err.to_string().contains("Host não especificado"));

        assert!(ensure_success(
            "/add_server",
            OperationResponse {
                success: true,
                message: None,
            },
        )
        .is_ok());
    }
}
