//! Seams to the console backend. Everything that talks to the network goes
//! through [`ConsoleApi`] or [`InventoryApi`], so the polling loop and the
//! execution controller can be driven by fakes in tests.

use async_trait::async_trait;

use crate::ipc::http::{
    AddServerRequest, CancelResponse, ImportServersRequest, InventoryDump, InventoryListing,
    OperationResponse, PlaybookInfo, RunRequest, RunResponse, StatusResponse,
};

pub mod http;

pub use http::HttpConsoleClient;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("could not decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint} rejected the request: {message}")]
    Rejected { endpoint: String, message: String },
}

/// Playbook execution endpoints.
#[async_trait]
pub trait ConsoleApi: Send + Sync + std::fmt::Debug {
    /// `GET /api/playbooks`
    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, ApiError>;

    /// `POST /api/run`
    async fn run(&self, request: &RunRequest) -> Result<RunResponse, ApiError>;

    /// `GET /api/status/{job_id}`
    async fn status(&self, job_id: &str) -> Result<StatusResponse, ApiError>;

    /// `POST /api/cancel`
    async fn cancel(&self, job_id: &str) -> Result<CancelResponse, ApiError>;
}

/// Inventory endpoints.
#[async_trait]
pub trait InventoryApi: Send + Sync + std::fmt::Debug {
    /// `GET /get-inventory`
    async fn list_servers(&self) -> Result<InventoryListing, ApiError>;

    /// `GET /show-inventory`
    async fn show_inventory(&self) -> Result<InventoryDump, ApiError>;

    /// `POST /add_server`
    async fn add_server(&self, request: &AddServerRequest) -> Result<OperationResponse, ApiError>;

    /// `POST /remove_server`
    async fn remove_server(&self, host: &str) -> Result<OperationResponse, ApiError>;

    /// `POST /import_servers`
    async fn import_servers(
        &self,
        request: &ImportServersRequest,
    ) -> Result<OperationResponse, ApiError>;
}
