use std::fmt;

use serde::{Deserialize, Serialize};

/// Extra variables passed through to `ansible-playbook`.
pub type ExtraVars = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybookInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunRequest {
    pub playbook: String,
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<ExtraVars>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResponse {
    pub job_id: String,
    /// Hosts the backend accepted; the ones missing from the inventory are
    /// dropped.
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    NotFound,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Anything but `running` ends the polling loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::NotFound => "not_found",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub output: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelRequest {
    pub job_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelResponse {
    #[serde(default)]
    pub success: bool,
}

/// One host as the inventory backend reports it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServerEntry {
    pub host: String,
    #[serde(default)]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_pass: String,
    #[serde(default)]
    pub windows_password: String,
    #[serde(default)]
    pub ssh_key_content: String,
    #[serde(default)]
    pub os: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryListing {
    pub servers: Vec<ServerEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryDump {
    pub inventory: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AddServerRequest {
    pub host: String,
    pub ssh_user: String,
    pub ssh_pass: String,
    pub ssh_key_content: String,
    pub os: String,
    /// Set when an existing entry is being edited under a new address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_host: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoveServerRequest {
    pub host: String,
}

/// Servers from an import file. Entries are passed through as free-form
/// key/value maps; the backend owns their interpretation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImportServersRequest {
    pub servers: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error payloads come back as either `{error}` or `{success: false, message}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.error.or(self.message)
    }
}
