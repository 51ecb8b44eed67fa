//! Inventory management: validation of server entries before they are sent,
//! and parsing of import files.
//!
//! Import files are either JSON (an array of server objects, or an object
//! with a `servers` array) or a plain-text template with one `[server]`
//! section per host:
//!
//! ```text
//! [server]
//! host=192.168.1.10
//! ssh_user=admin
//! ssh_pass=secret
//! os=linux
//! ```
//!
//! `ssh_key_content` may span several lines when it holds a PEM block.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::client::{ApiError, InventoryApi};
use crate::ipc::http::{AddServerRequest, ImportServersRequest, OperationResponse, ServerEntry};
use crate::log::*;

static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((25[0-5]|2[0-4][0-9]|[0-1]?[0-9][0-9]?)\.){3}(25[0-5]|2[0-4][0-9]|[0-1]?[0-9][0-9]?)$")
        .expect("valid regex")
});

const SERVER_SECTION: &str = "[server]";
const KEY_CONTENT: &str = "ssh_key_content";

pub type ServerRecord = Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum InventoryError {
    #[error("`{0}` is not a valid IPv4 address")]
    InvalidAddress(String),
    #[error("unsupported operating system `{0}`, expected linux or windows")]
    UnknownOs(String),
    #[error("use either an SSH password or an SSH key, not both")]
    ConflictingCredentials,
    #[error("could not parse {file} as JSON")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{file}, line {line}: {message}")]
    Template {
        file: String,
        line: usize,
        message: String,
    },
    #[error("{0} contains no servers")]
    Empty(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub fn is_valid_ipv4(host: &str) -> bool {
    IPV4.is_match(host.trim())
}

/// Check a server entry before it is sent to the backend.
pub fn validate_server(request: &AddServerRequest) -> Result<(), InventoryError> {
    for host in std::iter::once(&request.host).chain(request.original_host.as_ref()) {
        if !is_valid_ipv4(host) {
            return Err(InventoryError::InvalidAddress(host.clone()));
        }
    }
    let os = request.os.trim().to_lowercase();
    if !matches!(os.as_str(), "" | "linux" | "windows") {
        return Err(InventoryError::UnknownOs(request.os.clone()));
    }
    if !request.ssh_pass.is_empty() && !request.ssh_key_content.trim().is_empty() {
        return Err(InventoryError::ConflictingCredentials);
    }
    Ok(())
}

/// Parse the servers out of an import file. JSON is used when the file name
/// says so or the content parses as JSON; everything else is read as the
/// `[server]` template. Entries without a host are dropped.
pub fn parse_import(file_name: &str, text: &str) -> Result<Vec<ServerRecord>, InventoryError> {
    let is_json_file = file_name.to_lowercase().ends_with(".json");
    let servers = match serde_json::from_str::<Value>(text) {
        Ok(value) => json_servers(file_name, value)?,
        Err(source) if is_json_file => {
            return Err(InventoryError::Json {
                file: file_name.to_string(),
                source,
            })
        }
        Err(_) => parse_template(file_name, text)?,
    };
    let servers: Vec<_> = servers
        .into_iter()
        .filter(|server| {
            server
                .get("host")
                .and_then(Value::as_str)
                .map(|host| !host.trim().is_empty())
                .unwrap_or(false)
        })
        .collect();
    if servers.is_empty() {
        return Err(InventoryError::Empty(file_name.to_string()));
    }
    debug!("inventory: parsed {} servers from {file_name}", servers.len());
    Ok(servers)
}

fn json_servers(file_name: &str, value: Value) -> Result<Vec<ServerRecord>, InventoryError> {
    let list = match value {
        Value::Array(list) => list,
        Value::Object(mut object) => match object.remove("servers") {
            Some(Value::Array(list)) => list,
            _ => vec![Value::Object(object)],
        },
        _ => return Err(InventoryError::Empty(file_name.to_string())),
    };
    Ok(list
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

fn parse_template(file_name: &str, text: &str) -> Result<Vec<ServerRecord>, InventoryError> {
    let mut servers = vec![];
    let mut current: Option<ServerRecord> = None;
    // Open multi-line PEM block for `ssh_key_content`.
    let mut pem: Option<String> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if let Some(block) = pem.as_mut() {
            block.push('\n');
            block.push_str(line);
            if line.starts_with("-----END") {
                let block = pem.take().unwrap_or_default();
                if let Some(server) = current.as_mut() {
                    server.insert(KEY_CONTENT.into(), Value::String(block));
                }
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            if !line.eq_ignore_ascii_case(SERVER_SECTION) {
                return Err(template_error(file_name, index, format!("unknown section {line}")));
            }
            servers.extend(current.take());
            current = Some(Map::new());
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| template_error(file_name, index, format!("expected key=value, got `{line}`")))?;
        let server = current
            .as_mut()
            .ok_or_else(|| template_error(file_name, index, "entry outside a [server] section"))?;
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if key == KEY_CONTENT && value.starts_with("-----BEGIN") && !value.contains("-----END") {
            pem = Some(value.to_string());
            continue;
        }
        server.insert(key, Value::String(value.to_string()));
    }

    if pem.is_some() {
        let line = text.lines().count();
        return Err(template_error(file_name, line, "unterminated ssh_key_content block"));
    }
    servers.extend(current);
    Ok(servers)
}

fn template_error(file_name: &str, index: usize, message: impl Into<String>) -> InventoryError {
    InventoryError::Template {
        file: file_name.to_string(),
        line: index + 1,
        message: message.into(),
    }
}

/// Inventory operations with local validation in front of the backend.
#[derive(Debug, Clone)]
pub struct InventoryManager<A: InventoryApi + ?Sized> {
    api: Arc<A>,
}

impl<A: InventoryApi + ?Sized> InventoryManager<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<ServerEntry>, InventoryError> {
        Ok(self.api.list_servers().await?.servers)
    }

    /// The raw inventory file as the backend stores it.
    pub async fn show(&self) -> Result<String, InventoryError> {
        Ok(self.api.show_inventory().await?.inventory)
    }

    pub async fn add(&self, request: &AddServerRequest) -> Result<OperationResponse, InventoryError> {
        validate_server(request)?;
        info!("inventory: adding {}", request.host);
        Ok(self.api.add_server(request).await?)
    }

    pub async fn remove(&self, host: &str) -> Result<OperationResponse, InventoryError> {
        if !is_valid_ipv4(host) {
            return Err(InventoryError::InvalidAddress(host.to_string()));
        }
        info!("inventory: removing {host}");
        Ok(self.api.remove_server(host.trim()).await?)
    }

    /// Parse `text` and import every server in it. Returns how many servers
    /// were sent along with the backend's answer.
    pub async fn import(
        &self,
        file_name: &str,
        text: &str,
    ) -> Result<(usize, OperationResponse), InventoryError> {
        let servers = parse_import(file_name, text)?;
        let count = servers.len();
        info!("inventory: importing {count} servers from {file_name}");
        let response = self
            .api
            .import_servers(&ImportServersRequest { servers })
            .await?;
        Ok((count, response))
    }
}
