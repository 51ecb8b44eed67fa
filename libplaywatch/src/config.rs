//! Client configuration, read from YAML.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. The playbook keyword lists live here rather than in
//! code: which playbooks count as "Site24x7", "antivirus" or "baseline"
//! playbooks differs between deployments.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::log::*;
use crate::providers::{HostBaseline, TargetOs};
use crate::watch::PollSettings;

pub const URL_ENV_VAR: &str = "PLAYWATCH_URL";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed reading config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed deserializing config file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    base_url: String,
    poll: PollConfig,
    keywords: Keywords,
    site24x7_groups: Vec<Site24x7Group>,
    default_site24x7_key: Option<String>,
    antivirus_scripts: Vec<AntivirusScript>,
    default_antivirus_script: String,
    baseline: BaselineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            poll: PollConfig::default(),
            keywords: Keywords::default(),
            site24x7_groups: vec![],
            default_site24x7_key: None,
            antivirus_scripts: default_antivirus_scripts(),
            default_antivirus_script: "antivirus.ps1".into(),
            baseline: BaselineConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the defaults when no path is given. The
    /// `PLAYWATCH_URL` environment variable overrides the base URL either way.
    #[tracing::instrument]
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    })?;
                Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(URL_ENV_VAR) {
            debug!("config: base url overridden by {URL_ENV_VAR}");
            settings.base_url = url;
        }
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn with_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::from(&self.poll)
    }

    pub fn site24x7_group(&self, name: &str) -> Option<&Site24x7Group> {
        self.site24x7_groups
            .iter()
            .find(|group| group.name.eq_ignore_ascii_case(name))
    }

    pub fn antivirus_script(&self, file: &str) -> Option<&AntivirusScript> {
        self.antivirus_scripts.iter().find(|script| script.file == file)
    }

    /// Script used for `os` when nobody picks one: the configured default if
    /// it targets `os`, otherwise the first catalog script that does.
    pub fn default_antivirus_script_for(&self, os: TargetOs) -> Option<&AntivirusScript> {
        let usable = self.antivirus_scripts_for(os);
        usable
            .iter()
            .find(|script| script.file == self.default_antivirus_script)
            .or_else(|| usable.first())
            .copied()
    }

    /// Catalog scripts usable on `os`. An unknown OS gets the full catalog.
    pub fn antivirus_scripts_for(&self, os: TargetOs) -> Vec<&AntivirusScript> {
        self.antivirus_scripts
            .iter()
            .filter(|script| os == TargetOs::Unknown || script.os == os)
            .collect()
    }
}

/// Polling intervals, in milliseconds.
#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    base_interval_ms: u64,
    max_interval_ms: u64,
    step_ms: u64,
    error_backoff_ms: u64,
    max_error_backoff_ms: u64,
    max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 2_000,
            max_interval_ms: 5_000,
            step_ms: 1_000,
            error_backoff_ms: 3_000,
            max_error_backoff_ms: 30_000,
            max_consecutive_errors: 5,
        }
    }
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        PollSettings {
            base_interval: Duration::from_millis(config.base_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms.max(config.base_interval_ms)),
            step: Duration::from_millis(config.step_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            max_error_backoff: Duration::from_millis(
                config.max_error_backoff_ms.max(config.error_backoff_ms),
            ),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
        }
    }
}

/// Playbook name keywords per provider, matched case-insensitively.
#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Keywords {
    site24x7: Vec<String>,
    antivirus: Vec<String>,
    baseline: Vec<String>,
}

impl Default for Keywords {
    fn default() -> Self {
        Self {
            site24x7: vec!["site24x7".into(), "24x7".into(), "site 24x7".into()],
            antivirus: vec![
                "antivirus".into(),
                "antivírus".into(),
                "trend".into(),
                "trendmicro".into(),
                "trend micro".into(),
            ],
            baseline: vec![
                "baseline".into(),
                "configuracao-base".into(),
                "configuração-base".into(),
            ],
        }
    }
}

/// Baseline password rules, hostname scheme and the per-host settings
/// already decided, keyed by host address.
#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BaselineConfig {
    min_password_length: usize,
    password_length: usize,
    hostname_prefix: String,
    hosts: BTreeMap<String, HostBaseline>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_password_length: 8,
            password_length: 15,
            hostname_prefix: "SKY-INT-SDL-".into(),
            hosts: BTreeMap::new(),
        }
    }
}

/// A named Site24x7 monitoring group and its device key.
#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site24x7Group {
    name: String,
    key: String,
}

impl Site24x7Group {
    pub fn new<S: Into<String>>(name: S, key: S) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
        }
    }
}

/// An installer script the backend already has on disk.
#[derive(Getters, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AntivirusScript {
    name: String,
    file: String,
    os: TargetOs,
}

impl AntivirusScript {
    pub fn new<S: Into<String>>(name: S, file: S, os: TargetOs) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            os,
        }
    }
}

fn default_antivirus_scripts() -> Vec<AntivirusScript> {
    vec![
        AntivirusScript::new("Default antivirus (Windows)", "antivirus.ps1", TargetOs::Windows),
        AntivirusScript::new("CTA antivirus (Windows)", "cta_antivirus.ps1", TargetOs::Windows),
        AntivirusScript::new("Praxio antivirus (Windows)", "praxio_antivirus.ps1", TargetOs::Windows),
        AntivirusScript::new("Trend Micro - Linux server", "trend_micro_linux_server.sh", TargetOs::Linux),
        AntivirusScript::new(
            "Trend Micro - Linux workstation",
            "trend_micro_linux_workstation.sh",
            TargetOs::Linux,
        ),
        AntivirusScript::new("Trend Micro - Oracle Linux", "trend_micro_oracle_linux.sh", TargetOs::Linux),
        AntivirusScript::new("Trend Micro - Ubuntu", "trend_micro_ubuntu.sh", TargetOs::Linux),
        AntivirusScript::new("CTA antivirus (Linux)", "cta_antivirus.sh", TargetOs::Linux),
    ]
}
