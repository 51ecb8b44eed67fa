//! Pre-execution configuration providers.
//!
//! Some playbooks need extra variables before they can run: a Site24x7
//! device key, the antivirus installer to push, or a baseline host's new
//! hostname and passwords. A provider decides from the playbook's file name
//! whether it applies, validates the choices it holds, and contributes its
//! `extra_vars`. Providers with per-host settings make the playbook start
//! once per host. The
//! [`ExecutionController`](crate::controller::ExecutionController) composes
//! any number of them.

use serde::{Deserialize, Serialize};

pub use crate::ipc::http::ExtraVars;

use std::collections::HashSet;

pub mod antivirus;
pub mod baseline;
pub mod site24x7;

pub use antivirus::{AntivirusProvider, ScriptChoice};
pub use baseline::{generate_password, BaselineProvider, HostBaseline};
pub use site24x7::{DeviceKeySource, Site24x7Provider};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ProviderError {
    #[error("the Site24x7 device key is empty")]
    EmptyDeviceKey,
    #[error("unknown Site24x7 group `{0}`")]
    UnknownSite24x7Group(String),
    #[error("the antivirus script file name is empty")]
    EmptyScriptFilename,
    #[error("the custom antivirus script `{0}` has no content")]
    EmptyScriptContent(String),
    #[error("unknown antivirus script `{0}`")]
    UnknownAntivirusScript(String),
    #[error("baseline configuration missing for {}", .0.join(", "))]
    UnconfiguredHosts(Vec<String>),
    #[error("the new hostname for {0} is empty")]
    EmptyHostname(String),
}

/// Something that has to run before a matching playbook is started.
pub trait PreExecutionProvider: Send + Sync + std::fmt::Debug {
    /// Human-readable name, used in logs and error reports.
    fn name(&self) -> &str;

    /// Whether this provider has anything to add for the playbook at
    /// `playbook`.
    fn applies_to(&self, playbook: &str) -> bool;

    /// Reject unusable input before any request is sent.
    fn validate(&self) -> Result<(), ProviderError>;

    /// Add this provider's variables. Returns a notice describing what was
    /// applied.
    fn contribute(&self, extra_vars: &mut ExtraVars) -> Result<String, ProviderError>;

    /// Reject a host selection this provider cannot serve.
    fn validate_hosts(&self, _hosts: &[String]) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Whether a matching playbook has to be started separately on each
    /// host.
    fn per_host(&self) -> bool {
        false
    }

    /// Add the variables specific to `host`, for a run on that host alone.
    fn contribute_host(
        &self,
        _host: &str,
        _extra_vars: &mut ExtraVars,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

/// Case-insensitive substring matching of a playbook's file name against a
/// configurable keyword list, optionally narrowed down to a set of playbook
/// paths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
    only: Option<HashSet<String>>,
}

impl KeywordMatcher {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            only: None,
        }
    }

    /// Only match the given playbook paths, compared case-insensitively.
    pub fn limited_to<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.only = Some(
            names
                .into_iter()
                .map(|name| name.as_ref().to_lowercase())
                .collect(),
        );
        self
    }

    /// Whether the playbook at `path` matches. Directory names never count.
    pub fn matches(&self, path: &str) -> bool {
        let allowed = self
            .only
            .as_ref()
            .map_or(true, |only| only.contains(&path.to_lowercase()));
        let name = playbook_file_name(path).to_lowercase();
        allowed && self.keywords.iter().any(|keyword| name.contains(keyword))
    }
}

/// Operating system a playbook or script targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Windows,
    Linux,
    #[default]
    #[serde(other)]
    Unknown,
}

impl TargetOs {
    /// Guess from a playbook name or path, falling back to the OS the
    /// backend reports for the playbook, if any.
    pub fn detect(name: &str, reported: Option<&str>) -> Self {
        let name = name.to_lowercase();
        if name.contains("windows") || name.contains(".ps1") {
            return TargetOs::Windows;
        }
        if name.contains("linux") || name.contains(".sh") {
            return TargetOs::Linux;
        }
        match reported.map(str::to_lowercase) {
            Some(os) if os.contains("windows") => TargetOs::Windows,
            Some(os) if os.contains("linux") => TargetOs::Linux,
            _ => TargetOs::Unknown,
        }
    }
}

/// File name part of a playbook path.
pub fn playbook_file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        let matcher = KeywordMatcher::new(["Site24x7", "24x7", " "]);
        assert!(matcher.matches("install_SITE24X7_agent.yml"));
        assert!(matcher.matches("agent-24x7.yml"));
        assert!(!matcher.matches("baseline.yml"));
        assert!(!KeywordMatcher::default().matches("anything"));
    }

    #[test]
    fn test_limited_matcher_only_takes_listed_playbooks() {
        let matcher = KeywordMatcher::new(["trend"]).limited_to(["Trend_Linux.yml"]);
        assert!(matcher.matches("trend_linux.yml"));
        assert!(!matcher.matches("trend_windows.yml"));
        assert!(!KeywordMatcher::new(["trend"]).limited_to(["site24x7.yml"]).matches("site24x7.yml"));

        let linux = KeywordMatcher::new(["antivirus"]).limited_to(["playbooks/linux/antivirus.yml"]);
        assert!(linux.matches("playbooks/linux/antivirus.yml"));
        assert!(!linux.matches("playbooks/windows/antivirus.yml"));
        assert!(!KeywordMatcher::new(["linux"]).matches("playbooks/linux/antivirus.yml"));
    }

    #[test]
    fn test_os_detection() {
        assert_eq!(TargetOs::Windows, TargetOs::detect("playbooks/windows/agents/av.yml", None));
        assert_eq!(TargetOs::Linux, TargetOs::detect("install.sh", None));
        assert_eq!(TargetOs::Linux, TargetOs::detect("trend.yml", Some("Linux")));
        assert_eq!(TargetOs::Unknown, TargetOs::detect("trend.yml", Some("all")));
    }

    #[test]
    fn test_playbook_file_name() {
        assert_eq!("site24x7.yml", playbook_file_name("/srv/playbooks/linux/agents/site24x7.yml"));
        assert_eq!("plain.yml", playbook_file_name("plain.yml"));
    }
}
