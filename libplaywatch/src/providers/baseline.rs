use std::collections::BTreeMap;

use derive_getters::Getters;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ExtraVars, KeywordMatcher, PreExecutionProvider, ProviderError};

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()_-+=";

/// New hostname and account passwords for one host.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBaseline {
    hostname: String,
    parceiro_password: String,
    root_password: String,
}

impl HostBaseline {
    pub fn new<S: Into<String>>(hostname: S, parceiro_password: S, root_password: S) -> Self {
        Self {
            hostname: hostname.into(),
            parceiro_password: parceiro_password.into(),
            root_password: root_password.into(),
        }
    }

    /// Fresh passwords of `length` characters for `hostname`.
    pub fn generated<S: Into<String>>(hostname: S, length: usize) -> Self {
        Self {
            hostname: hostname.into(),
            parceiro_password: generate_password(length),
            root_password: generate_password(length),
        }
    }

    fn is_complete(&self, min_password_length: usize) -> bool {
        !self.hostname.trim().is_empty()
            && self.parceiro_password.chars().count() >= min_password_length
            && self.root_password.chars().count() >= min_password_length
    }
}

/// A random password with at least one upper-case letter, lower-case letter,
/// digit and symbol. Never shorter than four characters.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let classes = [UPPER, LOWER, DIGITS, SPECIAL];
    let all = classes.concat();
    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    chars.extend((classes.len()..length).map(|_| all[rng.gen_range(0..all.len())]));
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// Hostname proposed for the `ordinal`th host being baselined. Hosts already
/// named with `prefix` keep their name.
pub fn default_hostname(current: &str, prefix: &str, ordinal: usize) -> String {
    if current.starts_with(prefix) {
        current.to_string()
    } else {
        format!("{prefix}0{ordinal}")
    }
}

/// Renames hosts and resets their `parceiro` and `root` passwords. Every
/// selected host needs its own configuration, so the playbook runs once per
/// host.
#[derive(Debug, Clone)]
pub struct BaselineProvider {
    matcher: KeywordMatcher,
    hosts: BTreeMap<String, HostBaseline>,
    min_password_length: usize,
}

impl BaselineProvider {
    pub fn new(matcher: KeywordMatcher, min_password_length: usize) -> Self {
        Self {
            matcher,
            hosts: BTreeMap::new(),
            min_password_length,
        }
    }

    pub fn with_host<S: Into<String>>(mut self, host: S, config: HostBaseline) -> Self {
        self.set_host(host, config);
        self
    }

    pub fn set_host<S: Into<String>>(&mut self, host: S, config: HostBaseline) {
        self.hosts.insert(host.into(), config);
    }

    pub fn host(&self, host: &str) -> Option<&HostBaseline> {
        self.hosts.get(host)
    }

    /// Whether `host` has a hostname and long enough passwords.
    pub fn is_configured(&self, host: &str) -> bool {
        self.hosts
            .get(host)
            .is_some_and(|config| config.is_complete(self.min_password_length))
    }

    /// The hosts of `hosts` that still need a configuration, in order.
    pub fn unconfigured<'a>(&self, hosts: &'a [String]) -> Vec<&'a String> {
        hosts.iter().filter(|host| !self.is_configured(host)).collect()
    }
}

impl PreExecutionProvider for BaselineProvider {
    fn name(&self) -> &str {
        "baseline"
    }

    fn applies_to(&self, playbook: &str) -> bool {
        self.matcher.matches(playbook)
    }

    fn validate(&self) -> Result<(), ProviderError> {
        match self
            .hosts
            .iter()
            .find(|(_, config)| config.hostname.trim().is_empty())
        {
            Some((host, _)) => Err(ProviderError::EmptyHostname(host.clone())),
            None => Ok(()),
        }
    }

    fn validate_hosts(&self, hosts: &[String]) -> Result<(), ProviderError> {
        let missing = self.unconfigured(hosts);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::UnconfiguredHosts(
                missing.into_iter().cloned().collect(),
            ))
        }
    }

    fn contribute(&self, _extra_vars: &mut ExtraVars) -> Result<String, ProviderError> {
        Ok(format!(
            "applying baseline configuration: one run per host, passwords of at least {} characters",
            self.min_password_length
        ))
    }

    fn per_host(&self) -> bool {
        true
    }

    fn contribute_host(
        &self,
        host: &str,
        extra_vars: &mut ExtraVars,
    ) -> Result<Option<String>, ProviderError> {
        let config = self
            .hosts
            .get(host)
            .filter(|config| config.is_complete(self.min_password_length))
            .ok_or_else(|| ProviderError::UnconfiguredHosts(vec![host.to_string()]))?;
        let hostname = config.hostname.trim();
        extra_vars.insert("new_hostname".into(), Value::String(hostname.to_string()));
        extra_vars.insert(
            "parceiro_password".into(),
            Value::String(config.parceiro_password.clone()),
        );
        extra_vars.insert("root_password".into(), Value::String(config.root_password.clone()));
        // Windows playbooks read the same passwords under these names.
        extra_vars.insert("user_password".into(), Value::String(config.parceiro_password.clone()));
        extra_vars.insert("admin_password".into(), Value::String(config.root_password.clone()));
        Ok(Some(format!("baseline: {host} becomes {hostname}")))
    }
}
