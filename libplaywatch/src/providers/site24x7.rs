use serde_json::Value;

use super::{ExtraVars, KeywordMatcher, PreExecutionProvider, ProviderError};
use crate::config::Site24x7Group;

/// Where the device key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKeySource {
    Group { name: String, key: String },
    Custom(String),
}

/// Injects `device_key` into Site24x7 agent playbooks.
#[derive(Debug, Clone)]
pub struct Site24x7Provider {
    matcher: KeywordMatcher,
    source: DeviceKeySource,
}

impl Site24x7Provider {
    pub fn new(matcher: KeywordMatcher, source: DeviceKeySource) -> Self {
        Self { matcher, source }
    }

    /// Use the key of the named group from `groups`.
    pub fn from_group(
        matcher: KeywordMatcher,
        groups: &[Site24x7Group],
        name: &str,
    ) -> Result<Self, ProviderError> {
        let group = groups
            .iter()
            .find(|group| group.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| ProviderError::UnknownSite24x7Group(name.to_string()))?;
        Ok(Self::new(
            matcher,
            DeviceKeySource::Group {
                name: group.name().clone(),
                key: group.key().clone(),
            },
        ))
    }

    pub fn with_custom_key<S: Into<String>>(matcher: KeywordMatcher, key: S) -> Self {
        Self::new(matcher, DeviceKeySource::Custom(key.into()))
    }

    pub fn device_key(&self) -> &str {
        match &self.source {
            DeviceKeySource::Group { key, .. } => key.trim(),
            DeviceKeySource::Custom(key) => key.trim(),
        }
    }
}

impl PreExecutionProvider for Site24x7Provider {
    fn name(&self) -> &str {
        "site24x7"
    }

    fn applies_to(&self, playbook: &str) -> bool {
        self.matcher.matches(playbook)
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.device_key().is_empty() {
            Err(ProviderError::EmptyDeviceKey)
        } else {
            Ok(())
        }
    }

    fn contribute(&self, extra_vars: &mut ExtraVars) -> Result<String, ProviderError> {
        self.validate()?;
        let key = self.device_key();
        extra_vars.insert("device_key".into(), Value::String(key.to_string()));
        // Never echo a full key.
        let shown: String = key.chars().take(8).collect();
        Ok(match &self.source {
            DeviceKeySource::Group { name, .. } => {
                format!("applying Site24x7 configuration: group {name} (key {shown}...)")
            }
            DeviceKeySource::Custom(_) => {
                format!("applying Site24x7 configuration: custom key {shown}...")
            }
        })
    }
}
