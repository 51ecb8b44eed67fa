use serde_json::Value;

use super::{ExtraVars, KeywordMatcher, PreExecutionProvider, ProviderError};
use crate::config::AntivirusScript;

/// Which installer the antivirus playbook should push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptChoice {
    /// A script already present on the backend, by file name.
    Catalog(String),
    /// A script supplied by the user.
    Custom { filename: String, content: String },
}

/// Injects the antivirus installer choice into antivirus playbooks.
#[derive(Debug, Clone)]
pub struct AntivirusProvider {
    matcher: KeywordMatcher,
    choice: ScriptChoice,
}

impl AntivirusProvider {
    pub fn new(matcher: KeywordMatcher, choice: ScriptChoice) -> Self {
        Self { matcher, choice }
    }

    /// Pick a script from `catalog` by file name.
    pub fn from_catalog(
        matcher: KeywordMatcher,
        catalog: &[AntivirusScript],
        file: &str,
    ) -> Result<Self, ProviderError> {
        let script = catalog
            .iter()
            .find(|script| script.file() == file)
            .ok_or_else(|| ProviderError::UnknownAntivirusScript(file.to_string()))?;
        Ok(Self::new(matcher, ScriptChoice::Catalog(script.file().clone())))
    }

    pub fn with_custom_script<S: Into<String>>(
        matcher: KeywordMatcher,
        filename: S,
        content: S,
    ) -> Self {
        Self::new(
            matcher,
            ScriptChoice::Custom {
                filename: filename.into(),
                content: content.into(),
            },
        )
    }

    pub fn choice(&self) -> &ScriptChoice {
        &self.choice
    }
}

impl PreExecutionProvider for AntivirusProvider {
    fn name(&self) -> &str {
        "antivirus"
    }

    fn applies_to(&self, playbook: &str) -> bool {
        self.matcher.matches(playbook)
    }

    fn validate(&self) -> Result<(), ProviderError> {
        match &self.choice {
            ScriptChoice::Catalog(file) if file.trim().is_empty() => {
                Err(ProviderError::EmptyScriptFilename)
            }
            ScriptChoice::Catalog(_) => Ok(()),
            ScriptChoice::Custom { filename, .. } if filename.trim().is_empty() => {
                Err(ProviderError::EmptyScriptFilename)
            }
            ScriptChoice::Custom { filename, content } if content.trim().is_empty() => {
                Err(ProviderError::EmptyScriptContent(filename.clone()))
            }
            ScriptChoice::Custom { .. } => Ok(()),
        }
    }

    fn contribute(&self, extra_vars: &mut ExtraVars) -> Result<String, ProviderError> {
        self.validate()?;
        match &self.choice {
            ScriptChoice::Catalog(file) => {
                extra_vars.insert("custom_script".into(), Value::Bool(false));
                extra_vars.insert("script_filename".into(), Value::String(file.trim().to_string()));
                Ok(format!("applying antivirus configuration: script {file}"))
            }
            ScriptChoice::Custom { filename, content } => {
                extra_vars.insert("custom_script".into(), Value::Bool(true));
                extra_vars.insert(
                    "script_filename".into(),
                    Value::String(filename.trim().to_string()),
                );
                extra_vars.insert("script_content".into(), Value::String(content.clone()));
                Ok(format!(
                    "applying antivirus configuration: custom script {filename} ({} bytes)",
                    content.len()
                ))
            }
        }
    }
}
