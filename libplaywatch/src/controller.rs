//! Starting playbooks.
//!
//! The [`ExecutionController`] runs every applicable
//! [`PreExecutionProvider`] against each selected playbook before anything
//! is sent. Only when every playbook's configuration validates are the
//! `/api/run` requests issued. A playbook with a per-host provider is
//! started once per host, each run tagged with `host_specific` when the
//! selection had more than one host.

use std::sync::Arc;

use serde_json::Value;

use crate::client::{ApiError, ConsoleApi};
use crate::ipc::http::{ExtraVars, RunRequest};
use crate::log::*;
use crate::providers::{PreExecutionProvider, ProviderError};

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("no hosts selected")]
    NoHosts,
    #[error("no playbooks selected")]
    NoPlaybooks,
    #[error("{provider} configuration for {playbook} is invalid")]
    Provider {
        provider: String,
        playbook: String,
        #[source]
        source: ProviderError,
    },
    #[error("could not start {playbook}")]
    Api {
        playbook: String,
        #[source]
        source: ApiError,
    },
}

/// A run request with every provider's variables merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRun {
    pub request: RunRequest,
    pub notices: Vec<String>,
}

impl PreparedRun {
    fn new(playbook: &str, hosts: Vec<String>, extra_vars: ExtraVars, notices: Vec<String>) -> Self {
        Self {
            request: RunRequest {
                playbook: playbook.to_string(),
                hosts,
                extra_vars: (!extra_vars.is_empty()).then_some(extra_vars),
            },
            notices,
        }
    }
}

fn invalid(provider: &dyn PreExecutionProvider, playbook: &str, source: ProviderError) -> LaunchError {
    LaunchError::Provider {
        provider: provider.name().to_string(),
        playbook: playbook.to_string(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedJob {
    pub job_id: String,
    pub playbook: String,
    pub hosts: Vec<String>,
    pub notices: Vec<String>,
}

#[derive(Debug)]
pub struct ExecutionController<A: ConsoleApi + ?Sized> {
    api: Arc<A>,
    providers: Vec<Box<dyn PreExecutionProvider>>,
}

impl<A: ConsoleApi + ?Sized> ExecutionController<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            providers: vec![],
        }
    }

    pub fn with_provider<P: PreExecutionProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn add_provider(&mut self, provider: Box<dyn PreExecutionProvider>) {
        self.providers.push(provider);
    }

    /// Providers that have something to add for `playbook`.
    pub fn providers_for<'a>(
        &'a self,
        playbook: &'a str,
    ) -> impl Iterator<Item = &'a dyn PreExecutionProvider> + 'a {
        self.providers
            .iter()
            .map(|provider| provider.as_ref())
            .filter(move |provider| provider.applies_to(playbook))
    }

    /// Build the requests for one playbook: a single one for all hosts, or
    /// one per host when a per-host provider applies. Nothing is sent.
    pub fn prepare(&self, playbook: &str, hosts: &[String]) -> Result<Vec<PreparedRun>, LaunchError> {
        if hosts.is_empty() {
            return Err(LaunchError::NoHosts);
        }
        let providers: Vec<_> = self.providers_for(playbook).collect();
        let mut shared = ExtraVars::new();
        let mut notices = vec![];
        for provider in &providers {
            let wrap = |source| invalid(*provider, playbook, source);
            provider.validate().map_err(wrap)?;
            provider.validate_hosts(hosts).map_err(wrap)?;
            notices.push(provider.contribute(&mut shared).map_err(wrap)?);
        }

        if !providers.iter().any(|provider| provider.per_host()) {
            return Ok(vec![PreparedRun::new(playbook, hosts.to_vec(), shared, notices)]);
        }
        let split = hosts.len() > 1;
        let mut runs = Vec::with_capacity(hosts.len());
        for host in hosts {
            let mut extra_vars = shared.clone();
            let mut notices = notices.clone();
            for provider in &providers {
                if let Some(notice) = provider
                    .contribute_host(host, &mut extra_vars)
                    .map_err(|source| invalid(*provider, playbook, source))?
                {
                    notices.push(notice);
                }
            }
            if split {
                extra_vars.insert("single_host_execution".into(), Value::Bool(true));
                extra_vars.insert("host_specific".into(), Value::String(host.clone()));
            }
            runs.push(PreparedRun::new(playbook, vec![host.clone()], extra_vars, notices));
        }
        debug!("launch: {playbook} split into {} per-host runs", runs.len());
        Ok(runs)
    }

    /// Validate and start every playbook on `hosts`. If any playbook's
    /// configuration is invalid, no job is started.
    #[tracing::instrument(skip(self))]
    pub async fn launch(
        &self,
        playbooks: &[String],
        hosts: &[String],
    ) -> Result<Vec<LaunchedJob>, LaunchError> {
        if playbooks.is_empty() {
            return Err(LaunchError::NoPlaybooks);
        }
        let mut prepared = vec![];
        for playbook in playbooks {
            prepared.extend(self.prepare(playbook, hosts)?);
        }

        let mut launched = Vec::with_capacity(prepared.len());
        for PreparedRun { request, notices } in prepared {
            for notice in &notices {
                info!("launch: {notice}");
            }
            let response = self
                .api
                .run(&request)
                .await
                .map_err(|source| LaunchError::Api {
                    playbook: request.playbook.clone(),
                    source,
                })?;
            info!("launch: started {} as job {}", request.playbook, response.job_id);
            let hosts = if response.hosts.is_empty() {
                request.hosts
            } else {
                response.hosts
            };
            launched.push(LaunchedJob {
                job_id: response.job_id,
                playbook: request.playbook,
                hosts,
                notices,
            });
        }
        Ok(launched)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::ipc::http::{CancelResponse, PlaybookInfo, RunResponse, StatusResponse};
    use crate::providers::{
        AntivirusProvider, BaselineProvider, HostBaseline, KeywordMatcher, Site24x7Provider,
    };

    #[derive(Debug, Default)]
    struct RecordingApi {
        runs: Mutex<Vec<RunRequest>>,
    }

    #[async_trait]
    impl ConsoleApi for RecordingApi {
        async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, ApiError> {
            Ok(vec![])
        }

        async fn run(&self, request: &RunRequest) -> Result<RunResponse, ApiError> {
            let mut runs = self.runs.lock().unwrap();
            runs.push(request.clone());
            Ok(RunResponse {
                job_id: format!("job-{}", runs.len()),
                hosts: vec![],
            })
        }

        async fn status(&self, _job_id: &str) -> Result<StatusResponse, ApiError> {
            unreachable!("the controller never polls")
        }

        async fn cancel(&self, _job_id: &str) -> Result<CancelResponse, ApiError> {
            Ok(CancelResponse { success: true })
        }
    }

    fn hosts() -> Vec<String> {
        vec!["10.0.0.1".into(), "10.0.0.2".into()]
    }

    fn controller(api: Arc<RecordingApi>, device_key: &str) -> ExecutionController<RecordingApi> {
        ExecutionController::new(api)
            .with_provider(Site24x7Provider::with_custom_key(
                KeywordMatcher::new(["site24x7"]),
                device_key,
            ))
            .with_provider(AntivirusProvider::with_custom_script(
                KeywordMatcher::new(["antivirus"]),
                "av.sh",
                "echo install",
            ))
    }

    #[tokio::test]
    async fn test_providers_only_touch_matching_playbooks() -> color_eyre::eyre::Result<()> {
        let api = Arc::new(RecordingApi::default());
        let controller = controller(api.clone(), "us_key_123456789");
        let playbooks = vec![
            "playbooks/linux/agents/site24x7.yml".to_string(),
            "playbooks/linux/baseline.yml".to_string(),
        ];
        let launched = controller.launch(&playbooks, &hosts()).await?;

        assert_eq!(2, launched.len());
        assert_eq!("job-1", launched[0].job_id);
        assert_eq!(hosts(), launched[0].hosts);
        assert_eq!(1, launched[0].notices.len());
        assert!(launched[1].notices.is_empty());

        let runs = api.runs.lock().unwrap();
        let vars = runs[0].extra_vars.as_ref().expect("site24x7 vars");
        assert_eq!(Some(&Value::String("us_key_123456789".into())), vars.get("device_key"));
        assert!(vars.get("custom_script").is_none());
        assert!(runs[1].extra_vars.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_configuration_sends_nothing() {
        let api = Arc::new(RecordingApi::default());
        let controller = controller(api.clone(), "  ");
        let playbooks = vec![
            "baseline.yml".to_string(),
            "install_site24x7.yml".to_string(),
        ];
        let err = controller.launch(&playbooks, &hosts()).await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Provider {
                source: ProviderError::EmptyDeviceKey,
                ..
            }
        ));
        assert!(api.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_selection_is_rejected() {
        let api = Arc::new(RecordingApi::default());
        let controller = controller(api.clone(), "key");
        assert!(matches!(
            controller.launch(&[], &hosts()).await,
            Err(LaunchError::NoPlaybooks)
        ));
        assert!(matches!(
            controller.launch(&["x.yml".to_string()], &[]).await,
            Err(LaunchError::NoHosts)
        ));
        assert!(api.runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_prepare_merges_every_applicable_provider() -> color_eyre::eyre::Result<()> {
        let api = Arc::new(RecordingApi::default());
        let controller = controller(api, "key-abc");
        let mut prepared = controller.prepare("site24x7_and_antivirus.yml", &hosts())?;
        assert_eq!(1, prepared.len());
        let prepared = prepared.remove(0);
        assert_eq!(hosts(), prepared.request.hosts);
        let vars = prepared.request.extra_vars.expect("vars");
        assert!(vars.contains_key("device_key"));
        assert_eq!(Some(&Value::Bool(true)), vars.get("custom_script"));
        assert_eq!(2, prepared.notices.len());
        Ok(())
    }

    fn baseline(configured: &[&str]) -> BaselineProvider {
        let mut provider = BaselineProvider::new(KeywordMatcher::new(["baseline"]), 8);
        for (index, host) in configured.iter().enumerate() {
            provider.set_host(*host, HostBaseline::generated(format!("SRV-0{index}"), 15));
        }
        provider
    }

    #[tokio::test]
    async fn test_unconfigured_baseline_hosts_block_every_launch() {
        let api = Arc::new(RecordingApi::default());
        let controller = ExecutionController::new(api.clone()).with_provider(baseline(&["10.0.0.1"]));
        let playbooks = vec!["agents.yml".to_string(), "linux/baseline.yml".to_string()];
        let err = controller.launch(&playbooks, &hosts()).await.unwrap_err();
        match err {
            LaunchError::Provider {
                provider,
                source: ProviderError::UnconfiguredHosts(missing),
                ..
            } => {
                assert_eq!("baseline", provider);
                assert_eq!(vec!["10.0.0.2".to_string()], missing);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(api.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_baseline_runs_once_per_host() -> color_eyre::eyre::Result<()> {
        let api = Arc::new(RecordingApi::default());
        let controller = ExecutionController::new(api.clone())
            .with_provider(baseline(&["10.0.0.1", "10.0.0.2"]))
            .with_provider(Site24x7Provider::with_custom_key(
                KeywordMatcher::new(["site24x7"]),
                "us_key_123456789",
            ));
        let playbooks = vec!["baseline_site24x7.yml".to_string(), "other.yml".to_string()];
        let launched = controller.launch(&playbooks, &hosts()).await?;

        assert_eq!(3, launched.len());
        assert_eq!(vec!["10.0.0.1".to_string()], launched[0].hosts);
        assert_eq!(vec!["10.0.0.2".to_string()], launched[1].hosts);
        assert_eq!(hosts(), launched[2].hosts);

        let runs = api.runs.lock().unwrap();
        for (run, host) in runs.iter().zip(hosts()) {
            let vars = run.extra_vars.as_ref().expect("baseline vars");
            assert_eq!(Some(&Value::String(host.clone())), vars.get("host_specific"));
            assert_eq!(Some(&Value::Bool(true)), vars.get("single_host_execution"));
            assert!(vars.contains_key("new_hostname"));
            assert!(vars.contains_key("device_key"));
        }
        assert_ne!(
            runs[0].extra_vars.as_ref().and_then(|v| v.get("root_password")),
            runs[1].extra_vars.as_ref().and_then(|v| v.get("root_password"))
        );
        assert!(runs[2].extra_vars.is_none());
        Ok(())
    }

    #[test]
    fn test_single_baseline_host_is_not_tagged() -> color_eyre::eyre::Result<()> {
        let controller = ExecutionController::new(Arc::new(RecordingApi::default())).with_provider(baseline(&["10.0.0.1"]));
        let prepared = controller.prepare("baseline.yml", &["10.0.0.1".to_string()])?;
        assert_eq!(1, prepared.len());
        let vars = prepared[0].request.extra_vars.as_ref().expect("vars");
        assert_eq!(Some(&Value::String("SRV-00".into())), vars.get("new_hostname"));
        assert!(!vars.contains_key("host_specific"));
        Ok(())
    }
}
