use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use tokio::fs;

use playwatch::config::Settings;
use playwatch::controller::ExecutionController;
use playwatch::inventory::is_valid_ipv4;
use playwatch::ipc::http::PlaybookInfo;
use playwatch::log::*;
use playwatch::providers::baseline::default_hostname;
use playwatch::providers::{
    AntivirusProvider, BaselineProvider, HostBaseline, KeywordMatcher, Site24x7Provider, TargetOs,
};

use super::jobs::follow_to_completion;
use super::playbooks::resolve_playbooks;
use super::{CliContext, Command, CommandErrors, Interactive};

const CUSTOM_KEY_CHOICE: &str = "Custom device key";

pub struct RunCommand;

impl<'a> Interactive<'a> for RunCommand {}

impl RunCommand {
    /// Site24x7 configuration, when any selected playbook needs one.
    fn site24x7_provider(
        &self,
        context: &CliContext<'_>,
        matches: &ArgMatches,
        playbooks: &[PlaybookInfo],
    ) -> Result<Option<Site24x7Provider>> {
        let settings = &context.settings;
        let matcher = KeywordMatcher::new(settings.keywords().site24x7());
        if !needs(&matcher, playbooks) {
            return Ok(None);
        }

        if let Some(key) = matches.get_one::<String>("device-key") {
            return Ok(Some(Site24x7Provider::with_custom_key(matcher, key.as_str())));
        }
        if let Some(group) = matches.get_one::<String>("site24x7-group") {
            return Ok(Some(Site24x7Provider::from_group(
                matcher,
                settings.site24x7_groups(),
                group,
            )?));
        }
        if context.is_interactive() {
            let mut choices: Vec<String> = settings
                .site24x7_groups()
                .iter()
                .map(|group| group.name().clone())
                .collect();
            choices.push(CUSTOM_KEY_CHOICE.to_string());
            let index = self.prompt_for_selection("Site24x7 group", &choices)?;
            return Ok(Some(match settings.site24x7_groups().get(index) {
                Some(group) => {
                    Site24x7Provider::from_group(matcher, settings.site24x7_groups(), group.name())?
                }
                None => {
                    let key = self.prompt_for_input_with_validator("Site24x7 device key", |input: &String| {
                        if input.trim().is_empty() {
                            Err(CommandErrors::InputValidationFailure(
                                "device-key".into(),
                                "must not be empty".into(),
                            ))
                        } else {
                            Ok(())
                        }
                    })?;
                    Site24x7Provider::with_custom_key(matcher, key)
                }
            }));
        }
        match settings.default_site24x7_key() {
            Some(key) => Ok(Some(Site24x7Provider::with_custom_key(matcher, key.as_str()))),
            None => Err(CommandErrors::RequiredUserInputMissing("site24x7-group or device-key".into()).into()),
        }
    }

    /// Antivirus configuration for the selected antivirus playbooks. Without
    /// an explicit choice, each target OS gets its own script.
    async fn antivirus_providers(
        &self,
        context: &CliContext<'_>,
        matches: &ArgMatches,
        playbooks: &[PlaybookInfo],
    ) -> Result<Vec<AntivirusProvider>> {
        let settings = &context.settings;
        let matcher = KeywordMatcher::new(settings.keywords().antivirus());
        let targets = antivirus_targets(&matcher, playbooks);
        if targets.is_empty() {
            return Ok(vec![]);
        }

        if let Some(path) = matches.get_one::<PathBuf>("custom-script") {
            let content = fs::read_to_string(path)
                .await
                .wrap_err_with(|| format!("Reading custom script {} failed", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(vec![AntivirusProvider::with_custom_script(matcher, filename, content)]);
        }
        if let Some(file) = matches.get_one::<String>("antivirus-script") {
            return Ok(vec![AntivirusProvider::from_catalog(
                matcher,
                settings.antivirus_scripts(),
                file,
            )?]);
        }

        let mut providers = Vec::with_capacity(targets.len());
        for (os, paths) in targets {
            let choice = if context.is_interactive() {
                let scripts = settings.antivirus_scripts_for(os);
                let labels: Vec<String> = scripts
                    .iter()
                    .map(|script| format!("{} ({})", script.name(), script.file()))
                    .collect();
                let prompt = format!("Antivirus script for {}", paths.join(", "));
                let index = self.prompt_for_selection(&prompt, &labels)?;
                scripts.get(index).map(|script| script.file().clone())
            } else {
                default_antivirus_file(settings, os)
            };
            let file = choice.ok_or_else(|| CommandErrors::RequiredUserInputMissing("antivirus-script".into()))?;
            debug!("antivirus script {file} for {os:?} playbooks {paths:?}");
            providers.push(AntivirusProvider::from_catalog(
                matcher.clone().limited_to(&paths),
                settings.antivirus_scripts(),
                &file,
            )?);
        }
        Ok(providers)
    }

    /// Baseline configuration for every selected host, when any selected
    /// playbook is a baseline. Hosts left without one block the launch.
    fn baseline_provider(
        &self,
        context: &CliContext<'_>,
        matches: &ArgMatches,
        playbooks: &[PlaybookInfo],
        hosts: &[String],
    ) -> Result<Option<BaselineProvider>> {
        let settings = &context.settings;
        let matcher = KeywordMatcher::new(settings.keywords().baseline());
        if !needs(&matcher, playbooks) {
            return Ok(None);
        }
        let config = settings.baseline();
        let min = *config.min_password_length();
        let mut provider = BaselineProvider::new(matcher, min);
        for (host, host_config) in config.hosts() {
            provider.set_host(host.as_str(), host_config.clone());
        }

        let hostnames = parse_hostnames(matches)?;
        let generate = matches.get_flag("generate-passwords");
        for (index, host) in hosts.iter().enumerate() {
            let known = provider.host(host).cloned();
            let configured = provider.is_configured(host);
            let hostname = match (hostnames.get(host), &known) {
                (Some(name), _) => name.clone(),
                (None, Some(known)) if !known.hostname().trim().is_empty() => known.hostname().clone(),
                (None, _) => {
                    let proposed = default_hostname(host, config.hostname_prefix(), index + 1);
                    if context.is_interactive() {
                        let prompt = format!("New hostname for {host}");
                        self.prompt_for_input_with_default(&prompt, proposed)?
                    } else {
                        proposed
                    }
                }
            };

            let host_config = match known {
                Some(known) if configured => HostBaseline::new(
                    hostname,
                    known.parceiro_password().clone(),
                    known.root_password().clone(),
                ),
                _ if generate => self.generated(host, hostname, *config.password_length()),
                _ if context.is_interactive() => {
                    if self.prompt_for_confirmation(&format!("Generate passwords for {host}?"))? {
                        self.generated(host, hostname, *config.password_length())
                    } else {
                        HostBaseline::new(
                            hostname,
                            self.prompt_for_password(&format!("parceiro password for {host}"), min)?,
                            self.prompt_for_password(&format!("root password for {host}"), min)?,
                        )
                    }
                }
                _ => continue,
            };
            provider.set_host(host.as_str(), host_config);
        }
        Ok(Some(provider))
    }

    fn generated(&self, host: &str, hostname: String, length: usize) -> HostBaseline {
        let config = HostBaseline::generated(hostname, length);
        println!(
            "* baseline {host}: parceiro password {} root password {}",
            config.parceiro_password(),
            config.root_password()
        );
        config
    }

    fn prompt_for_password(&self, message: &str, min: usize) -> Result<String> {
        loop {
            let password = self.prompt_for_secret(message)?;
            if password.chars().count() >= min {
                return Ok(password);
            }
            println!("* passwords need at least {min} characters.");
        }
    }
}

fn needs(matcher: &KeywordMatcher, playbooks: &[PlaybookInfo]) -> bool {
    playbooks.iter().any(|playbook| matcher.matches(&playbook.path))
}

/// Antivirus playbook paths grouped by target OS, in selection order.
fn antivirus_targets(matcher: &KeywordMatcher, playbooks: &[PlaybookInfo]) -> Vec<(TargetOs, Vec<String>)> {
    let mut targets: Vec<(TargetOs, Vec<String>)> = vec![];
    for playbook in playbooks.iter().filter(|playbook| matcher.matches(&playbook.path)) {
        let os = TargetOs::detect(&playbook.path, playbook.os.as_deref());
        match targets.iter_mut().find(|(target, _)| *target == os) {
            Some((_, paths)) => paths.push(playbook.path.clone()),
            None => targets.push((os, vec![playbook.path.clone()])),
        }
    }
    targets
}

fn default_antivirus_file(settings: &Settings, os: TargetOs) -> Option<String> {
    settings
        .default_antivirus_script_for(os)
        .map(|script| script.file().clone())
}

/// `--baseline-hostname HOST=NAME` values.
fn parse_hostnames(matches: &ArgMatches) -> Result<HashMap<String, String>, CommandErrors> {
    let mut hostnames = HashMap::new();
    for value in matches
        .get_many::<String>("baseline-hostname")
        .into_iter()
        .flatten()
    {
        match value.split_once('=') {
            Some((host, name)) if !host.trim().is_empty() && !name.trim().is_empty() => {
                hostnames.insert(host.trim().to_string(), name.trim().to_string());
            }
            _ => {
                return Err(CommandErrors::InputValidationFailure(
                    "baseline-hostname".into(),
                    format!("expected HOST=NAME, got `{value}`"),
                ))
            }
        }
    }
    Ok(hostnames)
}

fn validate_hosts(hosts: &[String]) -> Result<(), CommandErrors> {
    match hosts.iter().find(|host| !is_valid_ipv4(host)) {
        Some(host) => Err(CommandErrors::InputValidationFailure(
            "host".into(),
            format!("`{host}` is not a valid IPv4 address"),
        )),
        None => Ok(()),
    }
}

#[async_trait]
impl<'a> Command<'a> for RunCommand {
    fn new() -> Self {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        let matches = context.matches;
        let requested = self.read_arguments(matches, "playbook")?;
        let hosts = self.read_arguments(matches, "host")?;
        validate_hosts(&hosts)?;

        let playbooks = resolve_playbooks(context, &requested).await?;
        let mut controller = ExecutionController::new(context.api.clone());
        if let Some(provider) = self.site24x7_provider(context, matches, &playbooks)? {
            controller.add_provider(Box::new(provider));
        }
        for provider in self.antivirus_providers(context, matches, &playbooks).await? {
            controller.add_provider(Box::new(provider));
        }
        if let Some(provider) = self.baseline_provider(context, matches, &playbooks, &hosts)? {
            controller.add_provider(Box::new(provider));
        }

        let paths: Vec<String> = playbooks.iter().map(|p| p.path.clone()).collect();
        let launched = controller
            .launch(&paths, &hosts)
            .await
            .wrap_err("Starting playbooks failed")?;
        for job in &launched {
            for notice in &job.notices {
                println!("* {notice}");
            }
            println!(
                "* started {} on {} as job {}",
                job.playbook,
                job.hosts.join(", "),
                job.job_id
            );
        }

        if matches.get_flag("no-watch") {
            return Ok(());
        }
        let job_ids: Vec<String> = launched.into_iter().map(|job| job.job_id).collect();
        follow_to_completion(context, &job_ids, matches.get_flag("raw")).await
    }
}

#[cfg(test)]
mod tests {
    use clap::{command, Arg, ArgAction};
    use playwatch::providers::playbook_file_name;

    use super::*;

    fn playbook(path: &str) -> PlaybookInfo {
        PlaybookInfo {
            name: playbook_file_name(path).to_string(),
            path: path.to_string(),
            category: None,
            os: None,
            description: None,
        }
    }

    #[test]
    fn test_provider_need_is_detected_from_file_names() {
        let settings = Settings::default();
        let matcher = KeywordMatcher::new(settings.keywords().site24x7());
        assert!(needs(&matcher, &[playbook("playbooks/agents/Site24x7.yml"), playbook("a.yml")]));
        // Directory names do not count.
        assert!(!needs(&matcher, &[playbook("site24x7/baseline.yml")]));
    }

    #[test]
    fn test_hosts_must_be_ipv4() {
        assert!(validate_hosts(&["10.0.0.1".to_string()]).is_ok());
        assert!(validate_hosts(&["10.0.0.1".to_string(), "web01".to_string()]).is_err());
    }

    #[test]
    fn test_linux_antivirus_playbook_gets_a_linux_script() {
        let settings = Settings::default();
        let matcher = KeywordMatcher::new(settings.keywords().antivirus());
        let targets = antivirus_targets(&matcher, &[playbook("playbooks/linux/trend.yml")]);
        assert_eq!(vec![(TargetOs::Linux, vec!["playbooks/linux/trend.yml".to_string()])], targets);
        let file = default_antivirus_file(&settings, TargetOs::Linux).expect("linux script");
        assert!(file.ends_with(".sh"), "{file}");
    }

    #[test]
    fn test_mixed_selection_gets_one_script_per_os() {
        let settings = Settings::default();
        let matcher = KeywordMatcher::new(settings.keywords().antivirus());
        let targets = antivirus_targets(
            &matcher,
            &[
                playbook("playbooks/windows/antivirus.yml"),
                playbook("playbooks/linux/antivirus.yml"),
                playbook("playbooks/linux/baseline.yml"),
                playbook("playbooks/windows/trend_micro.yml"),
            ],
        );
        assert_eq!(2, targets.len());
        assert_eq!(TargetOs::Windows, targets[0].0);
        assert_eq!(2, targets[0].1.len());
        assert_eq!(TargetOs::Linux, targets[1].0);

        let linux = KeywordMatcher::new(settings.keywords().antivirus()).limited_to(&targets[1].1);
        assert!(linux.matches("playbooks/linux/antivirus.yml"));
        assert!(!linux.matches("playbooks/windows/antivirus.yml"));
    }

    #[test]
    fn test_baseline_hostnames_are_parsed() {
        let cmd = command!().arg(
            Arg::new("baseline-hostname")
                .long("baseline-hostname")
                .action(ArgAction::Append),
        );
        let matches = cmd
            .clone()
            .get_matches_from(["playwatch", "--baseline-hostname", "10.0.0.1 = SRV-01"]);
        let hostnames = parse_hostnames(&matches).expect("valid");
        assert_eq!(Some(&"SRV-01".to_string()), hostnames.get("10.0.0.1"));

        let matches = cmd.get_matches_from(["playwatch", "--baseline-hostname", "10.0.0.1"]);
        assert!(parse_hostnames(&matches).is_err());
    }
}
