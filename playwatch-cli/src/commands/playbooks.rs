use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Report, Result, WrapErr};

use playwatch::client::ConsoleApi;
use playwatch::ipc::http::PlaybookInfo;
use playwatch::log::*;
use playwatch::providers::TargetOs;

use super::{CliContext, Command, CommandErrors};

pub struct PlaybooksCommand;

impl PlaybooksCommand {
    async fn subcommand_list(&self, context: &CliContext<'_>, _matches: &ArgMatches) -> Result<()> {
        let playbooks = context
            .api
            .playbooks()
            .await
            .wrap_err("Fetching playbooks failed")?;
        info!("backend offers {} playbooks", playbooks.len());
        if playbooks.is_empty() {
            println!("* no playbooks available.");
            return Ok(());
        }
        println!("* playbooks:");
        for playbook in &playbooks {
            println!("{}", describe(playbook));
        }
        Ok(())
    }
}

fn describe(playbook: &PlaybookInfo) -> String {
    let os = match TargetOs::detect(&playbook.path, playbook.os.as_deref()) {
        TargetOs::Windows => "windows",
        TargetOs::Linux => "linux",
        TargetOs::Unknown => "any",
    };
    let mut line = format!("** {} ({}, {})", playbook.name, os, playbook.path);
    if let Some(category) = &playbook.category {
        line.push_str(&format!(" [{category}]"));
    }
    if let Some(description) = playbook.description.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(&format!(": {description}"));
    }
    line
}

/// Resolve user-supplied playbook names or paths against the backend's list.
pub async fn resolve_playbooks(
    context: &CliContext<'_>,
    requested: &[String],
) -> Result<Vec<PlaybookInfo>> {
    let available = context
        .api
        .playbooks()
        .await
        .wrap_err("Fetching playbooks failed")?;
    requested
        .iter()
        .map(|wanted| {
            available
                .iter()
                .find(|p| &p.path == wanted || &p.name == wanted)
                .cloned()
                .ok_or_else(|| Report::from(CommandErrors::UnknownPlaybook(wanted.clone())))
        })
        .collect()
}

#[async_trait]
impl<'a> Command<'a> for PlaybooksCommand {
    fn new() -> Self {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        match context.matches.subcommand() {
            Some(("list", matches)) => self.subcommand_list(context, matches).await,
            Some((name, _)) => Err(CommandErrors::InvalidSubcommand(name.into()).into()),
            None => Err(CommandErrors::NoSubcommandProvided.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_playbook() {
        let playbook = PlaybookInfo {
            name: "Site24x7 agent".into(),
            path: "playbooks/windows/agents/site24x7.yml".into(),
            category: Some("agents".into()),
            os: None,
            description: Some(String::new()),
        };
        assert_eq!(
            "** Site24x7 agent (windows, playbooks/windows/agents/site24x7.yml) [agents]",
            describe(&playbook)
        );
    }
}
