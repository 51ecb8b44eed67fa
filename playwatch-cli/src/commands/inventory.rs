use std::path::PathBuf;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use tokio::fs;

use playwatch::inventory::{is_valid_ipv4, InventoryManager};
use playwatch::ipc::http::{AddServerRequest, ServerEntry};
use playwatch::log::*;

use super::{CliContext, Command, CommandErrors, Interactive};

pub struct InventoryCommand;

impl<'a> Interactive<'a> for InventoryCommand {}

fn host_validator(input: &String) -> Result<(), CommandErrors> {
    if is_valid_ipv4(input) {
        Ok(())
    } else {
        Err(CommandErrors::InputValidationFailure(
            "host".into(),
            format!("`{input}` is not a valid IPv4 address"),
        ))
    }
}

fn describe(server: &ServerEntry) -> String {
    let os = if server.os.is_empty() { "unknown" } else { server.os.as_str() };
    let user = if server.ssh_user.is_empty() { "-" } else { server.ssh_user.as_str() };
    let auth = if !server.ssh_key_content.trim().is_empty() {
        "key"
    } else if !server.ssh_pass.is_empty() || !server.windows_password.is_empty() {
        "password"
    } else {
        "none"
    };
    format!("** {} (os: {os}, user: {user}, auth: {auth})", server.host)
}

impl InventoryCommand {
    fn manager(context: &CliContext<'_>) -> InventoryManager<playwatch::client::HttpConsoleClient> {
        InventoryManager::new(context.api.clone())
    }

    async fn subcommand_list(&self, context: &CliContext<'_>) -> Result<()> {
        let servers = Self::manager(context)
            .list()
            .await
            .wrap_err("Fetching the inventory failed")?;
        if servers.is_empty() {
            println!("* inventory is empty.");
            return Ok(());
        }
        println!("* {} servers:", servers.len());
        for server in &servers {
            println!("{}", describe(server));
        }
        Ok(())
    }

    async fn subcommand_show(&self, context: &CliContext<'_>) -> Result<()> {
        let inventory = Self::manager(context)
            .show()
            .await
            .wrap_err("Fetching the inventory file failed")?;
        print!("{inventory}");
        if !inventory.ends_with('\n') {
            println!();
        }
        Ok(())
    }

    async fn subcommand_add(&self, context: &CliContext<'_>, matches: &ArgMatches) -> Result<()> {
        let host = self.read_argument_with_validator(matches, "host", &mut host_validator)?;
        let ssh_user = match matches.get_one::<String>("user") {
            Some(user) => user.clone(),
            None if context.is_interactive() => self.prompt_for_input("SSH user")?,
            None => String::new(),
        };
        let ssh_key_content = match matches.get_one::<PathBuf>("key-file") {
            Some(path) => fs::read_to_string(path)
                .await
                .wrap_err_with(|| format!("Reading key file {} failed", path.display()))?,
            None => String::new(),
        };
        let ssh_pass = match matches.get_one::<String>("password") {
            Some(password) => password.clone(),
            None if ssh_key_content.is_empty() && context.is_interactive() => {
                self.prompt_for_secret("SSH password")?
            }
            None => String::new(),
        };
        let request = AddServerRequest {
            host,
            ssh_user,
            ssh_pass,
            ssh_key_content,
            os: matches.get_one::<String>("os").cloned().unwrap_or_default(),
            original_host: matches.get_one::<String>("replace").cloned(),
        };

        let response = Self::manager(context)
            .add(&request)
            .await
            .wrap_err_with(|| format!("Adding {} failed", request.host))?;
        info!("added {} to the inventory", request.host);
        println!(
            "* {}",
            response
                .message
                .unwrap_or_else(|| format!("{} added to the inventory.", request.host))
        );
        Ok(())
    }

    async fn subcommand_remove(&self, context: &CliContext<'_>, matches: &ArgMatches) -> Result<()> {
        let host = self.read_argument_with_validator(matches, "host", &mut host_validator)?;
        let response = Self::manager(context)
            .remove(&host)
            .await
            .wrap_err_with(|| format!("Removing {host} failed"))?;
        println!(
            "* {}",
            response
                .message
                .unwrap_or_else(|| format!("{host} removed from the inventory."))
        );
        Ok(())
    }

    async fn subcommand_import(&self, context: &CliContext<'_>, matches: &ArgMatches) -> Result<()> {
        let path = matches
            .get_one::<PathBuf>("file")
            .ok_or_else(|| CommandErrors::RequiredUserInputMissing("file".into()))?;
        let text = fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Reading {} failed", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let (count, response) = Self::manager(context)
            .import(&file_name, &text)
            .await
            .wrap_err_with(|| format!("Importing {file_name} failed"))?;
        println!(
            "* {}",
            response
                .message
                .unwrap_or_else(|| format!("imported {count} servers from {file_name}."))
        );
        Ok(())
    }
}

#[async_trait]
impl<'a> Command<'a> for InventoryCommand {
    fn new() -> Self {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        match context.matches.subcommand() {
            Some(("list", _)) => self.subcommand_list(context).await,
            Some(("show", _)) => self.subcommand_show(context).await,
            Some(("add", matches)) => self.subcommand_add(context, matches).await,
            Some(("remove", matches)) => self.subcommand_remove(context, matches).await,
            Some(("import", matches)) => self.subcommand_import(context, matches).await,
            Some((name, _)) => Err(CommandErrors::InvalidSubcommand(name.into()).into()),
            None => Err(CommandErrors::NoSubcommandProvided.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_server() {
        let server = ServerEntry {
            host: "10.0.0.7".into(),
            ssh_user: "admin".into(),
            ssh_pass: "pw".into(),
            os: "linux".into(),
            ..Default::default()
        };
        assert_eq!("** 10.0.0.7 (os: linux, user: admin, auth: password)", describe(&server));
        let bare = ServerEntry {
            host: "10.0.0.8".into(),
            ..Default::default()
        };
        assert_eq!("** 10.0.0.8 (os: unknown, user: -, auth: none)", describe(&bare));
    }

    #[test]
    fn test_host_validator() {
        assert!(host_validator(&"192.168.1.1".to_string()).is_ok());
        assert!(host_validator(&"example".to_string()).is_err());
    }
}
