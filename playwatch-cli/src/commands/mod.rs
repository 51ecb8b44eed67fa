use std::io::IsTerminal;
use std::sync::Arc;

use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::{Result, WrapErr};
use dialoguer::{Confirm, Input, Password, Select};
use thiserror::Error;

use playwatch::client::HttpConsoleClient;
use playwatch::config::Settings;

pub mod inventory;
pub mod jobs;
pub mod playbooks;
pub mod run;

#[derive(Error, Debug)]
pub enum CommandErrors {
    #[error("Prompt interaction failed.")]
    PromptInteractionFailed(
        #[from]
        #[source]
        dialoguer::Error,
    ),
    #[error("Required user input `{0}` is missing.")]
    RequiredUserInputMissing(String),
    #[error("Argument `{0}` failed validation: {1}")]
    InputValidationFailure(String, String),
    #[error("Unknown playbook `{0}`.")]
    UnknownPlaybook(String),
    #[error("{0} of {1} jobs did not complete successfully.")]
    JobsFailed(usize, usize),
    #[error("Invalid subcommand `{0}`.")]
    InvalidSubcommand(String),
    #[error("No subcommand provided.")]
    NoSubcommandProvided,
}

pub struct CliContext<'a> {
    pub settings: Settings,
    pub api: Arc<HttpConsoleClient>,
    pub matches: &'a ArgMatches,
}

impl<'a> CliContext<'a> {
    pub fn new(settings: Settings, api: Arc<HttpConsoleClient>, matches: &'a ArgMatches) -> Self {
        Self {
            settings,
            api,
            matches,
        }
    }

    pub fn with_matches(&self, matches: &'a ArgMatches) -> Self {
        Self {
            settings: self.settings.clone(),
            api: self.api.clone(),
            matches,
        }
    }

    /// Whether prompts can be shown to fill in missing input.
    pub fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
    }
}

#[async_trait]
pub trait Command<'a> {
    fn new() -> Self
    where
        Self: Sized;

    async fn run(&self, context: &'a CliContext) -> Result<()>;
}

pub trait Interactive<'a> {
    fn prompt_for_input(&self, message: &'a str) -> Result<String> {
        Input::<String>::new()
            .with_prompt(message)
            .interact_text()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting user input failed.")
    }

    fn prompt_for_input_with_default(&self, message: &'a str, default: String) -> Result<String> {
        Input::<String>::new()
            .with_prompt(message)
            .default(default)
            .interact_text()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting user input failed.")
    }

    fn prompt_for_secret(&self, message: &'a str) -> Result<String> {
        Password::new()
            .with_prompt(message)
            .allow_empty_password(true)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting for a secret failed.")
    }

    fn prompt_for_input_with_validator<V>(&self, message: &'a str, validator: V) -> Result<String>
    where
        V: FnMut(&String) -> Result<(), CommandErrors>,
    {
        Input::<String>::new()
            .with_prompt(message)
            .validate_with(validator)
            .interact_text()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting user input with validator failed.")
    }

    /// Let the user pick one of `items`. Returns the chosen index.
    fn prompt_for_selection<T: ToString>(&self, message: &'a str, items: &[T]) -> Result<usize> {
        Select::new()
            .with_prompt(message)
            .items(items)
            .default(0)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting for a selection failed.")
    }

    fn prompt_for_confirmation(&self, message: &'a str) -> Result<bool> {
        Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .map_err(CommandErrors::PromptInteractionFailed)
            .wrap_err("Prompting for confirmation failed.")
    }

    /// Read argument from the CLI args with a validation function.
    fn read_argument_with_validator<V>(
        &self,
        arg_matches: &'a ArgMatches,
        id: &'a str,
        validator: &mut V,
    ) -> Result<String>
    where
        V: FnMut(&String) -> Result<(), CommandErrors>,
    {
        if let Some(arg) = arg_matches.get_one::<String>(id) {
            validator(arg)?;
            Ok(arg.clone())
        } else {
            Err(CommandErrors::RequiredUserInputMissing(id.into()))?
        }
    }

    /// Read every value of a repeatable argument.
    fn read_arguments(&self, arg_matches: &'a ArgMatches, id: &'a str) -> Result<Vec<String>> {
        let values: Vec<String> = arg_matches
            .get_many::<String>(id)
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        if values.is_empty() {
            return Err(CommandErrors::RequiredUserInputMissing(id.into()).into());
        }
        Ok(values)
    }
}
