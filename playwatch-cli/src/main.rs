#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{command, value_parser, Arg, ArgAction};
use color_eyre::eyre::{Result, WrapErr};

use playwatch::client::HttpConsoleClient;
use playwatch::config::Settings;
use playwatch::log::*;

use crate::commands::Command;

mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // Command configuration
    let matches = command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vvvv.")
                .action(ArgAction::Count)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all log output. Overridden by -v.")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the YAML configuration file. Defaults are used when omitted.")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("url")
                .short('u')
                .long("url")
                .help("Base URL of the console backend. Overrides the config file and PLAYWATCH_URL.")
                .global(true),
        )
        .subcommand(
            command!("playbooks")
                .about("Browse available playbooks.")
                .subcommand(command!("list").about("List the playbooks the backend offers."))
                .subcommand_required(true),
        )
        .subcommand(
            command!("run")
                .about("Run one or more playbooks on one or more hosts and follow their output.")
                .arg(
                    Arg::new("playbook")
                        .help("Playbook name or path. Repeat for several playbooks.")
                        .short('p')
                        .long("playbook")
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new("host")
                        .help("Target host. Repeat for several hosts.")
                        .short('H')
                        .long("host")
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new("site24x7-group")
                        .help("Site24x7 group whose device key is used.")
                        .long("site24x7-group")
                        .conflicts_with("device-key"),
                )
                .arg(
                    Arg::new("device-key")
                        .help("Custom Site24x7 device key.")
                        .long("device-key"),
                )
                .arg(
                    Arg::new("antivirus-script")
                        .help("File name of a catalog antivirus script.")
                        .long("antivirus-script")
                        .conflicts_with("custom-script"),
                )
                .arg(
                    Arg::new("custom-script")
                        .help("Path to a custom antivirus script to upload.")
                        .long("custom-script")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("baseline-hostname")
                        .help("New hostname for a baseline host, as HOST=NAME. Repeat for several hosts.")
                        .long("baseline-hostname")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("generate-passwords")
                        .help("Generate baseline passwords for hosts that have none configured.")
                        .long("generate-passwords")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-watch")
                        .help("Start the jobs and exit without following them.")
                        .long("no-watch")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("raw")
                        .help("Print the job output as-is instead of the task tree.")
                        .long("raw")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("no-watch"),
                ),
        )
        .subcommand(
            command!("watch")
                .about("Follow running jobs until they finish.")
                .arg(
                    Arg::new("job")
                        .help("Job id. Repeat for several jobs.")
                        .action(ArgAction::Append)
                        .required(true),
                )
                .arg(
                    Arg::new("raw")
                        .help("Print the job output as-is instead of the task tree.")
                        .long("raw")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("cancel")
                .about("Cancel a running job.")
                .arg(Arg::new("job").help("Job id.").required(true)),
        )
        .subcommand(
            command!("inventory")
                .about("Manage the server inventory.")
                .subcommand(command!("list").about("List inventory servers."))
                .subcommand(command!("show").about("Print the raw inventory file."))
                .subcommand(
                    command!("add")
                        .about("Add or update a server.")
                        .arg(Arg::new("host").help("IPv4 address.").long("host").required(true))
                        .arg(Arg::new("user").help("SSH user.").long("user"))
                        .arg(Arg::new("password").help("SSH password.").long("password"))
                        .arg(
                            Arg::new("key-file")
                                .help("Path to the SSH private key.")
                                .long("key-file")
                                .value_parser(value_parser!(PathBuf))
                                .conflicts_with("password"),
                        )
                        .arg(
                            Arg::new("os")
                                .help("Operating system of the server.")
                                .long("os")
                                .value_parser(["linux", "windows"]),
                        )
                        .arg(
                            Arg::new("replace")
                                .help("Existing address this entry replaces.")
                                .long("replace"),
                        ),
                )
                .subcommand(
                    command!("remove")
                        .about("Remove a server.")
                        .arg(Arg::new("host").help("IPv4 address.").long("host").required(true)),
                )
                .subcommand(
                    command!("import")
                        .about("Import servers from a JSON file or a [server] template.")
                        .arg(
                            Arg::new("file")
                                .help("Path to the import file.")
                                .required(true)
                                .value_parser(value_parser!(PathBuf)),
                        ),
                )
                .subcommand_required(true),
        )
        .subcommand_required(true)
        .get_matches();

    // Set up logging
    let quiet = matches.get_flag("quiet");
    let verbose = matches.get_count("verbose") as usize;
    init_subscriber(quiet, verbose);
    install_color_eyre()?;

    // Load settings
    let settings = Settings::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
        .await
        .wrap_err("Loading configuration failed")?;
    let settings = match matches.get_one::<String>("url") {
        Some(url) => settings.with_base_url(url),
        None => settings,
    };
    debug!("using console backend at {}", settings.base_url());
    let api = Arc::new(HttpConsoleClient::new(settings.base_url().clone()));

    // Run the commands
    if let Some((subcommand, matches)) = matches.subcommand() {
        let ctx = commands::CliContext::new(settings, api, matches);
        debug!(
            "matched subcommand {} with matches: {:?}",
            &subcommand,
            &matches.ids().map(|id| id.as_str()).collect::<Vec<_>>()
        );
        match subcommand {
            "playbooks" => commands::playbooks::PlaybooksCommand::new().run(&ctx).await?,
            "run" => commands::run::RunCommand::new().run(&ctx).await?,
            "watch" => commands::jobs::WatchCommand::new().run(&ctx).await?,
            "cancel" => commands::jobs::CancelCommand::new().run(&ctx).await?,
            "inventory" => commands::inventory::InventoryCommand::new().run(&ctx).await?,
            _ => return Err(eyre!("Unrecognized subcommand: {}", subcommand)),
        }
    }
    Ok(())
}
