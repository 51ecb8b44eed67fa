#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use clap::{command, value_parser, Arg, ArgAction};
use color_eyre::eyre::Result;
use playwatch::ipc::http::{JobStatus, PlaybookInfo};
use playwatch::log::*;

use crate::transcript::{ReplayOptions, Transcript};

mod http_server;
mod transcript;

const PORT: u16 = 5000;

fn parse_final_status(value: &str) -> Result<JobStatus, String> {
    match value {
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "cancelled" => Ok(JobStatus::Cancelled),
        other => Err(format!("expected completed, failed or cancelled, got `{other}`")),
    }
}

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<()> {
    let matches = command!()
        .about("Serve a recorded ansible-playbook transcript through the console API.")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Turn debugging information on. Overrides -q. Can specify up to -vvvv.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Silence all log output. Overridden by -v.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("transcript")
                .short('t')
                .long("transcript")
                .help("Path to the recorded playbook output.")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on.")
                .value_parser(value_parser!(u16))
                .default_value("5000"),
        )
        .arg(
            Arg::new("lines-per-tick")
                .long("lines-per-tick")
                .help("Transcript lines revealed per tick.")
                .value_parser(value_parser!(usize))
                .default_value("3"),
        )
        .arg(
            Arg::new("tick-ms")
                .long("tick-ms")
                .help("Tick length in milliseconds.")
                .value_parser(value_parser!(u64))
                .default_value("1000"),
        )
        .arg(
            Arg::new("final-status")
                .long("final-status")
                .help("Status reported once the whole transcript has been revealed.")
                .value_parser(parse_final_status)
                .default_value("completed"),
        )
        .arg(
            Arg::new("retention-secs")
                .long("retention-secs")
                .help("Seconds a finished job stays queryable before it is forgotten.")
                .value_parser(value_parser!(u64))
                .default_value("600"),
        )
        .arg(
            Arg::new("playbook")
                .long("playbook")
                .help("Playbook path to offer. Repeat for several.")
                .action(ArgAction::Append),
        )
        .get_matches();

    init_subscriber(matches.get_flag("quiet"), matches.get_count("verbose") as usize);
    install_color_eyre()?;

    let path = matches
        .get_one::<PathBuf>("transcript")
        .ok_or_else(|| eyre!("--transcript is required"))?;
    let transcript = Transcript::load(path).await?;
    info!("loaded {} transcript lines from {}", transcript.len(), path.display());

    let playbooks: Vec<PlaybookInfo> = matches
        .get_many::<String>("playbook")
        .map(|paths| paths.cloned().collect::<Vec<_>>())
        .unwrap_or_else(|| vec!["playbooks/replay.yml".to_string()])
        .into_iter()
        .map(|path| PlaybookInfo {
            name: path
                .rsplit('/')
                .next()
                .unwrap_or(&path)
                .trim_end_matches(".yml")
                .to_string(),
            path,
            category: Some("replay".into()),
            os: None,
            description: Some("Replays a recorded transcript".into()),
        })
        .collect();

    let options = ReplayOptions {
        lines_per_tick: *matches.get_one::<usize>("lines-per-tick").unwrap_or(&3),
        tick: Duration::from_millis(*matches.get_one::<u64>("tick-ms").unwrap_or(&1000)),
        final_status: matches
            .get_one::<JobStatus>("final-status")
            .cloned()
            .unwrap_or(JobStatus::Completed),
        retention: Duration::from_secs(*matches.get_one::<u64>("retention-secs").unwrap_or(&600)),
    };
    let port = *matches.get_one::<u16>("port").unwrap_or(&PORT);
    println!("* replaying {} on http://127.0.0.1:{port}", path.display());

    let state = http_server::AppState::new(transcript, playbooks, options);
    http_server::run_server(port, state).await
}
