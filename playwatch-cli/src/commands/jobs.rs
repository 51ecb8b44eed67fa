use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::{Result, WrapErr};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};

use playwatch::client::ConsoleApi;
use playwatch::ipc::http::JobStatus;
use playwatch::log::*;
use playwatch::output::Counters;
use playwatch::render::{self, TerminalPainter, ViewTree};
use playwatch::watch::{WatchEvent, WatchRegistry};

use super::{CliContext, Command, CommandErrors, Interactive};

/// Banner text for a finished job.
fn terminal_message(status: &JobStatus, counters: &Counters) -> String {
    let tally = format!(
        "ok={} changed={} failed={} skipped={} unreachable={}",
        counters.ok(),
        counters.changed(),
        counters.failed(),
        counters.skipped(),
        counters.unreachable()
    );
    match status {
        JobStatus::Completed => format!("playbook finished ({tally})"),
        JobStatus::Failed => format!("playbook failed ({tally})"),
        JobStatus::Cancelled => format!("playbook cancelled ({tally})"),
        JobStatus::NotFound => "job not found on the backend".to_string(),
        JobStatus::Running | JobStatus::Unknown => format!("unexpected job status ({tally})"),
    }
}

struct JobView<W: Write> {
    view: ViewTree,
    painter: TerminalPainter<W>,
    /// Bytes of output already printed, when following the raw output.
    raw_printed: Option<usize>,
}

impl<W: Write> JobView<W> {
    fn new(painter: TerminalPainter<W>, raw: bool) -> Self {
        Self {
            view: ViewTree::new(),
            painter,
            raw_printed: raw.then_some(0),
        }
    }
}

/// The part of `output` not printed yet, and how far printing will have got.
/// A trailing partial line is held back until the job ends. Output that no
/// longer extends what was printed is printed again in full.
fn unprinted(output: &str, printed: usize, terminal: bool) -> (&str, usize) {
    let end = if terminal {
        output.len()
    } else {
        output.rfind('\n').map(|index| index + 1).unwrap_or(0)
    };
    match output.get(printed..end) {
        Some(fresh) => (fresh, end),
        None => (output.get(..end).unwrap_or(output), end),
    }
}

/// How a set of followed jobs ended.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FollowReport {
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// Render the events of every followed job until all of them finish, give
/// up, or the user hits Ctrl-C. With `raw`, the output is printed as-is.
#[tracing::instrument(skip(context))]
pub async fn follow(context: &CliContext<'_>, job_ids: &[String], raw: bool) -> Result<FollowReport> {
    let api: Arc<dyn ConsoleApi> = context.api.clone();
    let mut registry = WatchRegistry::new(api, context.settings.poll_settings());
    let mut streams = StreamMap::new();
    let mut views = HashMap::new();
    let prefixed = job_ids.len() > 1;

    for job_id in job_ids {
        streams.insert(job_id.clone(), ReceiverStream::new(registry.watch(job_id.clone())));
        let painter = TerminalPainter::stdout();
        let painter = if prefixed {
            painter.with_prefix(job_id.clone())
        } else {
            painter
        };
        views.insert(job_id.clone(), JobView::new(painter, raw));
    }

    let mut report = FollowReport::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, tearing down {} watchers", registry.len());
                println!("* interrupted, no longer following jobs. They keep running on the backend.");
                registry.shutdown().await;
                report.interrupted = true;
                return Ok(report);
            }
            next = streams.next() => {
                let Some((job_id, event)) = next else {
                    break;
                };
                let Some(job) = views.get_mut(&job_id) else {
                    continue;
                };
                handle_event(job, event, &mut report)?;
            }
        }
    }

    for job_id in job_ids {
        if let Some(Err(err)) = registry.join(job_id).await {
            debug!("watcher for job {job_id} ended with error: {err}");
        }
    }
    Ok(report)
}

fn handle_event<W: Write>(job: &mut JobView<W>, event: WatchEvent, report: &mut FollowReport) -> Result<()> {
    match event {
        WatchEvent::Snapshot(snapshot) => {
            match job.raw_printed {
                Some(printed) => {
                    let (fresh, end) =
                        unprinted(snapshot.state.raw_output_seen(), printed, snapshot.is_terminal());
                    job.painter
                        .write_raw(fresh)
                        .wrap_err("Writing job output failed")?;
                    job.raw_printed = Some(end);
                }
                None => render::render(&mut job.view, &snapshot.state),
            }
            if snapshot.is_terminal() {
                let message = terminal_message(&snapshot.status, snapshot.state.counters());
                render::render_terminal(&mut job.view, &snapshot.status, message);
                if snapshot.status.is_success() {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
            }
            job.painter
                .paint(&mut job.view)
                .wrap_err("Writing job output failed")?;
        }
        WatchEvent::Transient {
            job_id,
            attempt,
            retry_in,
            error,
        } => {
            println!(
                "* job {job_id}: status request failed (attempt {attempt}), retrying in {}s: {error}",
                retry_in.as_secs()
            );
        }
        WatchEvent::Stalled { job_id, error } => {
            println!("* job {job_id}: giving up after repeated failures: {error}");
            println!("* run `playwatch watch {job_id}` to resume following it.");
            report.failed += 1;
        }
    }
    Ok(())
}

/// Follow `job_ids` and turn an unsuccessful outcome into an error.
pub async fn follow_to_completion(context: &CliContext<'_>, job_ids: &[String], raw: bool) -> Result<()> {
    let report = follow(context, job_ids, raw).await?;
    if report.failed > 0 {
        return Err(CommandErrors::JobsFailed(report.failed, job_ids.len()).into());
    }
    Ok(())
}

pub struct WatchCommand;

impl<'a> Interactive<'a> for WatchCommand {}

#[async_trait]
impl<'a> Command<'a> for WatchCommand {
    fn new() -> Self {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        let job_ids = self.read_arguments(context.matches, "job")?;
        follow_to_completion(context, &job_ids, context.matches.get_flag("raw")).await
    }
}

pub struct CancelCommand;

impl<'a> Interactive<'a> for CancelCommand {}

#[async_trait]
impl<'a> Command<'a> for CancelCommand {
    fn new() -> Self {
        Self
    }

    async fn run(&self, context: &'a CliContext) -> Result<()> {
        let job_id = self.read_argument_with_validator(context.matches, "job", &mut |_| Ok(()))?;
        if context.is_interactive() && !self.prompt_for_confirmation("Cancel this job?")? {
            println!("* not cancelled.");
            return Ok(());
        }
        let response = context
            .api
            .cancel(&job_id)
            .await
            .wrap_err_with(|| format!("Cancelling job {job_id} failed"))?;
        if response.success {
            info!("cancelled job {job_id}");
            println!("* job {job_id} cancelled.");
        } else {
            println!("* job {job_id} could not be cancelled; it may already have finished.");
        }
        Ok(())
    }
}
