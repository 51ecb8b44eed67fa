use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use tokio::fs;
use tokio::time::Instant;

use playwatch::ipc::http::{JobStatus, StatusResponse};

/// A recorded `ansible-playbook` run, line by line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Reading transcript {} failed", path.display()))?;
        Ok(Self::from_text(&text))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The first `count` lines, newline-terminated.
    pub fn prefix(&self, count: usize) -> String {
        let mut out = String::new();
        for line in self.lines.iter().take(count) {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// How fast jobs reveal their transcript, how they end, and how long a
/// finished job stays queryable.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub lines_per_tick: usize,
    pub tick: Duration,
    pub final_status: JobStatus,
    pub retention: Duration,
}

/// Lines revealed after `ticks` ticks. The first tick reveals the first batch
/// right away.
pub fn revealed_lines(total: usize, lines_per_tick: usize, ticks: u64) -> usize {
    let batches = usize::try_from(ticks.saturating_add(1)).unwrap_or(usize::MAX);
    lines_per_tick.max(1).saturating_mul(batches).min(total)
}

/// One replayed job.
#[derive(Debug, Clone)]
pub struct ReplayJob {
    pub playbook: String,
    pub hosts: Vec<String>,
    transcript: Arc<Transcript>,
    started: Instant,
    /// Lines shown when the job was cancelled, and when that happened.
    cancelled_at: Option<(usize, Instant)>,
}

impl ReplayJob {
    pub fn new(playbook: String, hosts: Vec<String>, transcript: Arc<Transcript>) -> Self {
        Self {
            playbook,
            hosts,
            transcript,
            started: Instant::now(),
            cancelled_at: None,
        }
    }

    fn ticks(&self, options: &ReplayOptions) -> u64 {
        let tick = options.tick.as_millis().max(1);
        (self.started.elapsed().as_millis() / tick) as u64
    }

    fn revealed(&self, options: &ReplayOptions) -> usize {
        revealed_lines(self.transcript.len(), options.lines_per_tick, self.ticks(options))
    }

    pub fn is_running(&self, options: &ReplayOptions) -> bool {
        self.cancelled_at.is_none() && self.revealed(options) < self.transcript.len()
    }

    /// Freeze the output where it is. Returns false if the job already ended.
    pub fn cancel(&mut self, options: &ReplayOptions) -> bool {
        if !self.is_running(options) {
            return false;
        }
        self.cancelled_at = Some((self.revealed(options), Instant::now()));
        true
    }

    /// When the job stopped running: cancelled, or the last batch revealed.
    pub fn ended_at(&self, options: &ReplayOptions) -> Option<Instant> {
        if let Some((_, at)) = self.cancelled_at {
            return Some(at);
        }
        if self.is_running(options) {
            return None;
        }
        let per_tick = options.lines_per_tick.max(1);
        let batches = self.transcript.len().div_ceil(per_tick).max(1);
        let ticks = u32::try_from(batches - 1).unwrap_or(u32::MAX);
        Some(self.started + options.tick.saturating_mul(ticks))
    }

    /// Whether the job ended more than `options.retention` ago.
    pub fn is_expired(&self, options: &ReplayOptions) -> bool {
        self.ended_at(options)
            .is_some_and(|ended| ended.elapsed() >= options.retention)
    }

    pub fn status(&self, options: &ReplayOptions) -> StatusResponse {
        let total = self.transcript.len();
        let (shown, status) = match self.cancelled_at {
            Some((shown, _)) => (shown, JobStatus::Cancelled),
            None => {
                let shown = self.revealed(options);
                let status = if shown < total {
                    JobStatus::Running
                } else {
                    options.final_status.clone()
                };
                (shown, status)
            }
        };
        let progress = if total == 0 {
            100.0
        } else {
            shown as f64 / total as f64 * 100.0
        };
        StatusResponse {
            status,
            progress,
            output: self.transcript.prefix(shown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN: &str = "PLAY [p]\nTASK [a]\nok: [h1]\nTASK [b]\nchanged: [h1]\n";

    fn options() -> ReplayOptions {
        ReplayOptions {
            lines_per_tick: 2,
            tick: Duration::from_millis(500),
            final_status: JobStatus::Completed,
            retention: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_revealed_lines() {
        assert_eq!(2, revealed_lines(5, 2, 0));
        assert_eq!(4, revealed_lines(5, 2, 1));
        assert_eq!(5, revealed_lines(5, 2, 2));
        assert_eq!(5, revealed_lines(5, 2, u64::MAX));
        assert_eq!(1, revealed_lines(5, 0, 0));
        assert_eq!(0, revealed_lines(0, 3, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_reveals_then_finishes() {
        let job = ReplayJob::new("p.yml".into(), vec!["h1".into()], Arc::new(Transcript::from_text(RUN)));
        let first = job.status(&options());
        assert_eq!(JobStatus::Running, first.status);
        assert_eq!("PLAY [p]\nTASK [a]\n", first.output);

        tokio::time::advance(Duration::from_millis(500)).await;
        let second = job.status(&options());
        assert!(second.output.starts_with(&first.output));
        assert_eq!(JobStatus::Running, second.status);

        tokio::time::advance(Duration::from_millis(500)).await;
        let last = job.status(&options());
        assert_eq!(JobStatus::Completed, last.status);
        assert_eq!(RUN, last.output);
        assert_eq!(100.0, last.progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_freezes_output() {
        let mut job = ReplayJob::new("p.yml".into(), vec![], Arc::new(Transcript::from_text(RUN)));
        assert!(job.cancel(&options()));
        tokio::time::advance(Duration::from_secs(10)).await;
        let status = job.status(&options());
        assert_eq!(JobStatus::Cancelled, status.status);
        assert_eq!("PLAY [p]\nTASK [a]\n", status.output);
        assert!(!job.cancel(&options()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_jobs_expire_after_retention() {
        let job = ReplayJob::new("p.yml".into(), vec![], Arc::new(Transcript::from_text(RUN)));
        let started = Instant::now();
        assert_eq!(None, job.ended_at(&options()));

        tokio::time::advance(Duration::from_secs(5)).await;
        // Three batches of two lines: the last one shows up after two ticks.
        assert_eq!(Some(started + Duration::from_secs(1)), job.ended_at(&options()));
        assert!(!job.is_expired(&options()));

        tokio::time::advance(Duration::from_secs(56)).await;
        assert!(job.is_expired(&options()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_jobs_expire_from_the_cancel() {
        let mut job = ReplayJob::new("p.yml".into(), vec![], Arc::new(Transcript::from_text(RUN)));
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(job.cancel(&options()));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!job.is_expired(&options()));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(job.is_expired(&options()));
    }
}
