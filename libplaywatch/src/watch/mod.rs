//! Polling a job until it reaches a final status.
//!
//! A [`JobWatcher`] owns the [`ExecutionState`] of one job. Every tick it
//! fetches the job's full output, re-derives the state and sends a
//! [`WatchEvent`] down its channel. Watchers are cancelled through a
//! [`CancellationToken`]; once the token fires no further request is made.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiError, ConsoleApi};
use crate::ipc::http::JobStatus;
use crate::log::*;
use crate::output::ExecutionState;

pub mod registry;

pub use registry::WatchRegistry;

pub type WatchTx = mpsc::Sender<WatchEvent>;
pub type WatchRx = mpsc::Receiver<WatchEvent>;

/// Poll timing. See [`PollConfig`](crate::config::PollConfig) for the
/// configurable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub base_interval: Duration,
    pub max_interval: Duration,
    /// Added to the interval after every poll that saw no new output.
    pub step: Duration,
    pub error_backoff: Duration,
    pub max_error_backoff: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(5),
            step: Duration::from_secs(1),
            error_backoff: Duration::from_secs(3),
            max_error_backoff: Duration::from_secs(30),
            max_consecutive_errors: 5,
        }
    }
}

impl PollSettings {
    /// Delay before the next poll of a running job.
    pub fn next_interval(&self, current: Duration, output_changed: bool) -> Duration {
        if output_changed {
            self.base_interval
        } else {
            (current + self.step).min(self.max_interval)
        }
    }

    /// Delay after the `failures`-th consecutive failed fetch.
    pub fn error_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.error_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_error_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    Polling,
    Terminal(JobStatus),
}

/// What one successful poll produced.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    /// Progress as the backend computes it. The view derives its own.
    pub backend_progress: f64,
    pub output_changed: bool,
    pub state: ExecutionState,
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Snapshot(JobSnapshot),
    /// A fetch failed; polling continues after `retry_in`.
    Transient {
        job_id: String,
        attempt: u32,
        retry_in: Duration,
        error: String,
    },
    /// Too many fetches failed in a row; the watcher gave up.
    Stalled { job_id: String, error: String },
}

impl WatchEvent {
    pub fn job_id(&self) -> &str {
        match self {
            WatchEvent::Snapshot(snapshot) => &snapshot.job_id,
            WatchEvent::Transient { job_id, .. } | WatchEvent::Stalled { job_id, .. } => job_id,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    #[error("gave up on job {job_id} after {attempts} failed status requests")]
    RetriesExhausted {
        job_id: String,
        attempts: u32,
        #[source]
        source: ApiError,
    },
    #[error("watcher task failed")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Finished(JobStatus),
    Cancelled,
}

/// Polls one job.
#[derive(Debug)]
pub struct JobWatcher<A: ConsoleApi + ?Sized> {
    api: Arc<A>,
    job_id: String,
    settings: PollSettings,
    cancel: CancellationToken,
    phase: WatchPhase,
    state: ExecutionState,
}

impl<A: ConsoleApi + ?Sized> JobWatcher<A> {
    pub fn new<S: Into<String>>(
        api: Arc<A>,
        job_id: S,
        settings: PollSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            job_id: job_id.into(),
            settings,
            cancel,
            phase: WatchPhase::Idle,
            state: ExecutionState::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn phase(&self) -> &WatchPhase {
        &self.phase
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Poll until the job finishes, the token is cancelled, or the receiving
    /// end of `tx` goes away.
    #[tracing::instrument(skip(self, tx), fields(job_id = %self.job_id))]
    pub async fn run(&mut self, tx: WatchTx) -> Result<WatchOutcome, WatchError> {
        self.phase = WatchPhase::Polling;
        debug!("watch: polling started");
        let mut interval = self.settings.base_interval;
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.stop());
            }
            let fetched = self.api.status(&self.job_id).await;
            // A teardown during the request discards its result.
            if self.cancel.is_cancelled() {
                return Ok(self.stop());
            }

            let delay = match fetched {
                Ok(response) => {
                    failures = 0;
                    let output_changed = self.state.refresh(&response.output);
                    let status = response.status;
                    if status.is_terminal() {
                        self.state.mark_terminal();
                    }
                    let snapshot = JobSnapshot {
                        job_id: self.job_id.clone(),
                        status: status.clone(),
                        backend_progress: response.progress,
                        output_changed,
                        state: self.state.clone(),
                    };
                    if tx.send(WatchEvent::Snapshot(snapshot)).await.is_err() {
                        debug!("watch: receiver dropped");
                        return Ok(self.stop());
                    }
                    if status.is_terminal() {
                        info!("watch: job finished with status {status}");
                        self.phase = WatchPhase::Terminal(status.clone());
                        return Ok(WatchOutcome::Finished(status));
                    }
                    interval = self.settings.next_interval(interval, output_changed);
                    trace!("watch: next poll in {interval:?}");
                    interval
                }
                Err(source) => {
                    failures += 1;
                    if failures >= self.settings.max_consecutive_errors {
                        error!("watch: giving up after {failures} failed requests: {source}");
                        // Best effort, the watcher is done either way.
                        let _ = tx
                            .send(WatchEvent::Stalled {
                                job_id: self.job_id.clone(),
                                error: source.to_string(),
                            })
                            .await;
                        self.phase = WatchPhase::Idle;
                        return Err(WatchError::RetriesExhausted {
                            job_id: self.job_id.clone(),
                            attempts: failures,
                            source,
                        });
                    }
                    let retry_in = self.settings.error_delay(failures);
                    warn!("watch: status request failed (attempt {failures}), retrying in {retry_in:?}: {source}");
                    let event = WatchEvent::Transient {
                        job_id: self.job_id.clone(),
                        attempt: failures,
                        retry_in,
                        error: source.to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(self.stop());
                    }
                    retry_in
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(self.stop()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn stop(&mut self) -> WatchOutcome {
        debug!("watch: polling stopped");
        self.phase = WatchPhase::Idle;
        WatchOutcome::Cancelled
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::ipc::http::{CancelResponse, PlaybookInfo, RunRequest, RunResponse, StatusResponse};

    /// Serves scripted status responses; the last one repeats forever.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedApi {
        responses: Mutex<VecDeque<Result<StatusResponse, String>>>,
        pub(crate) fetches: Mutex<Vec<Instant>>,
        pub(crate) cancel_on_fetch: Option<CancellationToken>,
    }

    impl ScriptedApi {
        pub(crate) fn new(responses: Vec<Result<StatusResponse, String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Default::default()
            }
        }

        pub(crate) fn fetch_count(&self) -> usize {
            self.fetches.lock().unwrap().len()
        }

        pub(crate) fn gaps(&self) -> Vec<Duration> {
            let fetches = self.fetches.lock().unwrap();
            fetches.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    pub(crate) fn running(output: &str) -> Result<StatusResponse, String> {
        Ok(StatusResponse {
            status: JobStatus::Running,
            progress: 0.0,
            output: output.to_string(),
        })
    }

    pub(crate) fn finished(status: JobStatus, output: &str) -> Result<StatusResponse, String> {
        Ok(StatusResponse {
            status,
            progress: 100.0,
            output: output.to_string(),
        })
    }

    #[async_trait]
    impl ConsoleApi for ScriptedApi {
        async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, ApiError> {
            Ok(vec![])
        }

        async fn run(&self, _request: &RunRequest) -> Result<RunResponse, ApiError> {
            unreachable!("watchers never start jobs")
        }

        async fn status(&self, _job_id: &str) -> Result<StatusResponse, ApiError> {
            self.fetches.lock().unwrap().push(Instant::now());
            if let Some(token) = &self.cancel_on_fetch {
                token.cancel();
            }
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            };
            match next.expect("scripted responses") {
                Ok(response) => Ok(response),
                Err(message) => Err(ApiError::Status {
                    endpoint: "/api/status".into(),
                    status: 502,
                    message,
                }),
            }
        }

        async fn cancel(&self, _job_id: &str) -> Result<CancelResponse, ApiError> {
            Ok(CancelResponse { success: true })
        }
    }

    #[test]
    fn test_interval_backoff() {
        let settings = PollSettings::default();
        let mut interval = settings.base_interval;
        let mut seen = vec![];
        for _ in 0..5 {
            interval = settings.next_interval(interval, false);
            seen.push(interval.as_secs());
        }
        assert_eq!(vec![3, 4, 5, 5, 5], seen);
        assert_eq!(settings.base_interval, settings.next_interval(interval, true));
    }

    #[test]
    fn test_error_backoff_is_exponential_and_capped() {
        let settings = PollSettings::default();
        let delays: Vec<u64> = (1..=6).map(|n| settings.error_delay(n).as_secs()).collect();
        assert_eq!(vec![3, 6, 12, 24, 30, 30], delays);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_slow_down_while_output_is_unchanged() {
        let api = Arc::new(ScriptedApi::new(vec![
            running("PLAY [p]\n"),
            running("PLAY [p]\n"),
            running("PLAY [p]\n"),
            running("PLAY [p]\n"),
            running("PLAY [p]\n"),
            running("PLAY [p]\nTASK [t]\n"),
            finished(JobStatus::Completed, "PLAY [p]\nTASK [t]\nok: [h]\n"),
        ]));
        let (tx, mut rx) = mpsc::channel(32);
        let mut watcher = JobWatcher::new(api.clone(), "job", PollSettings::default(), CancellationToken::new());

        let outcome = watcher.run(tx).await.expect("watch");
        assert_eq!(WatchOutcome::Finished(JobStatus::Completed), outcome);
        assert_eq!(&WatchPhase::Terminal(JobStatus::Completed), watcher.phase());
        assert!(*watcher.state().terminal());

        let gaps: Vec<u64> = api.gaps().iter().map(|d| d.as_secs()).collect();
        assert_eq!(vec![2, 3, 4, 5, 5, 2], gaps);

        let mut snapshots = vec![];
        while let Some(WatchEvent::Snapshot(snapshot)) = rx.recv().await {
            snapshots.push(snapshot);
        }
        assert_eq!(7, snapshots.len());
        assert!(snapshots.last().expect("final").is_terminal());
        assert_eq!(1, snapshots.iter().filter(|s| s.is_terminal()).count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_non_running_status_is_final() {
        let api = Arc::new(ScriptedApi::new(vec![finished(JobStatus::NotFound, "")]));
        let (tx, _rx) = mpsc::channel(8);
        let mut watcher = JobWatcher::new(api.clone(), "gone", PollSettings::default(), CancellationToken::new());
        assert_eq!(
            WatchOutcome::Finished(JobStatus::NotFound),
            watcher.run(tx).await.expect("watch")
        );
        assert_eq!(1, api.fetch_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_issues_no_fetch() {
        let api = Arc::new(ScriptedApi::new(vec![running("")]));
        let token = CancellationToken::new();
        token.cancel();
        let (tx, _rx) = mpsc::channel(8);
        let mut watcher = JobWatcher::new(api.clone(), "job", PollSettings::default(), token);
        assert_eq!(WatchOutcome::Cancelled, watcher.run(tx).await.expect("watch"));
        assert_eq!(0, api.fetch_count());
        assert_eq!(&WatchPhase::Idle, watcher.phase());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_during_fetch_discards_result() {
        let token = CancellationToken::new();
        let api = Arc::new(ScriptedApi {
            cancel_on_fetch: Some(token.clone()),
            ..ScriptedApi::new(vec![running("PLAY [p]\n")])
        });
        let (tx, mut rx) = mpsc::channel(8);
        let mut watcher = JobWatcher::new(api.clone(), "job", PollSettings::default(), token);
        assert_eq!(WatchOutcome::Cancelled, watcher.run(tx).await.expect("watch"));
        assert_eq!(1, api.fetch_count());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_sleeping_stops_polling() {
        let api = Arc::new(ScriptedApi::new(vec![running("PLAY [p]\n")]));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut watcher = JobWatcher::new(api.clone(), "job", PollSettings::default(), token.clone());
        let handle = tokio::spawn(async move { watcher.run(tx).await });

        assert!(matches!(rx.recv().await, Some(WatchEvent::Snapshot(_))));
        token.cancel();
        let outcome = handle.await.expect("join").expect("watch");
        assert_eq!(WatchOutcome::Cancelled, outcome);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(1, api.fetch_count());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalls_after_repeated_failures() {
        let api = Arc::new(ScriptedApi::new(vec![Err("bad gateway".into())]));
        let settings = PollSettings {
            max_consecutive_errors: 3,
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::channel(8);
        let mut watcher = JobWatcher::new(api.clone(), "job", settings, CancellationToken::new());

        let err = watcher.run(tx).await.unwrap_err();
        assert!(matches!(err, WatchError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(3, api.fetch_count());
        let gaps: Vec<u64> = api.gaps().iter().map(|d| d.as_secs()).collect();
        assert_eq!(vec![3, 6], gaps);

        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], WatchEvent::Transient { attempt: 1, .. }));
        assert!(matches!(events[1], WatchEvent::Transient { attempt: 2, .. }));
        assert!(matches!(events[2], WatchEvent::Stalled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_reset_after_success() {
        let api = Arc::new(ScriptedApi::new(vec![
            Err("blip".into()),
            Err("blip".into()),
            running("PLAY [p]\n"),
            Err("blip".into()),
            Err("blip".into()),
            finished(JobStatus::Failed, "PLAY [p]\n"),
        ]));
        let settings = PollSettings {
            max_consecutive_errors: 3,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(32);
        let mut watcher = JobWatcher::new(api, "job", settings, CancellationToken::new());
        assert_eq!(
            WatchOutcome::Finished(JobStatus::Failed),
            watcher.run(tx).await.expect("watch")
        );
    }
}
