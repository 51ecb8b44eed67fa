use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{JobWatcher, PollSettings, WatchError, WatchOutcome, WatchRx};
use crate::client::ConsoleApi;
use crate::log::*;

const EVENT_BUFFER: usize = 64;

#[derive(Debug)]
struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<WatchOutcome, WatchError>>,
}

/// One running [`JobWatcher`] per job id. Watchers are independent of each
/// other; tearing one down leaves the rest polling. Dropping the registry
/// cancels every watcher it still owns.
#[derive(Debug)]
pub struct WatchRegistry {
    api: Arc<dyn ConsoleApi>,
    settings: PollSettings,
    root: CancellationToken,
    watchers: HashMap<String, WatchHandle>,
}

impl WatchRegistry {
    pub fn new(api: Arc<dyn ConsoleApi>, settings: PollSettings) -> Self {
        Self {
            api,
            settings,
            root: CancellationToken::new(),
            watchers: HashMap::new(),
        }
    }

    /// Start polling `job_id` and return the receiving end of its events. A
    /// job that is already being watched is torn down and watched afresh.
    pub fn watch<S: Into<String>>(&mut self, job_id: S) -> WatchRx {
        let job_id = job_id.into();
        self.teardown(&job_id);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = self.root.child_token();
        let mut watcher = JobWatcher::new(
            self.api.clone(),
            job_id.clone(),
            self.settings.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(async move { watcher.run(tx).await });
        debug!("registry: watching job {job_id}");
        self.watchers.insert(job_id, WatchHandle { cancel, task });
        rx
    }

    pub fn is_watching(&self, job_id: &str) -> bool {
        self.watchers
            .get(job_id)
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.watchers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    /// Stop polling `job_id`. Returns whether a watcher was registered.
    pub fn teardown(&mut self, job_id: &str) -> bool {
        match self.watchers.remove(job_id) {
            Some(handle) => {
                debug!("registry: tearing down watcher for job {job_id}");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the watcher of `job_id` to end, and forget it.
    pub async fn join(&mut self, job_id: &str) -> Option<Result<WatchOutcome, WatchError>> {
        let handle = self.watchers.remove(job_id)?;
        Some(match handle.task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(WatchError::Join(err)),
        })
    }

    /// Cancel every watcher and wait for all of them to stop.
    pub async fn shutdown(&mut self) {
        self.root.cancel();
        for (job_id, handle) in self.watchers.drain() {
            if let Err(err) = handle.task.await {
                warn!("registry: watcher for job {job_id} did not stop cleanly: {err}");
            }
        }
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
