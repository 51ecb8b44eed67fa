use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use color_eyre::eyre::Result;
use tokio::sync::Mutex;

use playwatch::ipc::http::{
    CancelRequest, CancelResponse, ErrorBody, JobStatus, PlaybookInfo, RunRequest, RunResponse,
    StatusResponse,
};
use playwatch::log::*;

use crate::transcript::{ReplayJob, ReplayOptions, Transcript};

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

#[derive(Debug, Clone)]
pub struct AppState {
    transcript: Arc<Transcript>,
    playbooks: Arc<Vec<PlaybookInfo>>,
    options: ReplayOptions,
    jobs: Arc<Mutex<HashMap<String, ReplayJob>>>,
}

impl AppState {
    pub fn new(transcript: Transcript, playbooks: Vec<PlaybookInfo>, options: ReplayOptions) -> Self {
        Self {
            transcript: Arc::new(transcript),
            playbooks: Arc::new(playbooks),
            options,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget jobs that ended longer than the retention period ago.
    async fn evict_expired(&self) {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_expired(&self.options));
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("evicted {evicted} finished jobs");
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/playbooks", get(playbooks))
        .route("/api/run", post(run))
        .route("/api/status/:job_id", get(status))
        .route("/api/cancel", post(cancel))
        .with_state(state)
}

pub async fn run_server(port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("replay server listening on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| e.into())
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: Some(message.to_string()),
            message: None,
        }),
    )
}

async fn root() -> &'static str {
    "playwatch-replay"
}

async fn playbooks(State(state): State<AppState>) -> Json<Vec<PlaybookInfo>> {
    Json(state.playbooks.as_ref().clone())
}

async fn run(State(state): State<AppState>, Json(request): Json<RunRequest>) -> ApiResult<RunResponse> {
    if request.playbook.trim().is_empty() {
        return Err(bad_request("playbook is required"));
    }
    if request.hosts.is_empty() {
        return Err(bad_request("at least one host is required"));
    }
    if !state.playbooks.iter().any(|p| p.path == request.playbook) {
        return Err(bad_request("unknown playbook"));
    }

    state.evict_expired().await;
    let job_id = nanoid::nanoid!(12);
    let extra = request.extra_vars.as_ref().map(|vars| vars.len()).unwrap_or(0);
    info!(
        "job {job_id}: replaying {} on {} hosts ({extra} extra vars)",
        request.playbook,
        request.hosts.len()
    );
    let job = ReplayJob::new(request.playbook, request.hosts.clone(), state.transcript.clone());
    state.jobs.lock().await.insert(job_id.clone(), job);
    Ok(Json(RunResponse {
        job_id,
        hosts: request.hosts,
    }))
}

async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> Json<StatusResponse> {
    state.evict_expired().await;
    let jobs = state.jobs.lock().await;
    Json(match jobs.get(&job_id) {
        Some(job) => job.status(&state.options),
        None => {
            debug!("status requested for unknown job {job_id}");
            StatusResponse {
                status: JobStatus::NotFound,
                progress: 0.0,
                output: String::new(),
            }
        }
    })
}

async fn cancel(State(state): State<AppState>, Json(request): Json<CancelRequest>) -> Json<CancelResponse> {
    let mut jobs = state.jobs.lock().await;
    let success = match jobs.get_mut(&request.job_id) {
        Some(job) => job.cancel(&state.options),
        None => false,
    };
    info!("job {}: cancel requested, success = {success}", request.job_id);
    Json(CancelResponse { success })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn state() -> AppState {
        AppState::new(
            Transcript::from_text("PLAY [p]\nTASK [t]\nok: [h]\n"),
            vec![PlaybookInfo {
                name: "replay".into(),
                path: "playbooks/replay.yml".into(),
                category: None,
                os: None,
                description: None,
            }],
            ReplayOptions {
                lines_per_tick: 1,
                tick: Duration::from_secs(1),
                final_status: JobStatus::Failed,
                retention: Duration::from_secs(300),
            },
        )
    }

    fn request(playbook: &str, hosts: &[&str]) -> RunRequest {
        RunRequest {
            playbook: playbook.into(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            extra_vars: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_then_poll_to_completion() {
        let state = state();
        let Json(started) = run(State(state.clone()), Json(request("playbooks/replay.yml", &["h"])))
            .await
            .expect("run");
        assert_eq!(12, started.job_id.len());

        let Json(first) = status(State(state.clone()), Path(started.job_id.clone())).await;
        assert_eq!(JobStatus::Running, first.status);
        assert_eq!("PLAY [p]\n", first.output);

        tokio::time::advance(Duration::from_secs(2)).await;
        let Json(last) = status(State(state.clone()), Path(started.job_id)).await;
        assert_eq!(JobStatus::Failed, last.status);
        assert!(last.output.ends_with("ok: [h]\n"));
    }

    #[tokio::test]
    async fn test_run_rejects_bad_requests() {
        let state = state();
        let err = run(State(state.clone()), Json(request("playbooks/replay.yml", &[])))
            .await
            .unwrap_err();
        assert_eq!(StatusCode::BAD_REQUEST, err.0);
        assert!(run(State(state), Json(request("other.yml", &["h"]))).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_jobs() {
        let state = state();
        let Json(response) = status(State(state.clone()), Path("missing".into())).await;
        assert_eq!(JobStatus::NotFound, response.status);
        let Json(response) = cancel(
            State(state),
            Json(CancelRequest {
                job_id: "missing".into(),
            }),
        )
        .await;
        assert!(!response.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_job() {
        let state = state();
        let Json(started) = run(State(state.clone()), Json(request("playbooks/replay.yml", &["h"])))
            .await
            .expect("run");
        let Json(response) = cancel(
            State(state.clone()),
            Json(CancelRequest {
                job_id: started.job_id.clone(),
            }),
        )
        .await;
        assert!(response.success);
        let Json(after) = status(State(state), Path(started.job_id)).await;
        assert_eq!(JobStatus::Cancelled, after.status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_jobs_are_evicted() {
        let state = state();
        let Json(old) = run(State(state.clone()), Json(request("playbooks/replay.yml", &["h"])))
            .await
            .expect("run");
        tokio::time::advance(Duration::from_secs(200)).await;
        let Json(recent) = run(State(state.clone()), Json(request("playbooks/replay.yml", &["h"])))
            .await
            .expect("run");
        assert_eq!(2, state.jobs.lock().await.len());

        tokio::time::advance(Duration::from_secs(150)).await;
        let Json(gone) = status(State(state.clone()), Path(old.job_id)).await;
        assert_eq!(JobStatus::NotFound, gone.status);
        let Json(kept) = status(State(state.clone()), Path(recent.job_id)).await;
        assert_eq!(JobStatus::Failed, kept.status);
        assert_eq!(1, state.jobs.lock().await.len());
    }
}
