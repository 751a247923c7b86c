use crate::session::{PollerSession, ResultOutcome, SessionState, StatusOutcome, Tick};
use crate::{JobEvent, JobStatus};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use studio_client::{StudioConfig, TaskApi, TaskId};
use tracing::{debug, info, warn};

/// Sleep seam so tests can run the loop without waiting.
#[async_trait::async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioTimer;

#[async_trait::async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_polls: u32,
    pub result_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_polls: 150,
            result_delay: Duration::from_millis(500),
        }
    }
}

impl From<&StudioConfig> for PollConfig {
    fn from(config: &StudioConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            max_polls: config.max_polls,
            result_delay: config.result_delay(),
        }
    }
}

/// Drives sessions against a task API and reports over the event channel.
pub struct JobPoller {
    api: Arc<dyn TaskApi>,
    timer: Arc<dyn Timer>,
    config: PollConfig,
    tx_events: Sender<JobEvent>,
}

impl JobPoller {
    pub fn new(
        api: Arc<dyn TaskApi>,
        timer: Arc<dyn Timer>,
        config: PollConfig,
        tx_events: Sender<JobEvent>,
    ) -> Self {
        Self {
            api,
            timer,
            config,
            tx_events,
        }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    pub fn api(&self) -> &Arc<dyn TaskApi> {
        &self.api
    }

    fn emit(&self, slot: &str, job_id: &TaskId, status: JobStatus) {
        let _ = self.tx_events.send(JobEvent {
            slot: slot.to_string(),
            job_id: job_id.clone(),
            status,
        });
    }

    /// Follows the session's job until it ends or the session moves on to
    /// another generation. Returns the state the loop left the session in.
    pub async fn run(
        &self,
        slot: &str,
        session: &Mutex<PollerSession>,
        generation: u64,
    ) -> SessionState {
        loop {
            self.timer.sleep(self.config.interval).await;

            let tick = {
                let mut session = session.lock();
                if session.generation() != generation {
                    // cancelled or replaced by a newer job
                    return SessionState::Cancelled;
                }
                session.on_tick()
            };

            let (job_id, request_generation) = match tick {
                Tick::Inactive => return session.lock().state(),
                Tick::Busy => continue,
                Tick::TimedOut => {
                    let job_id = session.lock().job_id().cloned();
                    if let Some(job_id) = job_id {
                        info!(slot, job_id = %job_id, "job timed out");
                        self.emit(slot, &job_id, JobStatus::TimedOut);
                    }
                    return SessionState::TimedOut;
                }
                Tick::RequestStatus { job_id, generation } => (job_id, generation),
            };

            let response = self.api.task_status(&job_id).await;
            if let Err(err) = &response {
                warn!(
                    slot,
                    job_id = %job_id,
                    error = %err,
                    transient = err.is_transient(),
                    "status poll failed, retrying"
                );
            }
            let outcome = session.lock().on_status(request_generation, response);

            match outcome {
                StatusOutcome::Ignored | StatusOutcome::Retry => {}
                StatusOutcome::Pending { progress } => {
                    debug!(slot, job_id = %job_id, progress, "job pending");
                    self.emit(slot, &job_id, JobStatus::Progress(progress));
                }
                StatusOutcome::Failed { message } => {
                    info!(slot, job_id = %job_id, %message, "job failed");
                    let failure = session.lock().failure();
                    if let Some(failure) = failure {
                        self.emit(slot, &job_id, JobStatus::Failed(failure));
                    }
                    return SessionState::Failed;
                }
                StatusOutcome::FetchResult { job_id, generation } => {
                    self.emit(slot, &job_id, JobStatus::Progress(100));
                    self.timer.sleep(self.config.result_delay).await;
                    if session.lock().generation() != generation {
                        return SessionState::Cancelled;
                    }
                    let result = self.api.task_result(&job_id).await;
                    let outcome = session.lock().on_result(generation, result);
                    match outcome {
                        ResultOutcome::Delivered(result) => {
                            info!(slot, job_id = %job_id, "job succeeded");
                            self.emit(slot, &job_id, JobStatus::Succeeded(result));
                        }
                        ResultOutcome::Unavailable(message) => {
                            warn!(slot, job_id = %job_id, %message, "result fetch failed");
                            self.emit(slot, &job_id, JobStatus::ResultUnavailable(message));
                        }
                        ResultOutcome::Ignored => return SessionState::Cancelled,
                    }
                    return SessionState::Succeeded;
                }
            }
        }
    }
}
