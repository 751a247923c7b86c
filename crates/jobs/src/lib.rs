//! Follows backend generation tasks from submission to a terminal state.
//!
//! Each UI slot owns one [`PollerSession`]; [`JobsHandle`] keeps at most one
//! polling loop alive per slot and reports every state change as a
//! [`JobEvent`] on a crossbeam channel.

mod poller;
mod session;

pub use poller::{JobPoller, PollConfig, Timer, TokioTimer};
pub use session::{
    Diagnostics, JobFailure, PollerSession, ResultOutcome, SessionState, StatusOutcome, Tick,
    UNKNOWN_ERROR,
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use studio_client::{ClientError, TaskApi, TaskId, TaskResult, ToolRequest};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

pub const TIMEOUT_NOTICE: &str = "任务执行超时，请稍后查看历史记录";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("task creation failed: {0}")]
    Create(#[from] ClientError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    Submitted,
    Progress(u8),
    Succeeded(TaskResult),
    Failed(JobFailure),
    TimedOut,
    Cancelled,
    /// Status said success but the result could not be fetched.
    ResultUnavailable(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Submitted | JobStatus::Progress(_))
    }

    /// Message for the user, for statuses that need one.
    pub fn notice(&self) -> Option<String> {
        match self {
            JobStatus::TimedOut => Some(TIMEOUT_NOTICE.to_string()),
            JobStatus::Failed(failure) => Some(format!("任务执行失败: {}", failure.message)),
            JobStatus::ResultUnavailable(message) => Some(format!("获取结果失败: {message}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub slot: String,
    pub job_id: TaskId,
    pub status: JobStatus,
}

/// Slot registry. Cloning shares the registry and the event channel.
#[derive(Clone)]
pub struct JobsHandle {
    poller: Arc<JobPoller>,
    sessions: Arc<Mutex<HashMap<String, Arc<Mutex<PollerSession>>>>>,
    tx_events: Sender<JobEvent>,
    pub rx_events: Receiver<JobEvent>,
}

impl JobsHandle {
    pub fn new(api: Arc<dyn TaskApi>, timer: Arc<dyn Timer>, config: PollConfig) -> Self {
        let (tx_events, rx_events) = unbounded::<JobEvent>();
        let poller = JobPoller::new(api, timer, config, tx_events.clone());
        Self {
            poller: Arc::new(poller),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            tx_events,
            rx_events,
        }
    }

    /// Creates the task and starts following it in `slot`. Creation errors
    /// are returned as-is and leave the slot untouched.
    pub async fn submit(
        &self,
        slot: &str,
        request: &ToolRequest,
    ) -> Result<(TaskId, JoinHandle<SessionState>), JobError> {
        let job_id = self.poller.api().create_task(request).await?;
        info!(slot, tool = %request.tool, job_id = %job_id, "task submitted");
        let handle = self.follow(slot, job_id.clone());
        Ok((job_id, handle))
    }

    /// Starts polling an existing task in `slot`, replacing the slot's
    /// previous loop. Must be called inside a tokio runtime.
    pub fn follow(&self, slot: &str, job_id: TaskId) -> JoinHandle<SessionState> {
        let session = self.session(slot);
        let (generation, replaced) = {
            let mut session = session.lock();
            let replaced = session
                .is_following()
                .then(|| session.job_id().cloned())
                .flatten();
            (session.submit(job_id.clone()), replaced)
        };
        if let Some(old) = replaced {
            info!(slot, job_id = %old, "previous job in slot replaced");
            self.emit(slot, old, JobStatus::Cancelled);
        }
        self.emit(slot, job_id, JobStatus::Submitted);

        let poller = self.poller.clone();
        let slot = slot.to_string();
        tokio::spawn(async move { poller.run(&slot, &session, generation).await })
    }

    /// Stops the slot's loop. Returns whether a job was being followed.
    pub fn cancel(&self, slot: &str) -> bool {
        let Some(session) = self.sessions.lock().get(slot).cloned() else {
            return false;
        };
        let (stopped, job_id) = {
            let mut session = session.lock();
            (session.cancel(), session.job_id().cloned())
        };
        if let (true, Some(job_id)) = (stopped, job_id) {
            info!(slot, job_id = %job_id, "job cancelled");
            self.emit(slot, job_id, JobStatus::Cancelled);
        }
        stopped
    }

    pub fn state(&self, slot: &str) -> Option<SessionState> {
        let session = self.sessions.lock().get(slot).cloned()?;
        let state = session.lock().state();
        Some(state)
    }

    /// Details of the slot's last failure, for the details view.
    pub fn failure(&self, slot: &str) -> Option<JobFailure> {
        let session = self.sessions.lock().get(slot).cloned()?;
        let failure = session.lock().failure();
        failure
    }

    pub fn active_slots(&self) -> Vec<String> {
        let mut slots: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, session)| session.lock().is_active())
            .map(|(slot, _)| slot.clone())
            .collect();
        slots.sort();
        slots
    }

    fn session(&self, slot: &str) -> Arc<Mutex<PollerSession>> {
        let max_polls = self.poller.config().max_polls;
        self.sessions
            .lock()
            .entry(slot.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PollerSession::new(max_polls))))
            .clone()
    }

    fn emit(&self, slot: &str, job_id: TaskId, status: JobStatus) {
        let _ = self.tx_events.send(JobEvent {
            slot: slot.to_string(),
            job_id,
            status,
        });
    }
}
