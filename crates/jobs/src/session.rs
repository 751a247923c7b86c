//! Polling state of one UI slot, free of any timer or I/O.
//!
//! The driver asks the session what to do on every tick and feeds the
//! responses back. Every response carries the generation it was requested
//! under; a response from an older generation is ignored, which is how a
//! cancelled or replaced loop loses its in-flight request.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use studio_client::{ClientError, TaskId, TaskResult, TaskState, TaskStatusResponse};
use uuid::Uuid;

/// Shown when the backend fails a task without a message.
pub const UNKNOWN_ERROR: &str = "未知错误";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Submitted | SessionState::Polling)
    }
}

/// Task details kept for the on-demand details view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub input: Option<Value>,
    pub api_request: Option<Value>,
    pub prompt: Option<String>,
    pub tool_type: Option<String>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.api_request.is_none() && self.prompt.is_none()
    }

    /// Keeps earlier values for fields the response leaves out.
    fn merge(&mut self, status: &TaskStatusResponse) {
        if let Some(input) = &status.input {
            self.input = Some(input.clone());
        }
        if let Some(request) = &status.api_request {
            self.api_request = Some(request.clone());
        }
        if let Some(prompt) = &status.prompt {
            self.prompt = Some(prompt.clone());
        }
        if let Some(tool) = &status.tool_type {
            self.tool_type = Some(tool.clone());
        }
    }
}

/// A terminal backend failure with what the backend echoed about the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to poll; the loop should stop.
    Inactive,
    /// The previous request has not answered yet; try again next tick.
    Busy,
    /// Poll budget exhausted.
    TimedOut,
    RequestStatus { job_id: TaskId, generation: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Ignored,
    Retry,
    Pending { progress: u8 },
    FetchResult { job_id: TaskId, generation: u64 },
    Failed { message: String },
}

#[derive(Debug)]
pub enum ResultOutcome {
    Ignored,
    Delivered(TaskResult),
    Unavailable(String),
}

#[derive(Debug)]
pub struct PollerSession {
    id: Uuid,
    max_polls: u32,
    state: SessionState,
    job_id: Option<TaskId>,
    generation: u64,
    poll_count: u32,
    in_flight: bool,
    awaiting_result: bool,
    failure_message: Option<String>,
    diagnostics: Diagnostics,
}

impl PollerSession {
    pub fn new(max_polls: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            max_polls,
            state: SessionState::Idle,
            job_id: None,
            generation: 0,
            poll_count: 0,
            in_flight: false,
            awaiting_result: false,
            failure_message: None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn job_id(&self) -> Option<&TaskId> {
        self.job_id.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Still owes its current job a terminal outcome, including the pause
    /// between a success status and the result fetch.
    pub fn is_following(&self) -> bool {
        self.is_active() || self.awaiting_result
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Starts polling `job_id`, dropping whatever loop ran before.
    /// Returns the new generation.
    pub fn submit(&mut self, job_id: TaskId) -> u64 {
        self.generation += 1;
        self.job_id = Some(job_id);
        self.poll_count = 0;
        self.in_flight = false;
        self.awaiting_result = false;
        self.failure_message = None;
        self.diagnostics = Diagnostics::default();
        self.state = SessionState::Submitted;
        self.generation
    }

    pub fn on_tick(&mut self) -> Tick {
        if !self.is_active() {
            return Tick::Inactive;
        }
        if self.in_flight {
            return Tick::Busy;
        }
        let Some(job_id) = self.job_id.clone() else {
            return Tick::Inactive;
        };
        self.poll_count += 1;
        if self.poll_count > self.max_polls {
            self.state = SessionState::TimedOut;
            return Tick::TimedOut;
        }
        self.state = SessionState::Polling;
        self.in_flight = true;
        Tick::RequestStatus {
            job_id,
            generation: self.generation,
        }
    }

    pub fn on_status(
        &mut self,
        generation: u64,
        response: Result<TaskStatusResponse, ClientError>,
    ) -> StatusOutcome {
        if generation != self.generation || !self.is_active() {
            return StatusOutcome::Ignored;
        }
        self.in_flight = false;

        let status = match response {
            Ok(status) => status,
            Err(_) => return StatusOutcome::Retry,
        };
        self.diagnostics.merge(&status);

        match status.status {
            TaskState::Pending | TaskState::Unknown => StatusOutcome::Pending {
                progress: self.estimated_progress(),
            },
            TaskState::Success => {
                self.state = SessionState::Succeeded;
                self.awaiting_result = true;
                match self.job_id.clone() {
                    Some(job_id) => StatusOutcome::FetchResult {
                        job_id,
                        generation: self.generation,
                    },
                    None => StatusOutcome::Ignored,
                }
            }
            TaskState::Failed => {
                let message = status
                    .error
                    .filter(|error| !error.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
                self.state = SessionState::Failed;
                self.failure_message = Some(message.clone());
                StatusOutcome::Failed { message }
            }
        }
    }

    pub fn on_result(
        &mut self,
        generation: u64,
        result: Result<TaskResult, ClientError>,
    ) -> ResultOutcome {
        if generation != self.generation
            || self.state != SessionState::Succeeded
            || !self.awaiting_result
        {
            return ResultOutcome::Ignored;
        }
        self.awaiting_result = false;
        match result {
            Ok(result) => ResultOutcome::Delivered(result),
            Err(err) => ResultOutcome::Unavailable(err.to_string()),
        }
    }

    /// Stops the loop. Returns whether a job was still being followed.
    pub fn cancel(&mut self) -> bool {
        let was_running = self.is_following();
        self.generation += 1;
        self.poll_count = 0;
        self.in_flight = false;
        self.awaiting_result = false;
        if was_running {
            self.state = SessionState::Cancelled;
        }
        was_running
    }

    pub fn failure(&self) -> Option<JobFailure> {
        let message = self.failure_message.clone()?;
        Some(JobFailure {
            message,
            diagnostics: self.diagnostics.clone(),
        })
    }

    /// Linear estimate capped at 90 until the backend reports success.
    fn estimated_progress(&self) -> u8 {
        if self.max_polls == 0 {
            return 0;
        }
        let estimate = u64::from(self.poll_count) * 90 / u64::from(self.max_polls);
        estimate.min(90) as u8
    }
}
