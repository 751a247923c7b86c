//! Task wire types and the API seam the job poller drives.

use crate::error::Result;
use crate::tools::ToolRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Backend task identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Success,
    Failed,
    /// Any status string this client does not know; polled like `pending`.
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTaskResponse {
    pub task_id: String,
}

/// `GET /tasks/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    pub status: TaskState,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    /// Echo of the submitted input, sent while pending or after failure.
    #[serde(default)]
    pub input: Option<Value>,
    /// Upstream model request, when the backend recorded one.
    #[serde(default)]
    pub api_request: Option<Value>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tool_type: Option<String>,
}

impl TaskStatusResponse {
    pub fn new(status: TaskState) -> Self {
        Self {
            task_id: None,
            status,
            progress: None,
            error: None,
            input: None,
            api_request: None,
            prompt: None,
            tool_type: None,
        }
    }

    pub fn pending() -> Self {
        Self::new(TaskState::Pending)
    }

    pub fn success() -> Self {
        Self::new(TaskState::Success)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(TaskState::Failed)
        }
    }

    pub fn has_diagnostics(&self) -> bool {
        self.input.is_some() || self.api_request.is_some() || self.prompt.is_some()
    }
}

/// `GET /tasks/{id}/result`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub tool_type: String,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: TaskOutput,
}

/// Tool output. Known keys are typed, everything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Best single textual rendering of the output.
    pub fn summary(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.description.as_deref())
            .or(self.style_description.as_deref())
            .or(self.video_url.as_deref())
            .or(self.image_path.as_deref())
            .or(self.audio_path.as_deref())
    }
}

/// The three calls a job lifecycle needs.
#[async_trait::async_trait]
pub trait TaskApi: Send + Sync {
    /// `POST /tools/{tool}/create`
    async fn create_task(&self, request: &ToolRequest) -> Result<TaskId>;

    /// `GET /tasks/{id}/status`
    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse>;

    /// `GET /tasks/{id}/result`; only valid once the status is `success`.
    async fn task_result(&self, task_id: &TaskId) -> Result<TaskResult>;
}
