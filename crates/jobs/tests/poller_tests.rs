use jobs::{JobEvent, JobStatus, JobsHandle, PollConfig, SessionState, Timer, TIMEOUT_NOTICE};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use studio_client::{
    ClientError, TaskApi, TaskId, TaskOutput, TaskResult, TaskStatusResponse, ToolRequest,
    ToolType,
};
use tokio::sync::Notify;

struct InstantTimer {
    sleeps: Mutex<Vec<Duration>>,
}

impl InstantTimer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sleeps: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl Timer for InstantTimer {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Instant, except the first result delay blocks until `release` is notified.
struct GatedTimer {
    in_result_delay: AtomicBool,
    release: Notify,
}

impl GatedTimer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            in_result_delay: AtomicBool::new(false),
            release: Notify::new(),
        })
    }
}

#[async_trait::async_trait]
impl Timer for GatedTimer {
    async fn sleep(&self, duration: Duration) {
        let result_delay = PollConfig::default().result_delay;
        if duration == result_delay && !self.in_result_delay.swap(true, Ordering::SeqCst) {
            self.release.notified().await;
            return;
        }
        tokio::task::yield_now().await;
    }
}

/// Answers status polls from a script, then `pending` forever.
/// Polls of `gated_job` block until `release` is notified.
struct ScriptedApi {
    script: Mutex<VecDeque<Result<TaskStatusResponse, ClientError>>>,
    status_calls: Mutex<Vec<TaskId>>,
    result_calls: AtomicUsize,
    create_error: Option<String>,
    gated_job: Option<TaskId>,
    release: Notify,
}

impl ScriptedApi {
    fn new(script: Vec<Result<TaskStatusResponse, ClientError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            status_calls: Mutex::new(Vec::new()),
            result_calls: AtomicUsize::new(0),
            create_error: None,
            gated_job: None,
            release: Notify::new(),
        }
    }

    fn pending_then_success(pending: usize) -> Self {
        let mut script: Vec<_> = (0..pending)
            .map(|_| Ok(TaskStatusResponse::pending()))
            .collect();
        script.push(Ok(TaskStatusResponse::success()));
        Self::new(script)
    }

    fn gated(job: &str) -> Self {
        Self {
            gated_job: Some(TaskId::from(job)),
            ..Self::new(vec![Ok(TaskStatusResponse::success())])
        }
    }

    fn status_calls(&self) -> usize {
        self.status_calls.lock().len()
    }

    fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TaskApi for ScriptedApi {
    async fn create_task(&self, request: &ToolRequest) -> studio_client::Result<TaskId> {
        if let Some(message) = &self.create_error {
            return Err(ClientError::Http {
                status: 400,
                detail: message.clone(),
            });
        }
        Ok(TaskId(format!("{}-1", request.tool.id())))
    }

    async fn task_status(&self, task_id: &TaskId) -> studio_client::Result<TaskStatusResponse> {
        self.status_calls.lock().push(task_id.clone());
        if self.gated_job.as_ref() == Some(task_id) {
            self.release.notified().await;
            return Ok(TaskStatusResponse::success());
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(TaskStatusResponse::pending()))
    }

    async fn task_result(&self, task_id: &TaskId) -> studio_client::Result<TaskResult> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TaskResult {
            task_id: Some(task_id.to_string()),
            tool_type: "generate_script".into(),
            input: None,
            output: TaskOutput::text("第一场 夜 外"),
        })
    }
}

fn handle(api: Arc<ScriptedApi>, timer: Arc<InstantTimer>) -> JobsHandle {
    JobsHandle::new(api, timer, PollConfig::default())
}

fn events(handle: &JobsHandle) -> Vec<JobEvent> {
    handle.rx_events.try_iter().collect()
}

fn terminal(events: &[JobEvent]) -> Vec<&JobStatus> {
    events
        .iter()
        .map(|event| &event.status)
        .filter(|status| status.is_terminal())
        .collect()
}

fn terminal_for<'a>(events: &'a [JobEvent], job: &str) -> Vec<&'a JobStatus> {
    events
        .iter()
        .filter(|event| event.job_id == TaskId::from(job) && event.status.is_terminal())
        .map(|event| &event.status)
        .collect()
}

async fn wait_for_status_calls(api: &ScriptedApi, count: usize) {
    while api.status_calls() < count {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_success_on_last_allowed_poll() {
    let api = Arc::new(ScriptedApi::pending_then_success(149));
    let timer = InstantTimer::new();
    let jobs = handle(api.clone(), timer.clone());

    let state = jobs.follow("tool", TaskId::from("t1")).await.unwrap();
    assert_eq!(state, SessionState::Succeeded);
    assert_eq!(api.status_calls(), 150);
    assert_eq!(api.result_calls(), 1);

    let events = events(&jobs);
    assert!(matches!(events[0].status, JobStatus::Submitted));
    match terminal(&events).as_slice() {
        [JobStatus::Succeeded(result)] => {
            assert_eq!(result.output.text.as_deref(), Some("第一场 夜 外"))
        }
        other => panic!("unexpected terminal events {other:?}"),
    }

    let sleeps = timer.sleeps.lock();
    assert_eq!(sleeps.len(), 151);
    assert!(sleeps[..150].iter().all(|d| *d == Duration::from_millis(2000)));
    assert_eq!(sleeps[150], Duration::from_millis(500));
}

#[tokio::test]
async fn test_timeout_after_budget_without_result_fetch() {
    let api = Arc::new(ScriptedApi::pending_then_success(151));
    let jobs = handle(api.clone(), InstantTimer::new());

    let state = jobs.follow("tool", TaskId::from("t1")).await.unwrap();
    assert_eq!(state, SessionState::TimedOut);
    assert_eq!(api.status_calls(), 150);
    assert_eq!(api.result_calls(), 0);

    let events = events(&jobs);
    let terminal = terminal(&events);
    assert!(matches!(terminal.as_slice(), [JobStatus::TimedOut]));
    assert_eq!(terminal[0].notice().as_deref(), Some(TIMEOUT_NOTICE));

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|event| match event.status {
            JobStatus::Progress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 150);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&90));
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let api = Arc::new(ScriptedApi::new(vec![
        Err(ClientError::Transport("connection reset".into())),
        Err(ClientError::Http {
            status: 502,
            detail: "bad gateway".into(),
        }),
        Ok(TaskStatusResponse::pending()),
        Ok(TaskStatusResponse::success()),
    ]));
    let jobs = handle(api.clone(), InstantTimer::new());

    let state = jobs.follow("tool", TaskId::from("t1")).await.unwrap();
    assert_eq!(state, SessionState::Succeeded);
    assert_eq!(api.status_calls(), 4);
    assert_eq!(api.result_calls(), 1);
}

#[tokio::test]
async fn test_failure_carries_backend_message() {
    let mut pending = TaskStatusResponse::pending();
    pending.prompt = Some("雨夜街道".into());
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(pending),
        Ok(TaskStatusResponse::failed("余额不足")),
    ]));
    let jobs = handle(api.clone(), InstantTimer::new());

    let state = jobs.follow("tool", TaskId::from("t1")).await.unwrap();
    assert_eq!(state, SessionState::Failed);
    assert_eq!(api.result_calls(), 0);

    let events = events(&jobs);
    match terminal(&events).as_slice() {
        [status @ JobStatus::Failed(failure)] => {
            assert_eq!(failure.message, "余额不足");
            assert_eq!(status.notice().as_deref(), Some("任务执行失败: 余额不足"));
        }
        other => panic!("unexpected terminal events {other:?}"),
    }
    let failure = jobs.failure("tool").unwrap();
    assert_eq!(failure.diagnostics.prompt.as_deref(), Some("雨夜街道"));
}

#[tokio::test]
async fn test_cancel_ignores_in_flight_response() {
    let api = Arc::new(ScriptedApi::gated("t1"));
    let jobs = handle(api.clone(), InstantTimer::new());

    let loop_handle = jobs.follow("shot-3", TaskId::from("t1"));
    wait_for_status_calls(&api, 1).await;
    assert_eq!(jobs.active_slots(), vec!["shot-3".to_string()]);

    assert!(jobs.cancel("shot-3"));
    api.release.notify_one();

    let state = loop_handle.await.unwrap();
    assert_eq!(state, SessionState::Cancelled);
    assert_eq!(api.status_calls(), 1);
    assert_eq!(api.result_calls(), 0);
    assert!(jobs.active_slots().is_empty());
    assert!(!jobs.cancel("shot-3"));

    let events = events(&jobs);
    assert!(matches!(terminal(&events).as_slice(), [JobStatus::Cancelled]));
}

#[tokio::test]
async fn test_resubmit_replaces_slot_loop() {
    let api = Arc::new(ScriptedApi::gated("old"));
    let jobs = handle(api.clone(), InstantTimer::new());

    let old_loop = jobs.follow("shot-1", TaskId::from("old"));
    wait_for_status_calls(&api, 1).await;

    let new_state = jobs.follow("shot-1", TaskId::from("new")).await.unwrap();
    assert_eq!(new_state, SessionState::Succeeded);

    api.release.notify_one();
    assert_eq!(old_loop.await.unwrap(), SessionState::Cancelled);

    assert_eq!(api.result_calls(), 1);
    let events = events(&jobs);
    let old_terminal: Vec<_> = events
        .iter()
        .filter(|event| event.job_id == TaskId::from("old") && event.status.is_terminal())
        .map(|event| &event.status)
        .collect();
    assert!(matches!(old_terminal.as_slice(), [JobStatus::Cancelled]));
    assert!(events.iter().any(|event| {
        event.job_id == TaskId::from("new") && matches!(event.status, JobStatus::Succeeded(_))
    }));
}

#[tokio::test]
async fn test_resubmit_during_result_delay_cancels_old_job() {
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(TaskStatusResponse::success()),
        Ok(TaskStatusResponse::success()),
    ]));
    let timer = GatedTimer::new();
    let jobs = JobsHandle::new(api.clone(), timer.clone(), PollConfig::default());

    let old_loop = jobs.follow("shot-1", TaskId::from("old"));
    while !timer.in_result_delay.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }
    assert_eq!(jobs.state("shot-1"), Some(SessionState::Succeeded));

    let new_state = jobs.follow("shot-1", TaskId::from("new")).await.unwrap();
    assert_eq!(new_state, SessionState::Succeeded);

    timer.release.notify_one();
    assert_eq!(old_loop.await.unwrap(), SessionState::Cancelled);
    assert_eq!(api.result_calls(), 1);

    let events = events(&jobs);
    assert!(matches!(terminal_for(&events, "old").as_slice(), [JobStatus::Cancelled]));
    assert!(matches!(terminal_for(&events, "new").as_slice(), [JobStatus::Succeeded(_)]));
}

#[tokio::test]
async fn test_slots_poll_independently() {
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(TaskStatusResponse::success()),
        Ok(TaskStatusResponse::success()),
    ]));
    let jobs = handle(api.clone(), InstantTimer::new());

    let first = jobs.follow("shot-1", TaskId::from("a"));
    let second = jobs.follow("shot-2", TaskId::from("b"));
    assert_eq!(first.await.unwrap(), SessionState::Succeeded);
    assert_eq!(second.await.unwrap(), SessionState::Succeeded);
    assert_eq!(jobs.state("shot-1"), Some(SessionState::Succeeded));
    assert_eq!(jobs.state("shot-2"), Some(SessionState::Succeeded));
    assert_eq!(api.result_calls(), 2);
}

#[tokio::test]
async fn test_submit_creates_then_follows() {
    let api = Arc::new(ScriptedApi::pending_then_success(0));
    let jobs = handle(api.clone(), InstantTimer::new());

    let request = ToolRequest::new(ToolType::GenerateScript).field("description", "雨夜重逢");
    let (job_id, loop_handle) = jobs.submit("tool", &request).await.unwrap();
    assert_eq!(job_id, TaskId::from("generate_script-1"));
    assert_eq!(loop_handle.await.unwrap(), SessionState::Succeeded);
    assert_eq!(api.status_calls.lock()[0], job_id);
}

#[tokio::test]
async fn test_creation_error_is_propagated() {
    let api = Arc::new(ScriptedApi {
        create_error: Some("缺少参数".into()),
        ..ScriptedApi::new(Vec::new())
    });
    let jobs = handle(api.clone(), InstantTimer::new());

    let request = ToolRequest::new(ToolType::GenerateScript).field("description", "雨夜重逢");
    let err = jobs.submit("tool", &request).await.unwrap_err();
    assert!(err.to_string().contains("缺少参数"));
    assert_eq!(jobs.state("tool"), None);
    assert_eq!(api.status_calls(), 0);
    assert!(events(&jobs).is_empty());
}
