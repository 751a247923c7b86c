use crate::config::StudioConfig;
use crate::error::{error_detail, ClientError, Result};
use crate::history::{HistoryPage, HistoryQuery, HistoryRecord, ReusedInput};
use crate::materials::{MaterialKind, MaterialRef};
use crate::shots::{Shot, ShotPatch, ShotStore, StoryboardRecord};
use crate::tasks::{CreateTaskResponse, TaskApi, TaskId, TaskResult, TaskStatusResponse};
use crate::tools::ToolRequest;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// REST client for the studio backend
pub struct StudioClient {
    base_url: String,
    client: reqwest::Client,
}

impl StudioClient {
    pub fn new(config: &StudioConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client: builder.build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends the request and maps non-2xx answers to `ClientError::Http`.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body);
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(detail));
        }
        Err(ClientError::Http {
            status: status.as_u16(),
            detail,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let body = self.send(request).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// `GET /materials/{kind}`
    pub async fn list_materials(&self, kind: MaterialKind) -> Result<Vec<MaterialRef>> {
        self.json(self.client.get(self.url(&format!("materials/{}", kind.api_path()))))
            .await
    }

    pub async fn list_history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        self.json(self.client.get(self.url("tools/history")).query(&query.params()))
            .await
    }

    pub async fn get_history(&self, record_id: &str) -> Result<HistoryRecord> {
        self.json(self.client.get(self.url(&format!("tools/history/{record_id}"))))
            .await
    }

    pub async fn delete_history(&self, record_id: &str) -> Result<()> {
        self.send(self.client.delete(self.url(&format!("tools/history/{record_id}"))))
            .await?;
        Ok(())
    }

    pub async fn reuse_history(&self, record_id: &str) -> Result<ReusedInput> {
        self.json(
            self.client
                .get(self.url(&format!("tools/history/{record_id}/reuse"))),
        )
        .await
    }

    pub async fn get_storyboard(
        &self,
        work_id: &str,
        episode_id: &str,
    ) -> Result<StoryboardRecord> {
        self.json(
            self.client
                .get(self.url(&format!("episodes/{work_id}/{episode_id}/storyboard"))),
        )
        .await
    }

    pub async fn save_storyboard_text(
        &self,
        work_id: &str,
        episode_id: &str,
        text: &str,
    ) -> Result<()> {
        let form = Form::new().text("text", text.to_string());
        self.send(
            self.client
                .post(self.url(&format!("episodes/{work_id}/{episode_id}/storyboard/text")))
                .multipart(form),
        )
        .await?;
        debug!(work_id, episode_id, bytes = text.len(), "storyboard text saved");
        Ok(())
    }

    /// Turns the saved storyboard text into shot records.
    pub async fn confirm_storyboard(
        &self,
        work_id: &str,
        episode_id: &str,
    ) -> Result<StoryboardRecord> {
        self.json(
            self.client
                .post(self.url(&format!("content/{work_id}/{episode_id}/confirm-storyboard"))),
        )
        .await
    }

    pub async fn get_shot(&self, work_id: &str, episode_id: &str, shot_id: &str) -> Result<Shot> {
        self.json(
            self.client
                .get(self.url(&format!("content/{work_id}/{episode_id}/{shot_id}"))),
        )
        .await
    }
}

#[async_trait::async_trait]
impl TaskApi for StudioClient {
    async fn create_task(&self, request: &ToolRequest) -> Result<TaskId> {
        request.validate()?;
        let mut form = Form::new();
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }
        for file in &request.files {
            let part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
            form = form.part(file.field.clone(), part);
        }

        let response: CreateTaskResponse = self
            .json(
                self.client
                    .post(self.url(&format!("tools/{}/create", request.tool.id())))
                    .multipart(form),
            )
            .await?;
        debug!(tool = %request.tool, task_id = %response.task_id, "task created");
        Ok(TaskId(response.task_id))
    }

    async fn task_status(&self, task_id: &TaskId) -> Result<TaskStatusResponse> {
        self.json(self.client.get(self.url(&format!("tasks/{task_id}/status"))))
            .await
    }

    async fn task_result(&self, task_id: &TaskId) -> Result<TaskResult> {
        self.json(self.client.get(self.url(&format!("tasks/{task_id}/result"))))
            .await
    }
}

#[async_trait::async_trait]
impl ShotStore for StudioClient {
    async fn update_shot(
        &self,
        work_id: &str,
        episode_id: &str,
        shot_id: &str,
        patch: &ShotPatch,
    ) -> Result<()> {
        let mut form = Form::new();
        for (name, value) in patch.form_fields()? {
            form = form.text(name, value);
        }
        self.send(
            self.client
                .put(self.url(&format!("content/{work_id}/{episode_id}/{shot_id}")))
                .multipart(form),
        )
        .await?;
        debug!(shot_id, "shot updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolType;

    #[test]
    fn test_url_joining() {
        let client = StudioClient::new(&StudioConfig::new("http://localhost:8000/api/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(
            client.url("/tasks/t1/status"),
            "http://localhost:8000/api/tasks/t1/status"
        );
        assert_eq!(client.url("tools/history"), "http://localhost:8000/api/tools/history");
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_sending() {
        // nothing listens on port 9; validation must fail first
        let client = StudioClient::new(&StudioConfig::new("http://127.0.0.1:9/api")).unwrap();
        let request = ToolRequest::new(ToolType::TextToAudio).field("text", "雨声");
        let err = client.create_task(&request).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient() {
        let config = StudioConfig::new("http://127.0.0.1:9/api").with_timeout(2);
        let client = StudioClient::new(&config).unwrap();
        let err = client.task_status(&TaskId::from("t1")).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
