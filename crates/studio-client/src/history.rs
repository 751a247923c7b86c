use crate::tools::ToolType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub tool_type: Option<ToolType>,
    pub page: u32,
    pub limit: u32,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            tool_type: None,
            page: 1,
            limit: 20,
        }
    }
}

impl HistoryQuery {
    pub fn for_tool(tool: ToolType) -> Self {
        Self {
            tool_type: Some(tool),
            ..Self::default()
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub(crate) fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("page", self.page.to_string()), ("limit", self.limit.to_string())];
        if let Some(tool) = self.tool_type {
            params.push(("tool_type", tool.id().to_string()));
        }
        params
    }
}

/// One finished tool run as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub record_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub tool_type: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl HistoryRecord {
    pub fn tool(&self) -> Option<ToolType> {
        self.tool_type.parse().ok()
    }

    /// The backend writes local ISO timestamps without an offset.
    pub fn created_at(&self) -> Option<NaiveDateTime> {
        let raw = self.created_at.as_deref()?;
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
    }

    /// Upstream request/response recorded alongside the output, if any.
    pub fn api_exchange(&self) -> Option<(&Value, Option<&Value>)> {
        let request = self.output.get("api_request")?;
        Some((request, self.output.get("api_response")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
}

impl HistoryPage {
    pub fn has_more(&self) -> bool {
        u64::from(self.page) * u64::from(self.limit) < self.total
    }
}

/// `GET /tools/history/{id}/reuse`: the inputs to re-run a record with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReusedInput {
    #[serde(default)]
    pub tool_type: Option<String>,
    #[serde(default)]
    pub input: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        let params = HistoryQuery::for_tool(ToolType::TextToImage).page(0).params();
        assert_eq!(
            params,
            vec![
                ("page", "1".to_string()),
                ("limit", "20".to_string()),
                ("tool_type", "text_to_image".to_string()),
            ]
        );
        assert_eq!(HistoryQuery::default().params().len(), 2);
    }

    #[test]
    fn test_record_decoding() {
        let page: HistoryPage = serde_json::from_str(
            r#"{"records":[{"record_id":"r1","task_id":"t1","tool_type":"generate_script",
                "input":{"description":"d"},"output":{"text":"x","api_request":{"model":"m"}},
                "created_at":"2025-01-02T03:04:05.123456"}],
                "total":21,"page":1,"limit":20}"#,
        )
        .unwrap();
        let record = &page.records[0];
        assert_eq!(record.tool(), Some(ToolType::GenerateScript));
        let created = record.created_at().unwrap();
        assert_eq!(created.format("%Y-%m-%d %H:%M").to_string(), "2025-01-02 03:04");
        let (request, response) = record.api_exchange().unwrap();
        assert_eq!(request["model"], "m");
        assert!(response.is_none());
        assert!(page.has_more());
    }

    #[test]
    fn test_empty_history() {
        let page: HistoryPage =
            serde_json::from_str(r#"{"records":[],"total":0,"page":1,"limit":20}"#).unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more());
    }
}
