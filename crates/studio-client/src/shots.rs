//! Shot records and the optimistic local cache of an episode's shots.
//!
//! The backend is authoritative. Local edits are applied immediately and
//! tracked as pending writes until `flush` has sent them; `reconcile` with a
//! fresh backend listing wins over anything still pending.

use crate::error::{ClientError, Result};
use crate::materials::MaterialSelectionSession;
use crate::tools::ToolRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use storyboard_text::{PromptField, ShotPrompts};
use tracing::{debug, warn};

/// Surrounding shots sent with a prompt request, per side.
pub const NEIGHBOR_SHOTS: usize = 3;

/// Used when a shot has no duration yet.
pub const DEFAULT_SHOT_DURATION: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoHistoryEntry {
    pub video_path: String,
    #[serde(default)]
    pub generated_at: Option<String>,
}

/// Backend shot record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: String,
    /// Shot number from the storyboard text; older records store an integer.
    #[serde(default)]
    pub order: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub related_materials: Vec<String>,
    #[serde(default)]
    pub duration: u32,
    #[serde(flatten)]
    pub prompts: ShotPrompts,
    #[serde(default)]
    pub selected_image: Option<String>,
    #[serde(default)]
    pub video_task_id: Option<String>,
    #[serde(default)]
    pub current_video: Option<String>,
    #[serde(default)]
    pub video_history: Vec<VideoHistoryEntry>,
}

impl Shot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The video the preview should play: the current one, or the only
    /// history entry when none is selected.
    pub fn effective_video(&self) -> Option<&str> {
        match (&self.current_video, self.video_history.as_slice()) {
            (Some(current), _) => Some(current.as_str()),
            (None, [only]) => Some(only.video_path.as_str()),
            _ => None,
        }
    }
}

/// `GET /episodes/{work}/{episode}/storyboard` and the confirm response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryboardRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub related_materials: Vec<String>,
    #[serde(default)]
    pub shots: Vec<Shot>,
}

/// Partial shot update; only `Some` fields are sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShotPatch {
    pub description: Option<String>,
    pub image_prompt: Option<String>,
    pub video_prompt: Option<String>,
    pub audio_prompt: Option<String>,
    pub duration: Option<u32>,
    pub reference_video_prompt: Option<String>,
    pub dialogue_prompt: Option<String>,
    pub video_task_id: Option<String>,
    pub current_video: Option<String>,
    pub video_history: Option<Vec<VideoHistoryEntry>>,
}

impl ShotPatch {
    pub fn prompt(field: PromptField, value: impl Into<String>) -> Self {
        let mut patch = Self::default();
        *patch.prompt_slot(field) = Some(value.into());
        patch
    }

    pub fn duration(duration: u32) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    /// The current video and the full history it belongs to.
    pub fn video(current: impl Into<String>, history: Vec<VideoHistoryEntry>) -> Self {
        Self {
            current_video: Some(current.into()),
            video_history: Some(history),
            ..Self::default()
        }
    }

    fn prompt_slot(&mut self, field: PromptField) -> &mut Option<String> {
        match field {
            PromptField::Image => &mut self.image_prompt,
            PromptField::Video => &mut self.video_prompt,
            PromptField::ReferenceVideo => &mut self.reference_video_prompt,
            PromptField::Audio => &mut self.audio_prompt,
            PromptField::Dialogue => &mut self.dialogue_prompt,
        }
    }

    /// Every prompt section of `prompts`, empty ones included.
    pub fn all_prompts(prompts: &ShotPrompts) -> Self {
        let mut patch = Self::default();
        for field in PromptField::ALL {
            *patch.prompt_slot(field) = Some(prompts.get(field).to_string());
        }
        patch
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fields set in `later` win.
    pub fn merge(&mut self, later: ShotPatch) {
        macro_rules! take {
            ($($field:ident),*) => {
                $( if later.$field.is_some() { self.$field = later.$field; } )*
            };
        }
        take!(
            description,
            image_prompt,
            video_prompt,
            audio_prompt,
            duration,
            reference_video_prompt,
            dialogue_prompt,
            video_task_id,
            current_video,
            video_history
        );
    }

    pub fn apply_to(&self, shot: &mut Shot) {
        if let Some(description) = &self.description {
            shot.description = description.clone();
        }
        for field in PromptField::ALL {
            if let Some(value) = self.prompt_value(field) {
                *shot.prompts.get_mut(field) = value.to_string();
            }
        }
        if let Some(duration) = self.duration {
            shot.duration = duration;
        }
        if let Some(task_id) = &self.video_task_id {
            shot.video_task_id = Some(task_id.clone());
        }
        if let Some(current) = &self.current_video {
            shot.current_video = Some(current.clone());
        }
        if let Some(history) = &self.video_history {
            shot.video_history = history.clone();
        }
    }

    fn prompt_value(&self, field: PromptField) -> Option<&str> {
        match field {
            PromptField::Image => self.image_prompt.as_deref(),
            PromptField::Video => self.video_prompt.as_deref(),
            PromptField::ReferenceVideo => self.reference_video_prompt.as_deref(),
            PromptField::Audio => self.audio_prompt.as_deref(),
            PromptField::Dialogue => self.dialogue_prompt.as_deref(),
        }
    }

    /// Form fields of `PUT /content/{work}/{episode}/{shot}`.
    pub fn form_fields(&self) -> Result<Vec<(&'static str, String)>> {
        let mut fields = Vec::new();
        if let Some(description) = &self.description {
            fields.push(("description", description.clone()));
        }
        for field in PromptField::ALL {
            if let Some(value) = self.prompt_value(field) {
                fields.push((field.key(), value.to_string()));
            }
        }
        if let Some(duration) = self.duration {
            fields.push(("duration", duration.to_string()));
        }
        if let Some(task_id) = &self.video_task_id {
            fields.push(("video_task_id", task_id.clone()));
        }
        if let Some(current) = &self.current_video {
            fields.push(("current_video", current.clone()));
        }
        if let Some(history) = &self.video_history {
            fields.push(("video_history", serde_json::to_string(history)?));
        }
        Ok(fields)
    }
}

/// Where pending shot writes go.
#[async_trait::async_trait]
pub trait ShotStore: Send + Sync {
    async fn update_shot(
        &self,
        work_id: &str,
        episode_id: &str,
        shot_id: &str,
        patch: &ShotPatch,
    ) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct FlushReport {
    pub written: Vec<String>,
    pub failed: Vec<(String, ClientError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ShotCache {
    work_id: String,
    episode_id: String,
    shots: Vec<Shot>,
    pending: HashMap<String, ShotPatch>,
}

impl ShotCache {
    pub fn new(
        work_id: impl Into<String>,
        episode_id: impl Into<String>,
        shots: Vec<Shot>,
    ) -> Self {
        Self {
            work_id: work_id.into(),
            episode_id: episode_id.into(),
            shots,
            pending: HashMap::new(),
        }
    }

    pub fn shots(&self) -> &[Shot] {
        &self.shots
    }

    pub fn get(&self, shot_id: &str) -> Option<&Shot> {
        self.shots.iter().find(|shot| shot.id == shot_id)
    }

    pub fn is_pending(&self, shot_id: &str) -> bool {
        self.pending.contains_key(shot_id)
    }

    pub fn pending_ids(&self) -> BTreeSet<&str> {
        self.pending.keys().map(String::as_str).collect()
    }

    /// Applies `patch` locally and queues it for the backend.
    pub fn apply(&mut self, shot_id: &str, patch: ShotPatch) -> Result<()> {
        let shot = self
            .shots
            .iter_mut()
            .find(|shot| shot.id == shot_id)
            .ok_or_else(|| ClientError::NotFound(format!("shot {shot_id}")))?;
        if patch.is_empty() {
            return Ok(());
        }
        patch.apply_to(shot);
        self.pending
            .entry(shot_id.to_string())
            .or_default()
            .merge(patch);
        Ok(())
    }

    /// Appends a generated video to the shot's history and makes it current.
    pub fn record_video(
        &mut self,
        shot_id: &str,
        video_path: impl Into<String>,
        generated_at: Option<String>,
    ) -> Result<()> {
        let video_path = video_path.into();
        let mut history = self
            .get(shot_id)
            .map(|shot| shot.video_history.clone())
            .ok_or_else(|| ClientError::NotFound(format!("shot {shot_id}")))?;
        history.push(VideoHistoryEntry {
            video_path: video_path.clone(),
            generated_at,
        });
        self.apply(shot_id, ShotPatch::video(video_path, history))
    }

    /// The prompt generation request for one shot, with the descriptions of
    /// up to [`NEIGHBOR_SHOTS`] shots on either side. Shots before it are
    /// listed nearest first.
    pub fn prompt_request(&self, shot_id: &str) -> Result<ToolRequest> {
        let index = self
            .shots
            .iter()
            .position(|shot| shot.id == shot_id)
            .ok_or_else(|| ClientError::NotFound(format!("shot {shot_id}")))?;
        let shot = &self.shots[index];
        if shot.description.trim().is_empty() {
            return Err(ClientError::invalid_request(format!(
                "shot {shot_id} has no description"
            )));
        }

        let described = |shot: &&Shot| !shot.description.trim().is_empty();
        let previous: Vec<String> = self.shots[..index]
            .iter()
            .rev()
            .filter(described)
            .take(NEIGHBOR_SHOTS)
            .map(|shot| shot.description.clone())
            .collect();
        let next: Vec<String> = self.shots[index + 1..]
            .iter()
            .filter(described)
            .take(NEIGHBOR_SHOTS)
            .map(|shot| shot.description.clone())
            .collect();

        let duration = match shot.duration {
            0 => DEFAULT_SHOT_DURATION,
            duration => duration,
        };
        let materials = MaterialSelectionSession::new();
        let mut request = ToolRequest::shot_prompts(&shot.description, duration, &materials)
            .neighbor_shots(&previous, &next);
        let related = serde_json::to_string(&shot.related_materials)?;
        request.set_field("related_materials", related);
        Ok(request)
    }

    /// Sends every pending patch. Successful writes clear their marker,
    /// failed ones stay queued for the next flush.
    pub async fn flush(&mut self, store: &dyn ShotStore) -> FlushReport {
        let mut report = FlushReport::default();
        let mut ids: Vec<String> = self.pending.keys().cloned().collect();
        ids.sort();

        for shot_id in ids {
            let Some(patch) = self.pending.get(&shot_id) else {
                continue;
            };
            let written = store
                .update_shot(&self.work_id, &self.episode_id, &shot_id, patch)
                .await;
            match written {
                Ok(()) => {
                    debug!(shot_id = %shot_id, "shot write flushed");
                    self.pending.remove(&shot_id);
                    report.written.push(shot_id);
                }
                Err(err) => {
                    warn!(shot_id = %shot_id, error = %err, "shot write failed, kept pending");
                    report.failed.push((shot_id, err));
                }
            }
        }
        report
    }

    /// Replaces the cache with a backend listing. Returns the ids whose
    /// pending writes were dropped.
    pub fn reconcile(&mut self, shots: Vec<Shot>) -> Vec<String> {
        let mut discarded: Vec<String> = self.pending.drain().map(|(id, _)| id).collect();
        discarded.sort();
        if !discarded.is_empty() {
            warn!(count = discarded.len(), "reload discarded unsent shot edits");
        }
        self.shots = shots;
        discarded
    }
}
