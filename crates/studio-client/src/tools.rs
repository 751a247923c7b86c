use crate::error::{ClientError, Result};
use crate::materials::MaterialSelectionSession;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Maximum reference images accepted by vidu.
pub const VIDU_MAX_IMAGES: usize = 7;

/// Generation tools exposed by `POST /tools/{tool}/create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    GenerateScript,
    GenerateSingleShotStoryboard,
    GenerateShotPrompts,
    ImageToDescription,
    ImageToStyleDescription,
    TextToImage,
    ImageToImage,
    ViduRefImageToVideo,
    SoraImageToVideo,
    WanImageToVideo,
    KeyframeToVideo,
    TextToAudio,
}

impl ToolType {
    pub const ALL: [ToolType; 12] = [
        ToolType::GenerateScript,
        ToolType::GenerateSingleShotStoryboard,
        ToolType::GenerateShotPrompts,
        ToolType::ImageToDescription,
        ToolType::ImageToStyleDescription,
        ToolType::TextToImage,
        ToolType::ImageToImage,
        ToolType::ViduRefImageToVideo,
        ToolType::SoraImageToVideo,
        ToolType::WanImageToVideo,
        ToolType::KeyframeToVideo,
        ToolType::TextToAudio,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            ToolType::GenerateScript => "generate_script",
            ToolType::GenerateSingleShotStoryboard => "generate_single_shot_storyboard",
            ToolType::GenerateShotPrompts => "generate_shot_prompts",
            ToolType::ImageToDescription => "image_to_description",
            ToolType::ImageToStyleDescription => "image_to_style_description",
            ToolType::TextToImage => "text_to_image",
            ToolType::ImageToImage => "image_to_image",
            ToolType::ViduRefImageToVideo => "vidu_ref_image_to_video",
            ToolType::SoraImageToVideo => "sora_image_to_video",
            ToolType::WanImageToVideo => "wan_image_to_video",
            ToolType::KeyframeToVideo => "keyframe_to_video",
            ToolType::TextToAudio => "text_to_audio",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            ToolType::GenerateScript => "生成剧本",
            ToolType::GenerateSingleShotStoryboard => "生成单镜头分镜脚本",
            ToolType::GenerateShotPrompts => "生成分镜提示词",
            ToolType::ImageToDescription => "图生描述",
            ToolType::ImageToStyleDescription => "图生风格描述",
            ToolType::TextToImage => "文生图",
            ToolType::ImageToImage => "图生图",
            ToolType::ViduRefImageToVideo => "vidu参考生视频",
            ToolType::SoraImageToVideo => "sora生视频",
            ToolType::WanImageToVideo => "wan图生视频",
            ToolType::KeyframeToVideo => "首尾帧生视频",
            ToolType::TextToAudio => "生音频",
        }
    }

    /// Text fields the backend rejects the form without.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            ToolType::GenerateScript => &["description"],
            ToolType::GenerateSingleShotStoryboard => {
                &["script", "expected_duration", "shot_duration"]
            }
            ToolType::GenerateShotPrompts => &["shot_description", "duration"],
            ToolType::ImageToDescription => &["material_type"],
            ToolType::ImageToStyleDescription => &[],
            ToolType::TextToImage => {
                &["prompt", "material_type", "model", "aspect_ratio", "resolution"]
            }
            ToolType::ImageToImage => &["prompt", "model", "aspect_ratio", "resolution"],
            ToolType::ViduRefImageToVideo => &["prompt", "aspect_ratio", "resolution", "duration"],
            ToolType::SoraImageToVideo => &["prompt", "duration"],
            ToolType::WanImageToVideo => &["prompt", "model", "resolution", "duration"],
            ToolType::KeyframeToVideo => &["prompt", "aspect_ratio", "duration"],
            ToolType::TextToAudio => &["text", "duration"],
        }
    }

    /// File fields the backend rejects the form without.
    pub fn required_files(self) -> &'static [&'static str] {
        match self {
            ToolType::ImageToDescription
            | ToolType::ImageToStyleDescription
            | ToolType::SoraImageToVideo
            | ToolType::WanImageToVideo => &["image"],
            ToolType::ImageToImage | ToolType::ViduRefImageToVideo => &["images"],
            ToolType::KeyframeToVideo => &["start_frame", "end_frame"],
            _ => &[],
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ToolType {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        ToolType::ALL
            .into_iter()
            .find(|tool| tool.id() == s)
            .ok_or_else(|| ClientError::invalid_request(format!("unknown tool '{s}'")))
    }
}

/// One uploaded file of a tool form. Repeating a field name sends a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    pub fn new(field: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            bytes,
        }
    }

    pub fn from_path(field: impl Into<String>, path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        Ok(Self::new(field, file_name, bytes))
    }
}

/// Form for `POST /tools/{tool}/create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub tool: ToolType,
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl ToolRequest {
    pub fn new(tool: ToolType) -> Self {
        Self {
            tool,
            fields: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Replaces an existing field of the same name.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// The text a user would recognise the task by.
    pub fn prompt(&self) -> &str {
        ["prompt", "description", "script", "text", "shot_description"]
            .into_iter()
            .find_map(|name| self.get(name).filter(|value| !value.is_empty()))
            .unwrap_or("")
    }

    fn file_count(&self, field: &str) -> usize {
        self.files.iter().filter(|part| part.field == field).count()
    }

    /// Checks required fields and image counts before anything is sent.
    pub fn validate(&self) -> Result<()> {
        for name in self.tool.required_fields() {
            if self.get(name).map_or(true, |value| value.trim().is_empty()) {
                return Err(ClientError::invalid_request(format!(
                    "{}: missing field '{name}'",
                    self.tool
                )));
            }
        }
        for name in self.tool.required_files() {
            if self.file_count(name) == 0 {
                return Err(ClientError::invalid_request(format!(
                    "{}: missing file '{name}'",
                    self.tool
                )));
            }
        }
        if self.tool == ToolType::ViduRefImageToVideo && self.file_count("images") > VIDU_MAX_IMAGES
        {
            return Err(ClientError::invalid_request(format!(
                "{}: at most {VIDU_MAX_IMAGES} images",
                self.tool
            )));
        }
        Ok(())
    }

    /// Single-shot storyboard generation from a script.
    pub fn single_shot_storyboard(
        script: impl Into<String>,
        expected_duration: u32,
        shot_duration: u32,
        materials: &MaterialSelectionSession,
    ) -> Self {
        let mut request = Self::new(ToolType::GenerateSingleShotStoryboard)
            .field("script", script)
            .field("expected_duration", expected_duration.to_string())
            .field("shot_duration", shot_duration.to_string());
        for (name, value) in materials.storyboard_fields() {
            request.set_field(name, value);
        }
        request
    }

    /// Five-prompt generation for one shot description.
    pub fn shot_prompts(
        shot_description: impl Into<String>,
        duration: u32,
        materials: &MaterialSelectionSession,
    ) -> Self {
        let (name, value) = materials.related_materials_field();
        Self::new(ToolType::GenerateShotPrompts)
            .field("shot_description", shot_description)
            .field("duration", duration.to_string())
            .field(name, value)
    }

    /// Descriptions of the surrounding shots, sent as JSON arrays.
    pub fn neighbor_shots(self, previous: &[String], next: &[String]) -> Self {
        self.field("previous_shots", json_list(previous))
            .field("next_shots", json_list(next))
    }
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
