use crate::lexer::{tokenize, LineKind, PromptField};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The five generation prompts of one shot. Absent sections are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotPrompts {
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub video_prompt: String,
    #[serde(default)]
    pub reference_video_prompt: String,
    #[serde(default)]
    pub audio_prompt: String,
    #[serde(default)]
    pub dialogue_prompt: String,
}

impl ShotPrompts {
    pub fn parse(text: &str) -> Self {
        parse_shot_prompts(text)
    }

    pub fn get(&self, field: PromptField) -> &str {
        match field {
            PromptField::Image => &self.image_prompt,
            PromptField::Video => &self.video_prompt,
            PromptField::ReferenceVideo => &self.reference_video_prompt,
            PromptField::Audio => &self.audio_prompt,
            PromptField::Dialogue => &self.dialogue_prompt,
        }
    }

    pub fn get_mut(&mut self, field: PromptField) -> &mut String {
        match field {
            PromptField::Image => &mut self.image_prompt,
            PromptField::Video => &mut self.video_prompt,
            PromptField::ReferenceVideo => &mut self.reference_video_prompt,
            PromptField::Audio => &mut self.audio_prompt,
            PromptField::Dialogue => &mut self.dialogue_prompt,
        }
    }

    pub fn is_empty(&self) -> bool {
        PromptField::ALL
            .into_iter()
            .all(|field| self.get(field).is_empty())
    }

    /// `(field, value)` for every non-empty section, in label order.
    pub fn sections(&self) -> impl Iterator<Item = (PromptField, &str)> {
        PromptField::ALL
            .into_iter()
            .map(move |field| (field, self.get(field)))
            .filter(|(_, value)| !value.is_empty())
    }
}

/// Parses labelled prompt output.
///
/// A label line makes its field current and replaces its value; later
/// non-label lines are appended to the current field with a newline. Lines
/// seen before any label are dropped.
pub fn parse_shot_prompts(text: &str) -> ShotPrompts {
    let mut prompts = ShotPrompts::default();
    let mut current: Option<PromptField> = None;

    for line in tokenize(text) {
        match line.kind {
            LineKind::PromptLabel { field, rest } => {
                current = Some(field);
                *prompts.get_mut(field) = rest.to_string();
            }
            _ => {
                if let Some(field) = current {
                    let value = prompts.get_mut(field);
                    value.push('\n');
                    value.push_str(line.raw);
                }
            }
        }
    }

    prompts
}

impl fmt::Display for ShotPrompts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (field, value) in self.sections() {
            writeln!(f, "{} {}", field.label(), value)?;
        }
        Ok(())
    }
}
