use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// A timed subtitle line taken from a shot's dialogue prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueCue {
    pub start_time: f64,
    pub end_time: f64,
    pub character: String,
    pub text: String,
}

impl DialogueCue {
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start_time && t <= self.end_time
    }
}

/// Show/hide offsets (seconds from shot start) of a cue over a still image.
#[derive(Debug, Clone, PartialEq)]
pub struct CueWindow<'a> {
    pub cue: &'a DialogueCue,
    pub show_at: f64,
    pub hide_at: f64,
}

/// `N～M秒:【角色】:"台词"`. Digits are ASCII only.
static CUE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([0-9]+)[～\-到]([0-9]+)秒\s*:\s*【([^】]+)】\s*:\s*"([^"]+)""#)
        .expect("cue pattern is valid")
});

/// Extracts every `N～M秒:【角色】:"台词"` cue in `text`, sorted by start.
///
/// Matching is not anchored to lines. `-` and `到` are accepted in place of
/// `～`, whitespace is allowed around both colons. Cues with `end <= start`
/// or a blank character/text are dropped.
pub fn parse_dialogue_prompt(text: &str) -> Vec<DialogueCue> {
    let mut cues: Vec<DialogueCue> = CUE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| cue_from_parts(&caps[1], &caps[2], &caps[3], &caps[4]))
        .collect();
    cues.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    cues
}

fn cue_from_parts(start: &str, end: &str, character: &str, line: &str) -> Option<DialogueCue> {
    let start_time: f64 = start.parse().ok()?;
    let end_time: f64 = end.parse().ok()?;
    let character = character.trim();
    let line = line.trim();
    if start_time < 0.0 || end_time <= start_time || character.is_empty() || line.is_empty() {
        return None;
    }
    Some(DialogueCue {
        start_time,
        end_time,
        character: character.to_string(),
        text: line.to_string(),
    })
}

/// The first cue whose `[start, end]` window contains `t`.
pub fn cue_at(cues: &[DialogueCue], t: f64) -> Option<&DialogueCue> {
    cues.iter().find(|cue| cue.contains(t))
}

/// Show/hide windows for a shot displayed as a still image for
/// `display_duration` seconds. Cues starting at or after the end are skipped
/// and hide times are clamped to the display duration.
pub fn image_schedule(cues: &[DialogueCue], display_duration: f64) -> Vec<CueWindow<'_>> {
    cues.iter()
        .filter(|cue| cue.start_time < display_duration)
        .map(|cue| CueWindow {
            cue,
            show_at: cue.start_time,
            hide_at: cue.end_time.min(display_duration),
        })
        .collect()
}
