use serde::{Deserialize, Serialize};
use std::fmt;

/// Header of a storyboard listing. Uses the full-width colon.
pub const STORYBOARD_HEADER: &str = "剧本关联素材：";
/// Shot line prefix, followed by ASCII digits and a half-width colon.
pub const SHOT_PREFIX: &str = "分镜";
pub const SHOT_MATERIALS_LABEL: &str = "关联素材:";
pub const SHOT_DURATION_LABEL: &str = "时长:";
/// Separator for every material list (full-width comma).
pub const LIST_SEPARATOR: char = '，';
pub const LABEL_COLON: char = ':';

/// One of the five prompt sections of a shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptField {
    Image,
    Video,
    ReferenceVideo,
    Audio,
    Dialogue,
}

impl PromptField {
    /// Label-table order, also the order sections are written in.
    pub const ALL: [PromptField; 5] = [
        PromptField::Image,
        PromptField::Video,
        PromptField::ReferenceVideo,
        PromptField::Audio,
        PromptField::Dialogue,
    ];

    /// Literal label introducing the section, colon included.
    pub const fn label(self) -> &'static str {
        match self {
            PromptField::Image => "分镜图片提示词:",
            PromptField::Video => "分镜视频提示词:",
            PromptField::ReferenceVideo => "参考视频提示词:",
            PromptField::Audio => "音频提示词:",
            PromptField::Dialogue => "台词提示词:",
        }
    }

    /// Field name used by the backend shot record.
    pub const fn key(self) -> &'static str {
        match self {
            PromptField::Image => "image_prompt",
            PromptField::Video => "video_prompt",
            PromptField::ReferenceVideo => "reference_video_prompt",
            PromptField::Audio => "audio_prompt",
            PromptField::Dialogue => "dialogue_prompt",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

impl fmt::Display for PromptField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Classification of a single trimmed, non-empty line.
///
/// Payloads are the text after the recognised prefix, trimmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    StoryboardHeader(&'a str),
    Shot { number: &'a str, rest: &'a str },
    ShotMaterials(&'a str),
    ShotDuration(&'a str),
    PromptLabel { field: PromptField, rest: &'a str },
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// The full trimmed line.
    pub raw: &'a str,
    pub kind: LineKind<'a>,
}

/// Splits a document into trimmed non-empty lines and classifies each one.
pub fn tokenize(text: &str) -> impl Iterator<Item = Line<'_>> {
    text.trim()
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(classify)
}

pub fn classify(raw: &str) -> Line<'_> {
    let kind = if let Some(rest) = raw.strip_prefix(STORYBOARD_HEADER) {
        LineKind::StoryboardHeader(rest.trim())
    } else if let Some((number, rest)) = split_shot_line(raw) {
        LineKind::Shot {
            number,
            rest: rest.trim(),
        }
    } else if let Some(rest) = raw.strip_prefix(SHOT_MATERIALS_LABEL) {
        LineKind::ShotMaterials(rest.trim())
    } else if let Some(rest) = raw.strip_prefix(SHOT_DURATION_LABEL) {
        LineKind::ShotDuration(rest.trim())
    } else if let Some((field, rest)) = PromptField::ALL
        .into_iter()
        .find_map(|field| raw.strip_prefix(field.label()).map(|rest| (field, rest)))
    {
        LineKind::PromptLabel {
            field,
            rest: rest.trim(),
        }
    } else {
        LineKind::Text
    };
    Line { raw, kind }
}

/// `分镜<digits>:<rest>` → `(digits, rest)`.
fn split_shot_line(raw: &str) -> Option<(&str, &str)> {
    let after_prefix = raw.strip_prefix(SHOT_PREFIX)?;
    let digits_len = after_prefix
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    let (number, tail) = after_prefix.split_at(digits_len);
    let rest = tail.strip_prefix(LABEL_COLON)?;
    Some((number, rest))
}

/// Splits a `，`-separated list, trimming entries and dropping empty ones.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_list(items: &[String]) -> String {
    let mut out = String::new();
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push(LIST_SEPARATOR);
        }
        out.push_str(item);
    }
    out
}

/// Leading-integer parse: `"5"` and `"5秒"` give 5, anything without a
/// leading digit (including a sign) gives 0.
pub fn parse_duration(raw: &str) -> u32 {
    let raw = raw.trim();
    let raw = raw.strip_prefix('+').unwrap_or(raw);
    let digits_len = raw.bytes().take_while(|b| b.is_ascii_digit()).count();
    raw[..digits_len].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_skips_blank_lines_and_trims() {
        let lines: Vec<_> = tokenize("\n  分镜1: a  \r\n\n   \nfoo\n").collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].raw, "分镜1: a");
        assert_eq!(lines[1].kind, LineKind::Text);
    }

    #[test]
    fn test_classify_shot_line() {
        let line = classify("分镜12: 主角走进房间");
        assert_eq!(
            line.kind,
            LineKind::Shot {
                number: "12",
                rest: "主角走进房间"
            }
        );
    }

    #[test]
    fn test_shot_line_requires_digits_and_half_width_colon() {
        assert_eq!(classify("分镜: x").kind, LineKind::Text);
        assert_eq!(classify("分镜1：x").kind, LineKind::Text);
        assert_eq!(classify("分镜 1: x").kind, LineKind::Text);
    }

    #[test]
    fn test_prompt_label_is_not_a_shot_line() {
        let line = classify("分镜图片提示词: 夜景");
        assert_eq!(
            line.kind,
            LineKind::PromptLabel {
                field: PromptField::Image,
                rest: "夜景"
            }
        );
    }

    #[test]
    fn test_header_and_metadata_lines() {
        assert_eq!(
            classify("剧本关联素材：A，B").kind,
            LineKind::StoryboardHeader("A，B")
        );
        assert_eq!(classify("关联素材: A").kind, LineKind::ShotMaterials("A"));
        assert_eq!(classify("时长: 5").kind, LineKind::ShotDuration("5"));
        // half-width colon is not a header
        assert_eq!(classify("剧本关联素材:A").kind, LineKind::Text);
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("A，B，，C "), vec!["A", "B", "C"]);
        assert_eq!(split_list("A， B"), vec!["A", "B"]);
        assert!(split_list("").is_empty());
        assert!(split_list("，，").is_empty());
        // half-width comma is part of the name
        assert_eq!(split_list("A,B"), vec!["A,B"]);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5"), 5);
        assert_eq!(parse_duration(" 12秒"), 12);
        assert_eq!(parse_duration("abc"), 0);
        assert_eq!(parse_duration("-3"), 0);
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("99999999999"), 0);
    }

    #[test]
    fn test_prompt_field_keys() {
        for field in PromptField::ALL {
            assert_eq!(PromptField::from_key(field.key()), Some(field));
            assert!(field.label().ends_with(LABEL_COLON));
        }
        assert_eq!(PromptField::from_key("nope"), None);
    }
}
