use crate::lexer::{
    join_list, parse_duration, split_list, tokenize, LineKind, SHOT_DURATION_LABEL,
    SHOT_MATERIALS_LABEL, SHOT_PREFIX, STORYBOARD_HEADER,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storyboard {
    pub related_materials: Vec<String>,
    pub shots: Vec<ShotRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotRecord {
    /// Taken verbatim from the `分镜N:` line; not checked for order or uniqueness.
    pub number: String,
    pub description: String,
    pub related_materials: Vec<String>,
    /// Seconds, 0 when missing or unparsable.
    pub duration: u32,
}

impl ShotRecord {
    pub fn new(number: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_materials(mut self, materials: Vec<String>) -> Self {
        self.related_materials = materials;
        self
    }

    pub fn with_duration(mut self, duration: u32) -> Self {
        self.duration = duration;
        self
    }
}

impl Storyboard {
    pub fn parse(text: &str) -> Self {
        parse_storyboard(text)
    }

    pub fn total_duration(&self) -> u32 {
        self.shots.iter().map(|shot| shot.duration).sum()
    }
}

/// Parses a storyboard listing.
///
/// The header is only honoured on the first line. A shot line may be followed
/// by a `关联素材:` line and then a `时长:` line; anything else is skipped.
pub fn parse_storyboard(text: &str) -> Storyboard {
    let mut board = Storyboard::default();
    let mut lines = tokenize(text).peekable();

    if let Some(header) = lines.next_if(|line| matches!(line.kind, LineKind::StoryboardHeader(_)))
    {
        if let LineKind::StoryboardHeader(list) = header.kind {
            board.related_materials = split_list(list);
        }
    }

    while let Some(line) = lines.next() {
        let LineKind::Shot { number, rest } = line.kind else {
            continue;
        };
        let mut shot = ShotRecord::new(number, rest);

        if let Some(next) = lines.next_if(|line| matches!(line.kind, LineKind::ShotMaterials(_))) {
            if let LineKind::ShotMaterials(list) = next.kind {
                shot.related_materials = split_list(list);
            }
        }
        if let Some(next) = lines.next_if(|line| matches!(line.kind, LineKind::ShotDuration(_))) {
            if let LineKind::ShotDuration(raw) = next.kind {
                shot.duration = parse_duration(raw);
            }
        }

        board.shots.push(shot);
    }

    board
}

/// Writes the listing in the form [`parse_storyboard`] reads back.
impl fmt::Display for Storyboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.related_materials.is_empty() {
            writeln!(
                f,
                "{STORYBOARD_HEADER}{}",
                join_list(&self.related_materials)
            )?;
        }
        for shot in &self.shots {
            writeln!(f, "{SHOT_PREFIX}{}: {}", shot.number, shot.description)?;
            if !shot.related_materials.is_empty() {
                writeln!(
                    f,
                    "{SHOT_MATERIALS_LABEL} {}",
                    join_list(&shot.related_materials)
                )?;
            }
            writeln!(f, "{SHOT_DURATION_LABEL} {}", shot.duration)?;
            writeln!(f)?;
        }
        Ok(())
    }
}
