//! Typed client for the studio REST backend
//!
//! Covers the tool/task contract the job poller depends on, the storyboard
//! and shot endpoints of the episode editor, tool history, material
//! selection for tool forms, and the optimistic shot cache.

pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod materials;
pub mod shots;
pub mod tasks;
pub mod tools;

pub use client::StudioClient;
pub use config::StudioConfig;
pub use error::{ClientError, Result};
pub use history::{HistoryPage, HistoryQuery, HistoryRecord, ReusedInput};
pub use materials::{MaterialKind, MaterialRef, MaterialSelectionSession};
pub use shots::{
    FlushReport, Shot, ShotCache, ShotPatch, ShotStore, StoryboardRecord, VideoHistoryEntry,
    DEFAULT_SHOT_DURATION, NEIGHBOR_SHOTS,
};
pub use tasks::{TaskApi, TaskId, TaskOutput, TaskResult, TaskState, TaskStatusResponse};
pub use tools::{FilePart, ToolRequest, ToolType};
