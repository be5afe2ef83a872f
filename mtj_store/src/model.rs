//! Domain types mirroring the `project`/`content_docs`/`segments` tables.
//!
//! Status-like columns are stored as `TEXT` and converted through these
//! enums in Rust rather than leaning on `sqlx`'s derive-based `Type` for
//! enums, so the store doesn't depend on compile-time database access to
//! check queries (see `lib.rs` for why `query_as!` isn't used here).

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum ModelError {
    #[snafu(display("unrecognised segment status {value:?}"))]
    UnknownSegmentStatusError { value: String },
    #[snafu(display("unrecognised engine state {value:?}"))]
    UnknownEngineStateError { value: String },
    #[snafu(display("unrecognised text alignment {value:?}"))]
    UnknownTextAlignmentError { value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SegmentStatus {
    Pending,
    Translating,
    Translated,
    Failed,
    Skipped,
}

impl SegmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SegmentStatus::Pending => "PENDING",
            SegmentStatus::Translating => "TRANSLATING",
            SegmentStatus::Translated => "TRANSLATED",
            SegmentStatus::Failed => "FAILED",
            SegmentStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "PENDING" => Ok(SegmentStatus::Pending),
            "TRANSLATING" => Ok(SegmentStatus::Translating),
            "TRANSLATED" => Ok(SegmentStatus::Translated),
            "FAILED" => Ok(SegmentStatus::Failed),
            "SKIPPED" => Ok(SegmentStatus::Skipped),
            other => UnknownSegmentStatusError { value: other.to_owned() }.fail(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EngineState {
    Idle,
    Analyzing,
    Translating,
    Paused,
    QuotaPaused,
    Completed,
    Error,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Analyzing => "ANALYZING",
            EngineState::Translating => "TRANSLATING",
            EngineState::Paused => "PAUSED",
            EngineState::QuotaPaused => "QUOTA_PAUSED",
            EngineState::Completed => "COMPLETED",
            EngineState::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "IDLE" => Ok(EngineState::Idle),
            "ANALYZING" => Ok(EngineState::Analyzing),
            "TRANSLATING" => Ok(EngineState::Translating),
            "PAUSED" => Ok(EngineState::Paused),
            "QUOTA_PAUSED" => Ok(EngineState::QuotaPaused),
            "COMPLETED" => Ok(EngineState::Completed),
            "ERROR" => Ok(EngineState::Error),
            other => UnknownEngineStateError { value: other.to_owned() }.fail(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TextAlignment {
    Left,
    Center,
    Right,
    Justify,
}

impl TextAlignment {
    pub fn as_str(self) -> &'static str {
        match self {
            TextAlignment::Left => "left",
            TextAlignment::Center => "center",
            TextAlignment::Right => "right",
            TextAlignment::Justify => "justify",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "left" => Ok(TextAlignment::Left),
            "center" => Ok(TextAlignment::Center),
            "right" => Ok(TextAlignment::Right),
            "justify" => Ok(TextAlignment::Justify),
            other => UnknownTextAlignmentError { value: other.to_owned() }.fail(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportSettings {
    pub text_alignment: TextAlignment,
    pub force_alignment: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            text_alignment: TextAlignment::Justify,
            force_alignment: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub id: String,
    pub original_title: String,
    pub author: Option<String>,
    pub translated_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_bytes: Option<Vec<u8>>,
    pub total_segments: i64,
    pub translated_segments: i64,
    pub schema_version: i32,
    pub export_settings: ExportSettings,
    pub engine_state: EngineState,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Segment {
    pub id: String,
    pub content_doc_path: String,
    pub batch_index: i64,
    pub original_html: String,
    pub translated_html: String,
    pub status: SegmentStatus,
    pub retry_count: i64,
    pub error: Option<String>,
}

impl Segment {
    pub fn make_id(content_doc_path: &str, batch_index: i64) -> String {
        format!("{content_doc_path}::{batch_index}")
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Stats {
    pub total: i64,
    pub translated: i64,
    pub failed: i64,
}

/// A content document ready to be written at import time, already
/// segmented by `mtj_segment`.
pub struct NewContentDoc {
    pub path: String,
    pub spine_index: i32,
    pub batches: Vec<mtj_segment::CapturedBatch>,
}

pub struct NewProject {
    pub id: String,
    pub original_title: String,
    pub author: Option<String>,
    pub archive_bytes: Vec<u8>,
    pub cover_bytes: Option<Vec<u8>>,
    pub schema_version: i32,
}
