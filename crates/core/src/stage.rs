//! Pipeline stage detection from free-text operation descriptions.
//!
//! The server reports *what* it is doing as prose ("Running OCR
//! extraction on page 3"). [`detect_stage`] maps that onto the fixed,
//! ordered pipeline; [`StageTracker`] turns the per-update result into
//! edge-triggered stage changes.

use serde::{Deserialize, Serialize};

/// One phase of the fixed processing pipeline, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ocr,
    Mapping,
    Grading,
    Finalization,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::Ocr,
        Stage::Mapping,
        Stage::Grading,
        Stage::Finalization,
    ];

    /// Zero-based position in the pipeline.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ocr => "Text extraction",
            Self::Mapping => "Answer mapping",
            Self::Grading => "Grading",
            Self::Finalization => "Finalization",
        }
    }
}

/// Ordered keyword table. The first row with a matching keyword wins.
///
/// Keywords are stems so that "Scoring" matches like "score" and
/// "Finalizing" like "finalize".
const STAGE_KEYWORDS: &[(Stage, &[&str])] = &[
    (Stage::Ocr, &["ocr", "extract", "image", "text"]),
    (Stage::Mapping, &["map", "match", "align"]),
    (Stage::Grading, &["grad", "scor", "evaluat", "assess"]),
    (Stage::Finalization, &["final", "complet", "save", "saving"]),
];

/// Classify an operation description into a pipeline stage.
///
/// Case-insensitive substring match; defaults to [`Stage::Ocr`] when no
/// keyword matches.
pub fn detect_stage(operation: &str) -> Stage {
    let lowered = operation.to_lowercase();
    STAGE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(stage, _)| *stage)
        .unwrap_or(Stage::Ocr)
}

/// A detected transition between two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageChange {
    pub new: Stage,
    pub old: Stage,
}

/// Remembers the last stage of one job and reports only transitions.
#[derive(Debug, Clone)]
pub struct StageTracker {
    current: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self { current: Stage::Ocr }
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Detect the stage of `operation` and report it if it differs from
    /// the previously recorded one.
    pub fn observe(&mut self, operation: &str) -> Option<StageChange> {
        let detected = detect_stage(operation);
        if detected == self.current {
            return None;
        }
        let old = std::mem::replace(&mut self.current, detected);
        Some(StageChange { new: detected, old })
    }
}
