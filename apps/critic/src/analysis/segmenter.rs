//! Scene segmentation: asks the model to split the manuscript into scenes and
//! validates the structured reply.
//!
//! Structural violations (bad JSON, missing fields, non-integer or out-of-range
//! bounds, start after end) reject the whole segmentation. Coverage problems
//! (overlaps, gaps, ordering) are reported as `CoverageIssue`s and the scenes
//! are used as returned.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::prompts::segmentation_conversation;
use crate::llm_client::{strip_json_fences, LlmError, ModelClient, ResponseFormat};
use crate::models::{Manuscript, Scene};

const SEGMENTATION_TEMPERATURE: f32 = 0.2;

/// The segmentation could not be used.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("segmentation call failed: {0}")]
    Call(#[from] LlmError),

    #[error("segmentation response does not match the scene schema: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("scene #{position} ({start}–{end}): {reason}")]
    InvalidRange {
        position: usize,
        start: u64,
        end: u64,
        reason: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct SegmentationResponse {
    total: Option<Value>,
    scenes: Vec<SceneEntry>,
}

#[derive(Debug, Deserialize)]
struct SceneEntry {
    scene: Option<Value>,
    summary: String,
    paragraphs_start: u64,
    paragraphs_end: u64,
}

/// A data-quality problem in an otherwise valid segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageIssue {
    /// Scene `scene` starts inside `previous`.
    Overlap { scene: usize, previous: usize },
    /// Scene `scene` starts before `previous` does.
    OutOfOrder { scene: usize, previous: usize },
    /// Paragraphs `from..=to` belong to no scene.
    Uncovered { from: usize, to: usize },
    /// The declared `total` disagrees with the number of scenes.
    TotalMismatch { declared: u64, actual: usize },
}

impl fmt::Display for CoverageIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageIssue::Overlap { scene, previous } => {
                write!(f, "场景 {scene} 与场景 {previous} 的段落范围重叠")
            }
            CoverageIssue::OutOfOrder { scene, previous } => {
                write!(f, "场景 {scene} 的起始段落早于场景 {previous}")
            }
            CoverageIssue::Uncovered { from, to } if from == to => {
                write!(f, "第 {from} 自然段未被划入任何场景")
            }
            CoverageIssue::Uncovered { from, to } => {
                write!(f, "第 {from} 至第 {to} 自然段未被划入任何场景")
            }
            CoverageIssue::TotalMismatch { declared, actual } => {
                write!(f, "声明的场景总数为 {declared}，实际列出 {actual} 个")
            }
        }
    }
}

/// A validated segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segmentation {
    pub scenes: Vec<Scene>,
    pub issues: Vec<CoverageIssue>,
}

/// Runs the segmentation call and validates the reply.
pub async fn segment(
    manuscript: &Manuscript,
    llm: &dyn ModelClient,
) -> Result<Segmentation, SegmentationError> {
    info!("Segmenting manuscript into scenes...");
    let conversation = segmentation_conversation(manuscript.title(), &manuscript.numbered_text());
    let raw = llm
        .complete(
            &conversation,
            SEGMENTATION_TEMPERATURE,
            ResponseFormat::StructuredJson,
        )
        .await?;

    let segmentation = parse_segmentation(&raw, manuscript.paragraphs().len())?;
    info!("Found {} scenes", segmentation.scenes.len());
    for scene in &segmentation.scenes {
        debug!("Scene {} carries model label {:?}", scene.index, scene.label);
    }
    for issue in &segmentation.issues {
        warn!("Segmentation data-quality issue: {issue}");
    }
    Ok(segmentation)
}

/// Parses and validates a segmentation reply for a manuscript of
/// `paragraph_count` paragraphs.
pub fn parse_segmentation(
    raw: &str,
    paragraph_count: usize,
) -> Result<Segmentation, SegmentationError> {
    let response: SegmentationResponse = serde_json::from_str(strip_json_fences(raw))?;
    let limit = paragraph_count as u64;

    let mut scenes = Vec::with_capacity(response.scenes.len());
    for (i, entry) in response.scenes.into_iter().enumerate() {
        let position = i + 1;
        let (start, end) = (entry.paragraphs_start, entry.paragraphs_end);
        let reason = if start < 1 || end < 1 {
            Some("paragraph numbers start at 1")
        } else if start > limit || end > limit {
            Some("range exceeds the manuscript's paragraph count")
        } else if start > end {
            Some("paragraphs_start is after paragraphs_end")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(SegmentationError::InvalidRange {
                position,
                start,
                end,
                reason,
            });
        }

        scenes.push(Scene {
            index: position,
            label: entry
                .scene
                .as_ref()
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            summary: entry.summary.trim().to_string(),
            start: start as usize,
            end: end as usize,
        });
    }

    let mut issues = coverage_issues(&scenes, paragraph_count);
    if let Some(declared) = response.total.as_ref().and_then(Value::as_u64) {
        if declared != scenes.len() as u64 {
            issues.push(CoverageIssue::TotalMismatch {
                declared,
                actual: scenes.len(),
            });
        }
    }

    Ok(Segmentation { scenes, issues })
}

fn coverage_issues(scenes: &[Scene], paragraph_count: usize) -> Vec<CoverageIssue> {
    let mut issues = Vec::new();

    for pair in scenes.windows(2) {
        let (previous, scene) = (&pair[0], &pair[1]);
        if scene.start < previous.start {
            issues.push(CoverageIssue::OutOfOrder {
                scene: scene.index,
                previous: previous.index,
            });
        } else if scene.start <= previous.end {
            issues.push(CoverageIssue::Overlap {
                scene: scene.index,
                previous: previous.index,
            });
        }
    }

    let mut covered = vec![false; paragraph_count];
    for scene in scenes {
        for slot in &mut covered[scene.start - 1..scene.end] {
            *slot = true;
        }
    }
    let mut run_start: Option<usize> = None;
    for (i, is_covered) in covered.iter().enumerate() {
        match (is_covered, run_start) {
            (false, None) => run_start = Some(i + 1),
            (true, Some(from)) => {
                issues.push(CoverageIssue::Uncovered { from, to: i });
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = run_start {
        issues.push(CoverageIssue::Uncovered {
            from,
            to: paragraph_count,
        });
    }

    issues
}
