//! Analysis pipeline: orchestrates one critique run.
//!
//! Flow: whole-manuscript passes → scene segmentation → scene passes for every
//! scene → `AnalysisRun` handed to the report.
//!
//! Every pass call is isolated: a failure becomes an `AnalysisResult` carrying
//! the error and never stops its siblings. A failed segmentation leaves the run
//! with zero scenes; the whole-manuscript results are kept.

use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::analysis::passes::{AnalysisPass, PassSet, Scope};
use crate::analysis::results::{AnalysisResult, AnalysisResults};
use crate::analysis::segmenter::{segment, CoverageIssue};
use crate::llm_client::prompts::editor_persona;
use crate::llm_client::{Conversation, ModelClient};
use crate::models::{Manuscript, Scene};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Target publication named in the editor persona.
    pub magazine: String,
    pub passes: PassSet,
    /// Maximum number of model calls in flight at once. 1 runs sequentially.
    pub concurrency: usize,
}

/// What happened at the segmentation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentationOutcome {
    /// No scene pass was enabled, so segmentation never ran.
    Skipped,
    Completed { issues: Vec<CoverageIssue> },
    /// The run continued with zero scenes.
    Failed { reason: String },
}

/// Everything the report needs from one run.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub passes: PassSet,
    pub results: AnalysisResults,
    pub scenes: Vec<Scene>,
    pub segmentation: SegmentationOutcome,
}

/// A queued model call.
struct PassJob {
    pass: AnalysisPass,
    scene: Option<Scene>,
    conversation: Conversation,
}

pub struct AnalysisPipeline<'a> {
    llm: &'a dyn ModelClient,
    options: PipelineOptions,
    persona: String,
}

impl<'a> AnalysisPipeline<'a> {
    pub fn new(llm: &'a dyn ModelClient, options: PipelineOptions) -> Self {
        let persona = editor_persona(&options.magazine);
        Self {
            llm,
            options,
            persona,
        }
    }

    /// Runs every enabled stage. Never fails: call errors end up in the results.
    ///
    /// Dropping the returned future cancels all in-flight calls.
    pub async fn run(&self, manuscript: &Manuscript) -> AnalysisRun {
        let mut results = AnalysisResults::default();

        let full_text = manuscript.full_text();
        let whole_jobs: Vec<PassJob> = self
            .options
            .passes
            .of_scope(Scope::WholeManuscript)
            .map(|pass| PassJob {
                pass,
                scene: None,
                conversation: pass.conversation(&self.persona, manuscript.title(), &full_text),
            })
            .collect();
        self.execute(whole_jobs, &mut results).await;

        let (scenes, segmentation) = if self.options.passes.has_scope(Scope::Scene) {
            match segment(manuscript, self.llm).await {
                Ok(segmentation) => (
                    segmentation.scenes,
                    SegmentationOutcome::Completed {
                        issues: segmentation.issues,
                    },
                ),
                Err(e) => {
                    warn!("Scene segmentation failed, continuing without scenes: {e}");
                    (
                        Vec::new(),
                        SegmentationOutcome::Failed {
                            reason: e.to_string(),
                        },
                    )
                }
            }
        } else {
            (Vec::new(), SegmentationOutcome::Skipped)
        };

        let mut scene_jobs = Vec::new();
        for scene in &scenes {
            info!(
                "Scene {} (paragraphs {}–{}): {}",
                scene.index, scene.start, scene.end, scene.summary
            );
            let scene_text = manuscript.scene_text(scene);
            for pass in self.options.passes.of_scope(Scope::Scene) {
                scene_jobs.push(PassJob {
                    pass,
                    scene: Some(scene.clone()),
                    conversation: pass.conversation(&self.persona, manuscript.title(), &scene_text),
                });
            }
        }
        self.execute(scene_jobs, &mut results).await;

        info!(
            "Analysis finished: {} results, {} failed",
            results.len(),
            results.failed_count()
        );

        AnalysisRun {
            passes: self.options.passes.clone(),
            results,
            scenes,
            segmentation,
        }
    }

    /// Dispatches jobs with bounded concurrency. The pipeline is the only
    /// writer of `results`; each job owns a distinct key.
    async fn execute(&self, jobs: Vec<PassJob>, results: &mut AnalysisResults) {
        let concurrency = self.options.concurrency.max(1);
        let mut outcomes = stream::iter(jobs.into_iter().map(|job| async move {
            match &job.scene {
                Some(scene) => info!(
                    "Analysing {} for scene {} ({} paragraphs)...",
                    job.pass,
                    scene.index,
                    scene.paragraph_count()
                ),
                None => info!("Analysing {}...", job.pass),
            }
            let outcome = self
                .llm
                .complete(
                    &job.conversation,
                    job.pass.temperature(),
                    job.pass.response_format(),
                )
                .await;
            (job, outcome)
        }))
        .buffer_unordered(concurrency);

        while let Some((job, outcome)) = outcomes.next().await {
            let scene_index = job.scene.as_ref().map(|s| s.index);
            let result = match outcome {
                Ok(text) => AnalysisResult::completed(job.pass, scene_index, text),
                Err(e) => {
                    warn!("Pass {} (scene {:?}) failed: {e}", job.pass, scene_index);
                    AnalysisResult::failed(job.pass, scene_index, e.to_string())
                }
            };
            results.insert(result);
        }
    }
}
