//! Analysis passes: the fixed critique dimensions and the set enabled for a run.

use std::collections::BTreeSet;
use std::fmt;

use clap::ValueEnum;

use crate::analysis::prompts;
use crate::llm_client::{Conversation, ResponseFormat};

/// Sampling temperature used for every critique call.
const CRITIQUE_TEMPERATURE: f32 = 0.2;

/// What a pass reads: the whole manuscript or one scene's paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    WholeManuscript,
    Scene,
}

/// One critique dimension.
///
/// Declaration order is pipeline order, and therefore report order: the
/// derived `Ord` keeps `PassSet` iteration in that order. The kebab-case
/// value names are what `--passes` accepts.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnalysisPass {
    Critical,
    Core,
    #[value(alias = "plot_rhythm")]
    PlotRhythm,
    Character,
    Theme,
    #[value(alias = "scene_validity")]
    SceneValidity,
    #[value(alias = "show_and_tell")]
    ShowAndTell,
    Dialogue,
}

impl AnalysisPass {
    pub const ALL: [AnalysisPass; 8] = [
        AnalysisPass::Critical,
        AnalysisPass::Core,
        AnalysisPass::PlotRhythm,
        AnalysisPass::Character,
        AnalysisPass::Theme,
        AnalysisPass::SceneValidity,
        AnalysisPass::ShowAndTell,
        AnalysisPass::Dialogue,
    ];

    pub fn scope(self) -> Scope {
        match self {
            AnalysisPass::Critical
            | AnalysisPass::Core
            | AnalysisPass::PlotRhythm
            | AnalysisPass::Character
            | AnalysisPass::Theme => Scope::WholeManuscript,
            AnalysisPass::SceneValidity | AnalysisPass::ShowAndTell | AnalysisPass::Dialogue => {
                Scope::Scene
            }
        }
    }

    pub fn response_format(self) -> ResponseFormat {
        ResponseFormat::PlainText
    }

    pub fn temperature(self) -> f32 {
        CRITIQUE_TEMPERATURE
    }

    /// Name accepted by `--passes`.
    pub fn cli_name(self) -> &'static str {
        match self {
            AnalysisPass::Critical => "critical",
            AnalysisPass::Core => "core",
            AnalysisPass::PlotRhythm => "plot-rhythm",
            AnalysisPass::Character => "character",
            AnalysisPass::Theme => "theme",
            AnalysisPass::SceneValidity => "scene-validity",
            AnalysisPass::ShowAndTell => "show-and-tell",
            AnalysisPass::Dialogue => "dialogue",
        }
    }

    /// Report heading for this pass's section.
    pub fn heading(self) -> &'static str {
        match self {
            AnalysisPass::Critical => "最严重问题",
            AnalysisPass::Core => "核心问题",
            AnalysisPass::PlotRhythm => "情节结构与节奏",
            AnalysisPass::Character => "人物弧光",
            AnalysisPass::Theme => "故事主旨",
            AnalysisPass::SceneValidity => "场景有效性",
            AnalysisPass::ShowAndTell => "展示与讲述",
            AnalysisPass::Dialogue => "对话",
        }
    }

    /// Builds this pass's conversation over `scope_text`.
    pub fn conversation(self, persona: &str, title: &str, scope_text: &str) -> Conversation {
        prompts::critique_conversation(self, persona, title, scope_text)
    }
}

impl fmt::Display for AnalysisPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_name())
    }
}

/// The passes enabled for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSet(BTreeSet<AnalysisPass>);

impl PassSet {
    pub fn all() -> Self {
        Self(AnalysisPass::ALL.into_iter().collect())
    }

    /// The `--passes` selection. An empty selection means every pass.
    pub fn from_selection(passes: &[AnalysisPass]) -> Self {
        if passes.is_empty() {
            return Self::all();
        }
        Self(passes.iter().copied().collect())
    }

    pub fn contains(&self, pass: AnalysisPass) -> bool {
        self.0.contains(&pass)
    }

    /// Enabled passes of one scope, in pipeline order.
    pub fn of_scope(&self, scope: Scope) -> impl Iterator<Item = AnalysisPass> + '_ {
        self.0.iter().copied().filter(move |p| p.scope() == scope)
    }

    pub fn has_scope(&self, scope: Scope) -> bool {
        self.of_scope(scope).next().is_some()
    }
}
