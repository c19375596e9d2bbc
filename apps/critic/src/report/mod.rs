//! Report assembly: renders one analysis run as markdown and writes it out.
//!
//! Section order is fixed and every heading is always emitted; a pass that was
//! skipped or failed gets a placeholder body instead of a missing heading.
//! Rendering is pure: the generation timestamp is an argument, so the same
//! inputs always give the same bytes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::info;

use crate::analysis::passes::{AnalysisPass, Scope};
use crate::analysis::pipeline::{AnalysisRun, SegmentationOutcome};
use crate::errors::AppError;
use crate::models::{Manuscript, Scene};

const TIMESTAMP_FORMAT: &str = "%Y 年 %m 月 %d 日 %H:%M:%S";
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const SKIPPED_PLACEHOLDER: &str = "*（本次未启用该项分析）*";
const MISSING_PLACEHOLDER: &str = "*（暂无分析结果）*";

/// Renders the full report.
pub fn render_report(
    manuscript: &Manuscript,
    run: &AnalysisRun,
    magazine: &str,
    generated_at: NaiveDateTime,
) -> String {
    let title = manuscript.title();
    let mut out = String::new();

    let _ = writeln!(out, "# 小说《{title}》分析报告\n");
    let _ = writeln!(
        out,
        "本报告由大语言模型于 {} 生成，以《{magazine}》的用稿标准审阅。\n",
        generated_at.format(TIMESTAMP_FORMAT)
    );

    let _ = writeln!(out, "## 小说概况\n");
    let _ = writeln!(out, "- 字数：约 {} 字", manuscript.char_count());
    let _ = writeln!(out, "- 自然段：共 {} 个", manuscript.paragraphs().len());
    let _ = writeln!(out, "- 场景：共 {} 个\n", run.scenes.len());

    for pass in AnalysisPass::ALL
        .into_iter()
        .filter(|p| p.scope() == Scope::WholeManuscript)
    {
        let _ = writeln!(out, "## {}\n", pass.heading());
        push_body(&mut out, &pass_body(run, pass, None));
    }

    let _ = writeln!(out, "## 场景分析\n");
    match &run.segmentation {
        SegmentationOutcome::Skipped => {
            let _ = writeln!(out, "*（本次未启用场景分析）*\n");
        }
        SegmentationOutcome::Failed { reason } => {
            let _ = writeln!(out, "*（场景划分失败，未能进行场景分析：{reason}）*\n");
        }
        SegmentationOutcome::Completed { issues } => {
            if run.scenes.is_empty() {
                let _ = writeln!(out, "*（模型未划分出任何场景）*\n");
            }
            if !issues.is_empty() {
                let _ = writeln!(out, "> 场景划分存在以下问题，场景分析仍按模型给出的范围进行：");
                let _ = writeln!(out, ">");
                for issue in issues {
                    let _ = writeln!(out, "> - {issue}");
                }
                out.push('\n');
            }
        }
    }

    for scene in &run.scenes {
        render_scene(&mut out, run, scene);
    }

    out
}

fn render_scene(out: &mut String, run: &AnalysisRun, scene: &Scene) {
    let _ = writeln!(out, "### 场景 {}\n", scene.index);
    if scene.start == scene.end {
        let _ = writeln!(out, "范围：第 {} 自然段。\n", scene.start);
    } else {
        let _ = writeln!(out, "范围：第 {} 至第 {} 自然段。\n", scene.start, scene.end);
    }
    let _ = writeln!(out, "主要内容：{}\n", scene.summary);

    for pass in AnalysisPass::ALL
        .into_iter()
        .filter(|p| p.scope() == Scope::Scene)
    {
        let _ = writeln!(out, "#### {}\n", pass.heading());
        push_body(out, &pass_body(run, pass, Some(scene.index)));
    }
}

/// Body text under a pass heading: the model's reply, or a placeholder.
fn pass_body(run: &AnalysisRun, pass: AnalysisPass, scene_index: Option<usize>) -> String {
    if !run.passes.contains(pass) {
        return SKIPPED_PLACEHOLDER.to_string();
    }
    match run.results.get(pass, scene_index) {
        Some(result) => match &result.error {
            Some(error) => format!("*（该项分析未能完成：{error}）*"),
            None => result.text.clone(),
        },
        None => MISSING_PLACEHOLDER.to_string(),
    }
}

/// Appends a section body verbatim, then the blank line that closes it.
fn push_body(out: &mut String, body: &str) {
    out.push_str(body);
    if !body.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
}

/// File name for a report: `小说《title》分析报告_YYYYmmdd_HHMMSS.md`.
pub fn report_file_name(title: &str, generated_at: NaiveDateTime) -> String {
    let safe_title: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    format!(
        "小说《{safe_title}》分析报告_{}.md",
        generated_at.format(FILE_TIMESTAMP_FORMAT)
    )
}

/// Writes the report into `output_dir` and returns its path.
pub async fn write_report(
    output_dir: &Path,
    file_name: &str,
    contents: &str,
) -> Result<PathBuf, AppError> {
    let path = output_dir.join(file_name);
    tokio::fs::write(&path, contents)
        .await
        .map_err(|e| AppError::io(&path, e))?;
    info!("Report written to {}", path.display());
    Ok(path)
}
