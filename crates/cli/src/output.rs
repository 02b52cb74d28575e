//! Writes the draft and the diagnostic report of a finished run.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use pipeline::{Completion, PipelineState};
use serde::Serialize;
use tracing::warn;

/// Files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// The draft, absent when the run produced no text at all.
    pub draft: Option<PathBuf>,
    pub report: PathBuf,
}

#[derive(Serialize)]
struct Report<'a> {
    completion: Completion,
    #[serde(flatten)]
    state: &'a PipelineState,
}

/// Writes `<output>/<case>/<case>_draft.md` and `<case>_report.json`.
///
/// The draft is the final text, or the last draft when the run stopped
/// before the loop finished.
pub fn write_outputs(state: &PipelineState) -> anyhow::Result<OutputPaths> {
    let stem = state.input().job.file_stem();
    let dir = state.input().output_dir.join(&stem);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let draft = match state.final_text().or(state.draft.as_deref()) {
        Some(text) => {
            let path = dir.join(format!("{stem}_draft.md"));
            fs::write(&path, text)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Some(path)
        }
        None => {
            warn!("Run produced no draft; only the report is written");
            None
        }
    };

    let report_path = dir.join(format!("{stem}_report.json"));
    let report = Report {
        completion: Completion::from_state(state),
        state,
    };
    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    fs::write(&report_path, json)
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    Ok(OutputPaths {
        draft,
        report: report_path,
    })
}
