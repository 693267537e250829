use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::pipeline::{BatchCounts, RunSummary};

pub fn reports_dir_for(workspace_root: &Path, summary: &RunSummary) -> PathBuf {
    workspace_root
        .join("reports")
        .join(summary.run_id.to_string())
}

fn stage_row(name: &str, counts: &BatchCounts) -> String {
    format!(
        "| {} | {} | {} | {} | {} |",
        name, counts.found, counts.succeeded, counts.skipped, counts.failed
    )
}

pub fn run_brief_markdown(summary: &RunSummary) -> String {
    let rows = [
        stage_row("scrape", &summary.scrape),
        stage_row("clean", &summary.clean),
        stage_row("analyze", &summary.analyze),
        stage_row("load", &summary.load),
    ];
    format!(
        "# Job pipeline run\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Offers stored: {}\n\n\
         ## Stages\n\n| stage | found | succeeded | skipped | failed |\n|---|---|---|---|---|\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.load.succeeded,
        rows.join("\n")
    )
}

/// Writes `reports/<run_id>/run_summary.json` and `run_brief.md`, recording
/// the directory in the summary.
pub async fn write_reports(workspace_root: &Path, summary: &mut RunSummary) -> Result<PathBuf> {
    let dir = reports_dir_for(workspace_root, summary);
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    summary.reports_dir = Some(dir.display().to_string());

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(dir.join("run_summary.json"), json)
        .await
        .context("writing run_summary.json")?;
    fs::write(dir.join("run_brief.md"), run_brief_markdown(summary))
        .await
        .context("writing run_brief.md")?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn summary() -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            scrape: BatchCounts {
                found: 12,
                succeeded: 9,
                skipped: 2,
                failed: 1,
            },
            clean: BatchCounts::default(),
            analyze: BatchCounts::default(),
            load: BatchCounts {
                found: 9,
                succeeded: 8,
                skipped: 0,
                failed: 1,
            },
            reports_dir: None,
        }
    }

    #[tokio::test]
    async fn reports_land_under_run_id() {
        let root = tempfile::tempdir().unwrap();
        let mut summary = summary();
        let dir = write_reports(root.path(), &mut summary).await.unwrap();

        assert_eq!(dir, root.path().join("reports").join(summary.run_id.to_string()));
        assert_eq!(summary.reports_dir.as_deref(), Some(dir.display().to_string().as_str()));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.join("run_summary.json")).unwrap()).unwrap();
        assert_eq!(json["scrape"]["found"], 12);
        assert_eq!(json["load"]["failed"], 1);

        let brief = std::fs::read_to_string(dir.join("run_brief.md")).unwrap();
        assert!(brief.contains("| scrape | 12 | 9 | 2 | 1 |"));
        assert!(brief.contains("- Offers stored: 8"));
    }
}
