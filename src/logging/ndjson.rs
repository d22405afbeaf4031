use crate::pipeline::dispatch::Report;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

pub fn mirror_report(path: &Path, report: &Report) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open ndjson log {}", path.display()))?;
    let line = json!({
        "ts": Utc::now().to_rfc3339(),
        "proposal": report.proposal_id,
        "comment": report.comment_id,
        "outcome": report.outcome,
        "option": report.option_id,
        "reason": report.reason
    });
    // One write per line so concurrent workers never interleave records.
    f.write_all(format!("{line}\n").as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_object_per_report() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs").join("outcomes.ndjson");
        let report = Report {
            proposal_id: "p1".to_string(),
            comment_id: "c1".to_string(),
            outcome: "processed".to_string(),
            option_id: Some("opc_1".to_string()),
            reason: None,
        };
        mirror_report(&path, &report).unwrap();
        mirror_report(&path, &report).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["outcome"], "processed");
        assert_eq!(first["option"], "opc_1");
        assert!(first["reason"].is_null());
    }
}
