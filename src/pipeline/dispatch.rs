use crate::logging::ndjson;
use crate::model::Invocation;
use crate::pipeline::coordinator::{Coordinator, CoordinatorOptions, Outcome, PromotionError};
use crate::store::NewInvocation;
use crate::store::sqlite::SqliteStore;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub const OUTCOME_RETRY: &str = "retry";

/// What one invocation reported to operators.
///
/// `outcome` is `skipped`, `processed`, `failed`, or `retry` when the
/// invocation hit a transient fault and should be redelivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub proposal_id: String,
    pub comment_id: String,
    pub outcome: String,
    pub option_id: Option<String>,
    pub reason: Option<String>,
}

impl Report {
    pub fn from_result(inv: &Invocation, result: &Result<Outcome, PromotionError>) -> Self {
        match result {
            Ok(outcome) => Self {
                proposal_id: inv.proposal_id.clone(),
                comment_id: inv.comment_id.clone(),
                outcome: outcome.label().to_string(),
                option_id: outcome.option_id().map(ToString::to_string),
                reason: outcome.reason(),
            },
            Err(err) => Self {
                proposal_id: inv.proposal_id.clone(),
                comment_id: inv.comment_id.clone(),
                outcome: OUTCOME_RETRY.to_string(),
                option_id: None,
                reason: Some(err.to_string()),
            },
        }
    }

    pub fn needs_redelivery(&self) -> bool {
        self.outcome == OUTCOME_RETRY
    }
}

/// Runs one invocation against `store` and reports the result.
///
/// Reporting is best effort: a failure to record never changes the outcome.
pub fn run_invocation(
    store: &SqliteStore,
    options: CoordinatorOptions,
    ndjson_log: Option<&Path>,
    inv: &Invocation,
) -> Report {
    let result = Coordinator::new(store, options).handle(inv);
    let report = Report::from_result(inv, &result);
    match &result {
        Ok(Outcome::Failed(reason)) => warn!(
            proposal_id = %inv.proposal_id,
            comment_id = %inv.comment_id,
            %reason,
            "comment promotion failed"
        ),
        Ok(outcome) => info!(
            proposal_id = %inv.proposal_id,
            comment_id = %inv.comment_id,
            outcome = outcome.label(),
            option_id = outcome.option_id().unwrap_or(""),
            "comment invocation finished"
        ),
        Err(err) => warn!(
            proposal_id = %inv.proposal_id,
            comment_id = %inv.comment_id,
            error = %err,
            "comment invocation needs redelivery"
        ),
    }
    record(store, ndjson_log, &report);
    report
}

fn record(store: &SqliteStore, ndjson_log: Option<&Path>, report: &Report) {
    if let Err(err) = store.record_invocation(&NewInvocation {
        proposal_id: report.proposal_id.clone(),
        comment_id: report.comment_id.clone(),
        outcome: report.outcome.clone(),
        option_id: report.option_id.clone(),
        reason: report.reason.clone(),
    }) {
        warn!(comment_id = %report.comment_id, error = %err, "failed to record invocation");
    }
    if let Some(path) = ndjson_log
        && let Err(err) = ndjson::mirror_report(path, report)
    {
        warn!(path = %path.display(), error = %err, "failed to mirror invocation");
    }
}

/// Runs invocations in parallel, each worker on its own store connection.
///
/// Reports come back in the order of `invocations`.
pub fn run_batch(
    store_path: &Path,
    busy_timeout: Duration,
    options: CoordinatorOptions,
    workers: usize,
    ndjson_log: Option<&Path>,
    invocations: &[Invocation],
) -> Result<Vec<Report>> {
    let workers = workers.max(1).min(invocations.len().max(1));
    let next = AtomicUsize::new(0);
    let collected = Mutex::new(Vec::with_capacity(invocations.len()));

    thread::scope(|scope| -> Result<()> {
        let handles = (0..workers)
            .map(|_| {
                scope.spawn(|| -> Result<()> {
                    let store = SqliteStore::open(store_path, busy_timeout)?;
                    loop {
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(inv) = invocations.get(idx) else {
                            return Ok(());
                        };
                        let report = run_invocation(&store, options, ndjson_log, inv);
                        collected
                            .lock()
                            .map_err(|_| anyhow!("report collector poisoned"))?
                            .push((idx, report));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("dispatch worker panicked"))??;
        }
        Ok(())
    })?;

    let mut reports = collected
        .into_inner()
        .map_err(|_| anyhow!("report collector poisoned"))?;
    reports.sort_by_key(|(idx, _)| *idx);
    Ok(reports.into_iter().map(|(_, report)| report).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Comment};
    use crate::store::DocumentStore;
    use crate::store::sqlite::DEFAULT_BUSY_TIMEOUT;
    use tempfile::tempdir;

    fn inv(comment_id: &str, flagged: bool) -> Invocation {
        Invocation::new(
            "p1",
            Comment {
                id: comment_id.to_string(),
                content: Some(format!("option from {comment_id}")),
                author: Some(Author {
                    uid: Some("u1".to_string()),
                    name: None,
                }),
                is_option_proposal: Some(flagged),
                processing_status: None,
            },
        )
    }

    #[test]
    fn run_invocation_records_to_log_and_ndjson() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();
        let log = tmp.path().join("outcomes.ndjson");

        let report = run_invocation(
            &store,
            CoordinatorOptions::default(),
            Some(&log),
            &inv("c1", true),
        );
        assert_eq!(report.outcome, "processed");
        assert!(!report.needs_redelivery());

        let rows = store.list_invocations("p1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, "processed");
        assert_eq!(rows[0].option_id, report.option_id);
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);
    }

    #[test]
    fn batch_preserves_input_order() {
        let tmp = tempdir().unwrap();
        let db = tmp.path().join("store.db");
        let store = SqliteStore::open(&db, DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();

        let invocations = (0..12)
            .map(|i| inv(&format!("c{i}"), i % 3 != 0))
            .collect::<Vec<_>>();
        let reports = run_batch(
            &db,
            DEFAULT_BUSY_TIMEOUT,
            CoordinatorOptions::default(),
            4,
            None,
            &invocations,
        )
        .unwrap();

        assert_eq!(reports.len(), 12);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.comment_id, format!("c{i}"));
            let expected = if i % 3 != 0 { "processed" } else { "skipped" };
            assert_eq!(report.outcome, expected);
        }
        assert_eq!(store.get_proposal("p1").unwrap().options.len(), 8);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let tmp = tempdir().unwrap();
        let db = tmp.path().join("store.db");
        let reports = run_batch(
            &db,
            DEFAULT_BUSY_TIMEOUT,
            CoordinatorOptions::default(),
            4,
            None,
            &[],
        )
        .unwrap();
        assert!(reports.is_empty());
    }
}
