use crate::config::DEFAULT_INVOCATION_TIMEOUT_SECS;
use crate::model::{Invocation, ProcessingStatus};
use crate::pipeline::builder::build_option;
use crate::pipeline::classify::{Classification, classify};
use crate::store::{AppendResult, DocumentStore, StatusWrite, StoreError};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_INVOCATION_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_INVOCATION_TIMEOUT_SECS);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotOptionProposal,
    AlreadyTerminal(ProcessingStatus),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotOptionProposal => f.write_str("not an option proposal"),
            SkipReason::AlreadyTerminal(status) => write!(f, "already {status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Validation(String),
    ProposalNotFound(String),
    CorruptDocument(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Validation(detail) => write!(f, "validation: {detail}"),
            FailureReason::ProposalNotFound(id) => write!(f, "proposal not found: {id}"),
            FailureReason::CorruptDocument(detail) => write!(f, "corrupt document: {detail}"),
        }
    }
}

/// Result of one invocation that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Processed {
        option_id: String,
        /// `false` when the option was already in the collection.
        appended: bool,
    },
    Failed(FailureReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Skipped(_) => "skipped",
            Outcome::Processed { .. } => "processed",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn option_id(&self) -> Option<&str> {
        match self {
            Outcome::Processed { option_id, .. } => Some(option_id),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            Outcome::Skipped(reason) => Some(reason.to_string()),
            Outcome::Processed { appended: false, .. } => Some("option already present".to_string()),
            Outcome::Processed { .. } => None,
            Outcome::Failed(reason) => Some(reason.to_string()),
        }
    }
}

/// Failures that leave the comment untouched so the trigger can redeliver.
#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("invocation exceeded {budget:?} before {step}")]
    Timeout { budget: Duration, step: &'static str },
    #[error("store failure during {step}: {source}")]
    Store {
        step: &'static str,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_INVOCATION_TIMEOUT,
        }
    }
}

struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self, step: &'static str) -> Result<(), PromotionError> {
        if self.started.elapsed() >= self.budget {
            return Err(PromotionError::Timeout {
                budget: self.budget,
                step,
            });
        }
        Ok(())
    }
}

fn store_failure(step: &'static str) -> impl FnOnce(StoreError) -> PromotionError {
    move |source| PromotionError::Store { step, source }
}

/// Promotes option-proposal comments into proposal options.
///
/// Holds no state between invocations; every call to [`Coordinator::handle`]
/// can run on its own thread against its own store handle.
pub struct Coordinator<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    options: CoordinatorOptions,
}

impl<'a, S: DocumentStore + ?Sized> Coordinator<'a, S> {
    pub fn new(store: &'a S, options: CoordinatorOptions) -> Self {
        Self { store, options }
    }

    pub fn handle(&self, inv: &Invocation) -> Result<Outcome, PromotionError> {
        let deadline = Deadline::start(self.options.timeout);

        let classification = classify(&inv.payload);
        if classification == Classification::Skip {
            return Ok(Outcome::Skipped(SkipReason::NotOptionProposal));
        }

        // Only the stored status counts; a payload status comes from the author.
        deadline.check("status lookup")?;
        if let Some(status) = self
            .store
            .comment_status(&inv.proposal_id, &inv.comment_id)
            .map_err(store_failure("status lookup"))?
        {
            debug!(
                proposal_id = %inv.proposal_id,
                comment_id = %inv.comment_id,
                %status,
                "comment already terminal"
            );
            return Ok(Outcome::Skipped(SkipReason::AlreadyTerminal(status)));
        }

        match classification {
            Classification::Invalid(detail) => self.fail(inv, &deadline, FailureReason::Validation(detail)),
            _ => self.promote(inv, &deadline),
        }
    }

    fn promote(&self, inv: &Invocation, deadline: &Deadline) -> Result<Outcome, PromotionError> {
        let Some(option) = build_option(&inv.comment_id, &inv.payload) else {
            return self.fail(
                inv,
                deadline,
                FailureReason::Validation("comment lacks content or author uid".to_string()),
            );
        };

        deadline.check("proposal read")?;
        let proposal = match self.store.get_proposal(&inv.proposal_id) {
            Ok(proposal) => proposal,
            Err(e) => return self.store_error(inv, deadline, "proposal read", e),
        };

        let appended = if proposal.has_option(&option.id) {
            debug!(
                proposal_id = %inv.proposal_id,
                option_id = %option.id,
                "option already present; skipping append"
            );
            false
        } else {
            deadline.check("option append")?;
            match self.store.append_option(&inv.proposal_id, &option) {
                Ok(AppendResult::Appended) => true,
                Ok(AppendResult::AlreadyPresent) => false,
                Err(e) => return self.store_error(inv, deadline, "option append", e),
            }
        };

        self.finish(
            inv,
            deadline,
            ProcessingStatus::Processed,
            None,
            Outcome::Processed {
                option_id: option.id,
                appended,
            },
        )
    }

    /// Missing or undecodable documents are permanent; anything else is left
    /// for redelivery.
    fn store_error(
        &self,
        inv: &Invocation,
        deadline: &Deadline,
        step: &'static str,
        err: StoreError,
    ) -> Result<Outcome, PromotionError> {
        let reason = match err {
            StoreError::NotFound(id) => FailureReason::ProposalNotFound(id),
            StoreError::Corrupt(detail) => FailureReason::CorruptDocument(detail),
            transient @ StoreError::Transient(_) => return Err(store_failure(step)(transient)),
        };
        self.fail(inv, deadline, reason)
    }

    fn fail(
        &self,
        inv: &Invocation,
        deadline: &Deadline,
        reason: FailureReason,
    ) -> Result<Outcome, PromotionError> {
        let detail = reason.to_string();
        self.finish(
            inv,
            deadline,
            ProcessingStatus::Failed,
            Some(&detail),
            Outcome::Failed(reason),
        )
    }

    fn finish(
        &self,
        inv: &Invocation,
        deadline: &Deadline,
        status: ProcessingStatus,
        reason: Option<&str>,
        outcome: Outcome,
    ) -> Result<Outcome, PromotionError> {
        deadline.check("status write")?;
        match self
            .store
            .set_comment_status(&inv.proposal_id, &inv.comment_id, status, reason)
            .map_err(store_failure("status write"))?
        {
            StatusWrite::Written => Ok(outcome),
            StatusWrite::AlreadyTerminal(existing) => {
                warn!(
                    proposal_id = %inv.proposal_id,
                    comment_id = %inv.comment_id,
                    %existing,
                    wanted = %status,
                    "lost status race to a concurrent delivery"
                );
                Ok(Outcome::Skipped(SkipReason::AlreadyTerminal(existing)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Author, Comment};
    use crate::pipeline::builder::derive_option_id;
    use crate::store::sqlite::{DEFAULT_BUSY_TIMEOUT, SqliteStore};
    use tempfile::tempdir;

    fn invocation(id: &str, content: &str) -> Invocation {
        Invocation::new(
            "p1",
            Comment {
                id: id.to_string(),
                content: Some(content.to_string()),
                author: Some(Author {
                    uid: Some("u1".to_string()),
                    name: Some("Ana".to_string()),
                }),
                is_option_proposal: Some(true),
                processing_status: None,
            },
        )
    }

    #[test]
    fn payload_status_does_not_stand_in_for_stored_status() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();
        let mut inv = invocation("c1", "Adopt policy A");
        inv.payload.processing_status = Some(ProcessingStatus::Processed);

        let outcome = Coordinator::new(&store, CoordinatorOptions::default())
            .handle(&inv)
            .unwrap();
        assert!(matches!(outcome, Outcome::Processed { appended: true, .. }));
        assert_eq!(
            store.comment_status("p1", "c1").unwrap(),
            Some(ProcessingStatus::Processed)
        );
    }

    #[test]
    fn option_id_follows_trigger_comment_id() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();
        let mut inv = invocation("c1", "Adopt policy A");
        inv.payload.id = "other".to_string();

        let outcome = Coordinator::new(&store, CoordinatorOptions::default())
            .handle(&inv)
            .unwrap();
        assert_eq!(outcome.option_id(), Some(derive_option_id("c1").as_str()));
    }

    #[test]
    fn default_timeout_matches_config_default() {
        assert_eq!(
            CoordinatorOptions::default().timeout,
            crate::config::PipelineConfig::default().invocation_timeout()
        );
    }

    #[test]
    fn zero_budget_times_out_before_any_write() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
        store.create_proposal("p1", "Budget").unwrap();

        let err = Coordinator::new(
            &store,
            CoordinatorOptions {
                timeout: Duration::ZERO,
            },
        )
        .handle(&invocation("c1", "Adopt policy A"))
        .unwrap_err();
        assert!(matches!(err, PromotionError::Timeout { step: "status lookup", .. }));
        assert!(store.get_proposal("p1").unwrap().options.is_empty());
        assert_eq!(store.comment_status("p1", "c1").unwrap(), None);
    }

    #[test]
    fn missing_proposal_fails_terminally() {
        let tmp = tempdir().unwrap();
        let store = SqliteStore::open(&tmp.path().join("store.db"), DEFAULT_BUSY_TIMEOUT).unwrap();

        let outcome = Coordinator::new(&store, CoordinatorOptions::default())
            .handle(&invocation("c1", "Adopt policy A"))
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Failed(FailureReason::ProposalNotFound("p1".to_string()))
        );
        assert_eq!(
            store.comment_status("p1", "c1").unwrap(),
            Some(ProcessingStatus::Failed)
        );
    }

    #[test]
    fn outcome_labels_and_reasons() {
        let processed = Outcome::Processed {
            option_id: "opc_x".to_string(),
            appended: true,
        };
        assert_eq!(processed.label(), "processed");
        assert_eq!(processed.option_id(), Some("opc_x"));
        assert_eq!(processed.reason(), None);

        let failed = Outcome::Failed(FailureReason::Validation("missing".to_string()));
        assert_eq!(failed.label(), "failed");
        assert_eq!(failed.reason().as_deref(), Some("validation: missing"));
    }
}
